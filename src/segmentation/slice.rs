use super::types::{Plane, Slice};
use crate::error::SegmentError;
use crate::volume::{BoundingBox, Volume};

/// Box covering the whole slice through `voxel` in `plane`
///
/// Only the coordinate on the pinned axis is used, and it must lie inside
/// `dims`.
pub fn slice_bounds(
    plane: Plane,
    voxel: [i64; 3],
    dims: [usize; 3],
) -> Result<BoundingBox, SegmentError> {
    let axis = plane.pinned_axis();
    let at = voxel[axis];
    if at < 0 || at as usize >= dims[axis] || dims.contains(&0) {
        return Err(SegmentError::OutOfBounds { voxel, dims });
    }

    let mut start = [0; 3];
    let mut end = dims.map(|d| d - 1);
    start[axis] = at as usize;
    end[axis] = at as usize;
    BoundingBox::pinned(axis, start, end)
}

/// (width, height) of a block with `extents`, as seen in `plane`
///
/// Sagittal reports (dim2, dim1) even though the flattened data runs along
/// dim1 first. The network and the write-back both rely on this.
pub fn slice_shape(plane: Plane, extents: [usize; 3]) -> (usize, usize) {
    match plane {
        Plane::Axial => (extents[0], extents[1]),
        Plane::Coronal => (extents[0], extents[2]),
        Plane::Sagittal => (extents[2], extents[1]),
    }
}

/// Pull the voxels inside `bounds` out of `volume` as a 2D slice
pub fn extract_slice(
    volume: &Volume,
    bounds: &BoundingBox,
    plane: Plane,
) -> Result<Slice, SegmentError> {
    let (data, extents) = volume.get_volume_data(bounds)?;
    let (width, height) = slice_shape(plane, extents);
    tracing::debug!("Extracted {} slice {}x{}", plane, width, height);
    Ok(Slice {
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::test_volume;

    #[test]
    fn coronal_uses_dims_zero_and_two() {
        let volume = test_volume([10, 10, 10]);
        let bounds = BoundingBox::new([0, 5, 0], [9, 5, 9]).unwrap();
        let slice = extract_slice(&volume, &bounds, Plane::Coronal).unwrap();

        assert_eq!((slice.width, slice.height), (10, 10));
        assert_eq!(slice.data.len(), 100);
        // First row of the coronal slice is y = 5, z = 0.
        assert_eq!(slice.data[0], 50.0);
        assert_eq!(slice.data[10], 150.0);
    }

    #[test]
    fn shape_follows_plane_mapping() {
        let volume = test_volume([6, 7, 8]);
        let cases = [
            (Plane::Axial, [2, 3, 4], (6, 7)),
            (Plane::Coronal, [2, 3, 4], (6, 8)),
            (Plane::Sagittal, [2, 3, 4], (8, 7)),
        ];
        for (plane, voxel, shape) in cases {
            let bounds = slice_bounds(plane, voxel, volume.dims()).unwrap();
            let slice = extract_slice(&volume, &bounds, plane).unwrap();
            assert_eq!((slice.width, slice.height), shape, "{plane}");
            assert_eq!(slice.width * slice.height, slice.data.len());
        }
    }

    #[test]
    fn bounds_pin_the_cursor_axis() {
        let dims = [10, 11, 12];
        assert_eq!(
            slice_bounds(Plane::Axial, [1, 2, 3], dims).unwrap(),
            BoundingBox::new([0, 0, 3], [9, 10, 3]).unwrap()
        );
        assert_eq!(
            slice_bounds(Plane::Coronal, [1, 2, 3], dims).unwrap(),
            BoundingBox::new([0, 2, 0], [9, 2, 11]).unwrap()
        );
        assert_eq!(
            slice_bounds(Plane::Sagittal, [1, 2, 3], dims).unwrap(),
            BoundingBox::new([1, 0, 0], [1, 10, 11]).unwrap()
        );
    }

    #[test]
    fn single_column_volume_still_slices() {
        let volume = test_volume([1, 4, 4]);
        let bounds = slice_bounds(Plane::Axial, [0, 0, 1], volume.dims()).unwrap();
        assert_eq!(bounds.pinned_axis(), 2);

        let slice = extract_slice(&volume, &bounds, Plane::Axial).unwrap();
        assert_eq!((slice.width, slice.height), (1, 4));
        assert_eq!(slice.data, vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn cursor_outside_volume_fails() {
        assert!(slice_bounds(Plane::Axial, [0, 0, 12], [10, 11, 12]).is_err());
        assert!(slice_bounds(Plane::Sagittal, [-1, 0, 0], [10, 11, 12]).is_err());
    }
}
