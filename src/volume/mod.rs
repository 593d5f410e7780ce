mod conform;

pub use conform::{conform, is_conformed};

use crate::error::SegmentError;
use anyhow::{Context, Result};
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// Voxel-to-world transform, row major, millimetres
pub type Affine = [[f64; 4]; 4];

/// Lookup table used when compositing a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Gray,
    Red,
}

/// Inclusive, axis-aligned voxel box one voxel thick along its pinned axis
///
/// Flattened reads and writes visit x fastest, then y, then z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub start: [usize; 3],
    pub end: [usize; 3],
    axis: usize,
}

impl BoundingBox {
    /// Build a box that pins exactly one axis to a single voxel
    pub fn new(start: [usize; 3], end: [usize; 3]) -> Result<Self, SegmentError> {
        let mut pinned = (0..3).filter(|&axis| start[axis] == end[axis]);
        match (pinned.next(), pinned.next()) {
            (Some(axis), None) => Self::pinned(axis, start, end),
            _ => Err(SegmentError::InvalidBoundingBox { start, end }),
        }
    }

    /// Build a box one voxel thick along `axis`
    ///
    /// Other axes may also span a single voxel, as on a one-slice volume.
    pub fn pinned(
        axis: usize,
        start: [usize; 3],
        end: [usize; 3],
    ) -> Result<Self, SegmentError> {
        let ordered = (0..3).all(|a| start[a] <= end[a]);
        if axis >= 3 || !ordered || start[axis] != end[axis] {
            return Err(SegmentError::InvalidBoundingBox { start, end });
        }
        Ok(Self { start, end, axis })
    }

    /// Number of voxels covered along each axis
    pub fn extents(&self) -> [usize; 3] {
        [0, 1, 2].map(|axis| self.end[axis] - self.start[axis] + 1)
    }

    pub fn len(&self) -> usize {
        self.extents().iter().product()
    }

    /// The axis held at a single voxel
    pub fn pinned_axis(&self) -> usize {
        self.axis
    }

    fn check_within(&self, dims: [usize; 3]) -> Result<(), SegmentError> {
        if (0..3).any(|axis| self.end[axis] >= dims[axis]) {
            return Err(SegmentError::OutOfBounds {
                voxel: self.end.map(|v| v as i64),
                dims,
            });
        }
        Ok(())
    }

    /// Voxel indices in flattened order
    pub fn voxels(&self) -> impl Iterator<Item = [usize; 3]> {
        let (start, end) = (self.start, self.end);
        (start[2]..=end[2]).flat_map(move |z| {
            (start[1]..=end[1])
                .flat_map(move |y| (start[0]..=end[0]).map(move |x| [x, y, z]))
        })
    }
}

/// A 3D scalar image together with its NIfTI header
#[derive(Debug, Clone)]
pub struct Volume {
    // NiftiHeader is a large stack object, keep it boxed.
    header: Box<NiftiHeader>,
    data: Array3<f32>,
    pub opacity: f32,
    pub colormap: Colormap,
}

impl Volume {
    /// Open a `.nii` or `.nii.gz` file
    ///
    /// Intensities are scaled by the header slope and intercept. A 4D file is
    /// accepted only when it holds a single frame.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading volume from {}", path.display());

        let obj = ReaderOptions::new()
            .read_file(path)
            .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
        let header = obj.header().clone();
        let mut data = obj
            .into_volume()
            .into_ndarray::<f32>()
            .with_context(|| format!("Failed to decode voxels of {}", path.display()))?;

        while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
            let last = data.ndim() - 1;
            data = data.index_axis_move(Axis(last), 0);
        }
        let data = data
            .into_dimensionality::<Ix3>()
            .with_context(|| format!("{} is not a 3D volume", path.display()))?;

        let volume = Self::from_parts(header, data);
        tracing::info!("Loaded {:?} volume", volume.dims());
        Ok(volume)
    }

    /// Wrap raw voxels, rewriting the header dimensions to match `data`
    pub fn from_parts(mut header: NiftiHeader, data: Array3<f32>) -> Self {
        let shape = data.dim();
        header.dim = [3, shape.0 as _, shape.1 as _, shape.2 as _, 1, 1, 1, 1];
        Self {
            header: Box::new(header),
            data,
            opacity: 1.0,
            colormap: Colormap::Gray,
        }
    }

    /// Zero-filled copy on the same grid, ready to hold a binary mask
    pub fn empty_like(&self) -> Self {
        Self {
            header: self.header.clone(),
            data: Array3::zeros(self.data.raw_dim()),
            opacity: self.opacity,
            colormap: self.colormap,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// Voxel-to-world transform
    ///
    /// Uses the sform when present, then the qform, then plain voxel spacing.
    pub fn affine(&self) -> Affine {
        let h = &self.header;
        if h.sform_code > 0 {
            let row = |r: [f32; 4]| r.map(f64::from);
            return [
                row(h.srow_x),
                row(h.srow_y),
                row(h.srow_z),
                [0.0, 0.0, 0.0, 1.0],
            ];
        }

        let spacing = [1, 2, 3].map(|i| {
            let s = f64::from(h.pixdim[i]);
            if s > 0.0 {
                s
            } else {
                1.0
            }
        });

        if h.qform_code > 0 {
            let (b, c, d) = (
                f64::from(h.quatern_b),
                f64::from(h.quatern_c),
                f64::from(h.quatern_d),
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let r = [
                [
                    a * a + b * b - c * c - d * d,
                    2.0 * (b * c - a * d),
                    2.0 * (b * d + a * c),
                ],
                [
                    2.0 * (b * c + a * d),
                    a * a + c * c - b * b - d * d,
                    2.0 * (c * d - a * b),
                ],
                [
                    2.0 * (b * d - a * c),
                    2.0 * (c * d + a * b),
                    a * a + d * d - c * c - b * b,
                ],
            ];
            let scale = [spacing[0], spacing[1], spacing[2] * qfac];
            let offset = [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from);
            let mut affine = [[0.0; 4]; 4];
            for i in 0..3 {
                for j in 0..3 {
                    affine[i][j] = r[i][j] * scale[j];
                }
                affine[i][3] = offset[i];
            }
            affine[3][3] = 1.0;
            return affine;
        }

        [
            [spacing[0], 0.0, 0.0, 0.0],
            [0.0, spacing[1], 0.0, 0.0],
            [0.0, 0.0, spacing[2], 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Read the voxels inside `bounds`, flattened, with the box extents
    pub fn get_volume_data(
        &self,
        bounds: &BoundingBox,
    ) -> Result<(Vec<f32>, [usize; 3]), SegmentError> {
        bounds.check_within(self.dims())?;
        let values = bounds.voxels().map(|v| self.data[v]).collect();
        Ok((values, bounds.extents()))
    }

    /// Overwrite the voxels inside `bounds`, leaving the rest untouched
    pub fn set_volume_data(
        &mut self,
        bounds: &BoundingBox,
        values: &[f32],
    ) -> Result<(), SegmentError> {
        bounds.check_within(self.dims())?;
        if values.len() != bounds.len() {
            return Err(SegmentError::ShapeMismatch {
                expected: bounds.len(),
                actual: values.len(),
            });
        }
        for (voxel, &value) in bounds.voxels().zip(values) {
            self.data[voxel] = value;
        }
        Ok(())
    }

    /// Save as an 8-bit label image sharing this volume's geometry
    pub fn save_mask<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let _span = tracing::debug_span!("save_mask").entered();

        let mut header = (*self.header).clone();
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;

        let labels = self.data.mapv(|v| v.round().clamp(0.0, 255.0) as u8);
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&labels)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("Saved segmentation to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_volume(dims: [usize; 3]) -> Volume {
    let data = Array3::from_shape_fn((dims[0], dims[1], dims[2]), |(x, y, z)| {
        (x + dims[0] * (y + dims[1] * z)) as f32
    });
    let mut header = NiftiHeader::default();
    header.pixdim = [1.0; 8];
    Volume::from_parts(header, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_requires_one_pinned_axis() {
        assert!(BoundingBox::new([0, 5, 0], [9, 5, 9]).is_ok());
        assert!(BoundingBox::new([0, 0, 0], [9, 9, 9]).is_err());
        assert!(BoundingBox::new([3, 3, 0], [3, 3, 9]).is_err());
        assert!(BoundingBox::new([4, 0, 0], [3, 9, 9]).is_err());
    }

    #[test]
    fn pinned_box_allows_other_single_voxel_axes() {
        let bounds = BoundingBox::pinned(2, [0, 0, 1], [0, 3, 1]).unwrap();
        assert_eq!(bounds.pinned_axis(), 2);
        assert_eq!(bounds.extents(), [1, 4, 1]);
        assert!(BoundingBox::pinned(1, [0, 0, 1], [0, 3, 1]).is_err());
        assert!(BoundingBox::pinned(3, [0, 0, 1], [0, 3, 1]).is_err());
    }

    #[test]
    fn qform_only_header_gives_lia_affine() {
        let mut volume = test_volume([4, 4, 4]);
        let header = &mut volume.header;
        header.sform_code = 0;
        header.qform_code = 1;
        // qfac -1 makes the LIA frame reachable from a proper rotation
        header.pixdim = [-1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        header.quatern_b = 0.0;
        header.quatern_c = std::f32::consts::FRAC_1_SQRT_2;
        header.quatern_d = -std::f32::consts::FRAC_1_SQRT_2;
        header.quatern_x = 10.0;
        header.quatern_y = -20.0;
        header.quatern_z = 30.0;

        let affine = volume.affine();
        let expected = [
            [-2.0, 0.0, 0.0, 10.0],
            [0.0, 0.0, 2.0, -20.0],
            [0.0, -2.0, 0.0, 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        for (row, want) in affine.iter().zip(expected) {
            for (got, want) in row.iter().zip(want) {
                assert!((got - want).abs() < 1e-3, "{affine:?}");
            }
        }
        assert_eq!(conform::perm_ras(&affine), [-1, 3, -2]);
    }

    #[test]
    fn read_follows_x_fastest_order() {
        let volume = test_volume([3, 4, 5]);
        let bounds = BoundingBox::new([0, 0, 2], [2, 3, 2]).unwrap();
        let (values, extents) = volume.get_volume_data(&bounds).unwrap();

        assert_eq!(extents, [3, 4, 1]);
        let expected: Vec<f32> = (24..36).map(|v| v as f32).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn write_touches_only_the_box() {
        let mut volume = test_volume([4, 4, 4]).empty_like();
        let bounds = BoundingBox::new([0, 2, 0], [3, 2, 3]).unwrap();
        volume.set_volume_data(&bounds, &[1.0; 16]).unwrap();

        for ((_, y, _), &v) in volume.data().indexed_iter() {
            assert_eq!(v, if y == 2 { 1.0 } else { 0.0 });
        }
    }

    #[test]
    fn write_rejects_wrong_length() {
        let mut volume = test_volume([4, 4, 4]);
        let bounds = BoundingBox::new([0, 0, 1], [3, 3, 1]).unwrap();
        assert_eq!(
            volume.set_volume_data(&bounds, &[0.0; 3]),
            Err(SegmentError::ShapeMismatch {
                expected: 16,
                actual: 3
            })
        );
    }

    #[test]
    fn box_outside_volume_is_rejected() {
        let volume = test_volume([4, 4, 4]);
        let bounds = BoundingBox::new([0, 0, 4], [3, 3, 4]).unwrap();
        assert!(matches!(
            volume.get_volume_data(&bounds),
            Err(SegmentError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn mask_survives_save_and_reload() {
        let mut mask = test_volume([6, 5, 4]).empty_like();
        let bounds = BoundingBox::new([0, 0, 3], [5, 4, 3]).unwrap();
        let values: Vec<f32> = (0..30).map(|i| (i % 2) as f32).collect();
        mask.set_volume_data(&bounds, &values).unwrap();

        let path = std::env::temp_dir().join(format!("scribseg-mask-{}.nii", std::process::id()));
        mask.save_mask(&path).unwrap();
        let reloaded = Volume::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.dims(), [6, 5, 4]);
        assert_eq!(reloaded.get_volume_data(&bounds).unwrap().0, values);
    }
}
