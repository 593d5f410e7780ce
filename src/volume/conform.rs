use super::{Affine, Volume};
use anyhow::{bail, Result};
use ndarray::Array3;

/// Voxels per side of a conformed grid
pub const CONFORMED_DIM: usize = 256;

/// Signed voxel axis (1-based) followed by the R, A and S world axes in a
/// conformed (LIA) volume
pub const CONFORMED_PERM_RAS: [i32; 3] = [-1, 3, -2];

/// For each world axis R, A, S: the voxel axis most aligned with it, 1-based
/// and signed by direction
pub fn perm_ras(affine: &Affine) -> [i32; 3] {
    let mut perm = [0; 3];
    for (world, slot) in perm.iter_mut().enumerate() {
        let row = &affine[world];
        let mut best = 0;
        for voxel in 1..3 {
            if row[voxel].abs() > row[best].abs() {
                best = voxel;
            }
        }
        let sign = if row[best] < 0.0 { -1 } else { 1 };
        *slot = sign * (best as i32 + 1);
    }
    perm
}

/// True when the volume sits on the canonical 256³ LIA grid
pub fn is_conformed(volume: &Volume) -> bool {
    volume.dims() == [CONFORMED_DIM; 3] && perm_ras(&volume.affine()) == CONFORMED_PERM_RAS
}

/// Resample onto a 256³, 1 mm, LIA grid centred on the source volume
///
/// Uses trilinear interpolation. Samples falling outside the source are 0.
pub fn conform(volume: &Volume) -> Result<Volume> {
    let _span = tracing::debug_span!("conform").entered();
    tracing::info!("Conforming {:?} volume to {}³ LIA", volume.dims(), CONFORMED_DIM);

    let source = volume.affine();
    let Some(inverse) = invert3(&source) else {
        bail!("volume affine is singular, cannot conform");
    };
    let dims = volume.dims();

    // Source centre in world space
    let centre_voxel = dims.map(|d| (d as f64 - 1.0) / 2.0);
    let centre = apply(&source, centre_voxel);

    // LIA: +i -> -R, +j -> -S, +k -> +A
    let half = CONFORMED_DIM as f64 / 2.0;
    let target: Affine = [
        [-1.0, 0.0, 0.0, centre[0] + half],
        [0.0, 0.0, 1.0, centre[1] - half],
        [0.0, -1.0, 0.0, centre[2] + half],
        [0.0, 0.0, 0.0, 1.0],
    ];

    let data = volume.data();
    let n = CONFORMED_DIM;
    let resampled = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
        let world = apply(&target, [i as f64, j as f64, k as f64]);
        let shifted = [
            world[0] - source[0][3],
            world[1] - source[1][3],
            world[2] - source[2][3],
        ];
        let p = mul3(&inverse, shifted);
        trilinear(&data, dims, p)
    });

    let mut header = volume.header().clone();
    header.pixdim = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    header.sform_code = 1;
    header.qform_code = 0;
    header.srow_x = target[0].map(|v| v as f32);
    header.srow_y = target[1].map(|v| v as f32);
    header.srow_z = target[2].map(|v| v as f32);

    let mut conformed = Volume::from_parts(header, resampled);
    conformed.opacity = volume.opacity;
    conformed.colormap = volume.colormap;
    Ok(conformed)
}

fn apply(affine: &Affine, v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|r| {
        affine[r][0] * v[0] + affine[r][1] * v[1] + affine[r][2] * v[2] + affine[r][3]
    })
}

fn mul3(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|r| m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2])
}

/// Inverse of the linear part of an affine
fn invert3(a: &Affine) -> Option<[[f64; 3]; 3]> {
    let m = |r: usize, c: usize| a[r][c];
    let det = m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
        - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
        + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0));
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [
            (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1)) * inv,
            (m(0, 2) * m(2, 1) - m(0, 1) * m(2, 2)) * inv,
            (m(0, 1) * m(1, 2) - m(0, 2) * m(1, 1)) * inv,
        ],
        [
            (m(1, 2) * m(2, 0) - m(1, 0) * m(2, 2)) * inv,
            (m(0, 0) * m(2, 2) - m(0, 2) * m(2, 0)) * inv,
            (m(0, 2) * m(1, 0) - m(0, 0) * m(1, 2)) * inv,
        ],
        [
            (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0)) * inv,
            (m(0, 1) * m(2, 0) - m(0, 0) * m(2, 1)) * inv,
            (m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0)) * inv,
        ],
    ])
}

fn trilinear(data: &ndarray::ArrayView3<'_, f32>, dims: [usize; 3], p: [f64; 3]) -> f32 {
    let mut base = [0usize; 3];
    let mut frac = [0f64; 3];
    for axis in 0..3 {
        // Allow half a voxel of slack so edge voxels are not lost to rounding
        if p[axis] < -0.5 || p[axis] > dims[axis] as f64 - 0.5 {
            return 0.0;
        }
        let clamped = p[axis].clamp(0.0, (dims[axis] - 1) as f64);
        let floor = clamped.floor();
        base[axis] = floor as usize;
        frac[axis] = clamped - floor;
    }

    let mut acc = 0.0;
    for corner in 0..8 {
        let mut weight = 1.0;
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let upper = corner >> axis & 1 == 1;
            idx[axis] = if upper {
                (base[axis] + 1).min(dims[axis] - 1)
            } else {
                base[axis]
            };
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
        }
        if weight > 0.0 {
            acc += weight * f64::from(data[idx]);
        }
    }
    acc as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::test_volume;

    #[test]
    fn identity_affine_is_ras() {
        let volume = test_volume([4, 4, 4]);
        assert_eq!(perm_ras(&volume.affine()), [1, 2, 3]);
        assert!(!is_conformed(&volume));
    }

    #[test]
    fn conformed_grid_is_lia() {
        let volume = test_volume([8, 6, 4]);
        let conformed = conform(&volume).unwrap();

        assert_eq!(conformed.dims(), [256, 256, 256]);
        assert_eq!(perm_ras(&conformed.affine()), CONFORMED_PERM_RAS);
        assert!(is_conformed(&conformed));
    }

    #[test]
    fn conform_keeps_the_centre_voxel() {
        let mut volume = test_volume([5, 5, 5]);
        volume.data_mut().fill(0.0);
        volume.data_mut()[[2, 2, 2]] = 7.0;

        let conformed = conform(&volume).unwrap();
        // Source centre (2,2,2) lands on target voxel 128 along every axis.
        assert_eq!(conformed.data()[[128, 128, 128]], 7.0);
        assert_eq!(conformed.data()[[0, 0, 0]], 0.0);
    }

    #[test]
    fn singular_affine_is_rejected() {
        let mut volume = test_volume([4, 4, 4]);
        let mut header = volume.header().clone();
        header.sform_code = 1;
        header.srow_x = [0.0; 4];
        header.srow_y = [0.0, 1.0, 0.0, 0.0];
        header.srow_z = [0.0, 0.0, 1.0, 0.0];
        volume = Volume::from_parts(header, volume.data().to_owned());
        assert!(conform(&volume).is_err());
    }
}
