use crate::error::SegmentError;
use ndarray::{s, Array4, ArrayView2};

/// Number of planes in the network input: image, box, clicks, scribble, mask
pub const INPUT_CHANNELS: usize = 5;

/// Channel carrying the normalized intensities
pub const IMAGE_CHANNEL: usize = 0;

/// Channel carrying the binarized user marks
pub const CLICK_CHANNEL: usize = 2;

/// How [`normalize`] treated a slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// Rescaled from [min, max] onto [0, 1]
    Scaled { min: f32, max: f32 },
    /// Constant or empty slice, zeroed
    Constant,
}

/// Min/max rescale a slice onto [0, 1] in place
///
/// Non-finite values are ignored for the range and written as 0. A slice
/// with no spread has nothing to scale and comes back all zero.
pub fn normalize(values: &mut [f32]) -> Normalization {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if min >= max {
        tracing::warn!("Slice intensities are constant, image channel left at zero");
        values.fill(0.0);
        return Normalization::Constant;
    }

    let scale = 1.0 / (max - min);
    for v in values.iter_mut() {
        *v = if v.is_finite() {
            ((*v - min) * scale).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
    Normalization::Scaled { min, max }
}

/// Collapse pen values to a single marked bit: > 0 becomes 1, else 0
pub fn binarize(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = if *v > 0.0 { 1.0 } else { 0.0 };
    }
}

/// Pack image and clicks into the `[1, 5, H, W]` network input
///
/// Box, scribble and mask channels stay zero. The trained model expects
/// exactly this layout.
pub fn assemble_input(
    image: &[f32],
    clicks: &[f32],
    width: usize,
    height: usize,
) -> Result<Array4<f32>, SegmentError> {
    let _span = tracing::debug_span!("preprocess").entered();

    let expected = width * height;
    for plane in [image, clicks] {
        if plane.len() != expected {
            return Err(SegmentError::ShapeMismatch {
                expected,
                actual: plane.len(),
            });
        }
    }

    let mut tensor = Array4::<f32>::zeros((1, INPUT_CHANNELS, height, width));
    for (channel, plane) in [(IMAGE_CHANNEL, image), (CLICK_CHANNEL, clicks)] {
        let view = ArrayView2::from_shape((height, width), plane).map_err(|_| {
            SegmentError::ShapeMismatch {
                expected,
                actual: plane.len(),
            }
        })?;
        tensor.slice_mut(s![0, channel, .., ..]).assign(&view);
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_extremes_to_unit_range() {
        let mut values: Vec<f32> = vec![3.0, -2.0, 8.0, 0.5, 8.0];
        let result = normalize(&mut values);

        assert_eq!(result, Normalization::Scaled { min: -2.0, max: 8.0 });
        assert_eq!(values[1], 0.0);
        assert_eq!(values[2], 1.0);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn constant_slice_becomes_zero() {
        let mut values = vec![42.0; 16];
        assert_eq!(normalize(&mut values), Normalization::Constant);
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn non_finite_values_are_zeroed() {
        let mut values = vec![f32::NAN, 1.0, 3.0, f32::INFINITY];
        normalize(&mut values);
        assert_eq!(values, vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn binarize_is_idempotent() {
        let mut values = vec![0.0, 1.0, 2.0, 3.0, -1.0, 0.2];
        binarize(&mut values);
        let once = values.clone();
        binarize(&mut values);

        assert_eq!(once, vec![0.0, 1.0, 1.0, 1.0, 0.0, 1.0]);
        assert_eq!(values, once);
    }

    #[test]
    fn channels_are_packed_in_model_order() {
        let image: Vec<f32> = (0..6).map(|v| v as f32 / 5.0).collect();
        let clicks = vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let tensor = assemble_input(&image, &clicks, 3, 2).unwrap();

        assert_eq!(tensor.shape(), &[1, 5, 2, 3]);
        let flat: Vec<f32> = tensor.iter().copied().collect();
        assert_eq!(&flat[0..6], image.as_slice());
        assert!(flat[6..12].iter().all(|&v| v == 0.0));
        assert_eq!(&flat[12..18], clicks.as_slice());
        assert!(flat[18..30].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn mismatched_planes_are_rejected() {
        assert_eq!(
            assemble_input(&[0.0; 6], &[0.0; 5], 3, 2),
            Err(SegmentError::ShapeMismatch {
                expected: 6,
                actual: 5
            })
        );
    }
}
