use crate::error::SegmentError;

/// Probability at or above which a pixel is foreground
pub const THRESHOLD: f32 = 0.5;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Binarize one logit: 1 when its probability reaches [`THRESHOLD`]
///
/// NaN logits count as background.
pub fn threshold(logit: f32) -> f32 {
    if sigmoid(logit) >= THRESHOLD {
        1.0
    } else {
        0.0
    }
}

/// Turn raw logits into the final {0, 1} mask
///
/// Every pixel marked in `clicks` stays foreground whatever the model said.
pub fn fuse_prediction(logits: &[f32], clicks: &[f32]) -> Result<Vec<f32>, SegmentError> {
    let _span = tracing::debug_span!("postprocess").entered();

    if logits.len() != clicks.len() {
        return Err(SegmentError::ShapeMismatch {
            expected: clicks.len(),
            actual: logits.len(),
        });
    }

    Ok(logits
        .iter()
        .zip(clicks)
        .map(|(&logit, &click)| if click == 1.0 { 1.0 } else { threshold(logit) })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_slice() -> Vec<f32> {
        (0..16).map(|v| v as f32).collect()
    }

    #[test]
    fn negative_logits_without_marks_give_empty_mask() {
        let image = ramp_slice();
        let logits: Vec<f32> = image.iter().map(|v| -1.0 - v).collect();
        let clicks = vec![0.0; 16];

        let mask = fuse_prediction(&logits, &clicks).unwrap();
        assert!(mask.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn marked_pixel_survives_any_logit() {
        let mut clicks = vec![0.0; 16];
        // (row 2, col 2) of a 4x4 slice
        clicks[2 * 4 + 2] = 1.0;

        for logit in [-1e6, -3.0, 0.0, 5.0] {
            let mask = fuse_prediction(&[logit; 16], &clicks).unwrap();
            assert_eq!(mask[10], 1.0);
        }
        let mask = fuse_prediction(&[-4.0; 16], &clicks).unwrap();
        assert_eq!(mask.iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn threshold_is_monotonic() {
        let logits: Vec<f32> = (-400..=400).map(|v| v as f32 / 40.0).collect();
        for pair in logits.windows(2) {
            assert!(threshold(pair[0]) <= threshold(pair[1]));
        }
        assert_eq!(threshold(-0.01), 0.0);
        assert_eq!(threshold(0.0), 1.0);
    }

    #[test]
    fn nan_logit_is_background() {
        assert_eq!(threshold(f32::NAN), 0.0);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(fuse_prediction(&[0.0; 4], &[0.0; 3]).is_err());
    }
}
