use crate::error::SegmentError;
use crate::volume::BoundingBox;
use ndarray::Array3;
use std::collections::VecDeque;

/// Undo depth kept for freehand strokes
pub const DEFAULT_MAX_UNDO: usize = 30;

/// Freehand drawing bitmap covering the background grid
///
/// Each voxel holds the pen value that last painted it, 0 when untouched.
#[derive(Debug, Clone)]
pub struct Drawing {
    bitmap: Array3<u8>,
    undo: VecDeque<Array3<u8>>,
    max_undo: usize,
}

impl Drawing {
    pub fn new(dims: [usize; 3], max_undo: usize) -> Self {
        Self {
            bitmap: Array3::zeros((dims[0], dims[1], dims[2])),
            undo: VecDeque::new(),
            max_undo,
        }
    }

    /// Replace the bitmap wholesale, e.g. from a saved scribble volume
    pub fn from_bitmap(bitmap: Array3<u8>, max_undo: usize) -> Self {
        Self {
            bitmap,
            undo: VecDeque::new(),
            max_undo,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        let (x, y, z) = self.bitmap.dim();
        [x, y, z]
    }

    pub fn bitmap(&self) -> &Array3<u8> {
        &self.bitmap
    }

    /// Snapshot the bitmap so the coming stroke can be undone
    pub fn begin_stroke(&mut self) {
        if self.max_undo == 0 {
            return;
        }
        if self.undo.len() == self.max_undo {
            self.undo.pop_front();
        }
        self.undo.push_back(self.bitmap.clone());
    }

    pub fn paint(&mut self, voxel: [i64; 3], pen: u8) -> Result<(), SegmentError> {
        let dims = self.dims();
        let inside = (0..3).all(|axis| voxel[axis] >= 0 && (voxel[axis] as usize) < dims[axis]);
        if !inside {
            return Err(SegmentError::OutOfBounds { voxel, dims });
        }
        self.bitmap[voxel.map(|v| v as usize)] = pen;
        Ok(())
    }

    /// Restore the bitmap from before the last stroke
    ///
    /// Returns false when there is nothing left to undo.
    pub fn undo(&mut self) -> bool {
        match self.undo.pop_back() {
            Some(previous) => {
                self.bitmap = previous;
                true
            }
            None => false,
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn has_marks(&self) -> bool {
        self.bitmap.iter().any(|&v| v > 0)
    }

    /// Pen values inside `bounds`, flattened like `Volume::get_volume_data`
    pub fn slice_values(&self, bounds: &BoundingBox) -> Vec<u8> {
        bounds
            .voxels()
            .map(|v| self.bitmap.get(v).copied().unwrap_or(0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_restores_previous_stroke() {
        let mut drawing = Drawing::new([4, 4, 4], DEFAULT_MAX_UNDO);
        drawing.begin_stroke();
        drawing.paint([1, 1, 1], 2).unwrap();
        drawing.begin_stroke();
        drawing.paint([2, 2, 2], 2).unwrap();

        assert!(drawing.undo());
        assert_eq!(drawing.bitmap()[[1, 1, 1]], 2);
        assert_eq!(drawing.bitmap()[[2, 2, 2]], 0);

        assert!(drawing.undo());
        assert!(!drawing.has_marks());
        assert!(!drawing.undo());
    }

    #[test]
    fn undo_depth_is_bounded() {
        let mut drawing = Drawing::new([2, 2, 2], 3);
        for _ in 0..5 {
            drawing.begin_stroke();
        }
        assert_eq!(drawing.undo_depth(), 3);
    }

    #[test]
    fn painting_outside_is_rejected() {
        let mut drawing = Drawing::new([2, 2, 2], DEFAULT_MAX_UNDO);
        assert!(drawing.paint([-1, 0, 0], 1).is_err());
        assert!(drawing.paint([0, 2, 0], 1).is_err());
        assert!(!drawing.has_marks());
    }
}
