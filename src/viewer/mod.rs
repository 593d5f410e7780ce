mod drawing;
mod scene;

pub use drawing::{Drawing, DEFAULT_MAX_UNDO};
pub use scene::{Layer, Scene};

use crate::volume::Volume;

/// Index of the background scan in the volume list
pub const BACKGROUND: usize = 0;

/// Index of the segmentation overlay in the volume list
pub const OVERLAY: usize = 1;

/// Where the pointer rests: a voxel of the background grid and the canvas
/// tile it is over (0 axial, 1 coronal, 2 sagittal, anything else is not a
/// 2D view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pointer {
    pub voxel: [i64; 3],
    pub tile: i32,
}

/// Trait for volume renderers
///
/// The segmentation workflow only needs volume access, the freehand drawing
/// buffer, the pointer, and a way to request a repaint. A GPU-backed viewer
/// and the headless [`Scene`] both fit behind it.
pub trait Viewer {
    fn volume_count(&self) -> usize;

    fn volume(&self, index: usize) -> Option<&Volume>;

    fn volume_mut(&mut self, index: usize) -> Option<&mut Volume>;

    fn add_volume(&mut self, volume: Volume);

    fn remove_volume(&mut self, index: usize) -> Option<Volume>;

    /// Current freehand drawing, if one exists
    fn drawing(&self) -> Option<&Drawing>;

    /// Start a fresh drawing sized to the background volume
    fn create_empty_drawing(&mut self);

    fn close_drawing(&mut self);

    fn set_drawing_enabled(&mut self, enabled: bool);

    fn pointer(&self) -> Pointer;

    /// Request a repaint after volume data changed
    fn update(&mut self);
}
