use thiserror::Error;

/// Failures that abort a segmentation request
///
/// Every variant leaves the overlay as it was before the request started
/// and the session idle again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("no image loaded, open a voxel-based image first")]
    NoImage,

    #[error("no segmentation overlay, conform the image first")]
    NoOverlay,

    #[error("tile {0} is not an axial, coronal or sagittal view")]
    UnknownPlane(i32),

    #[error("bounding box {start:?}..={end:?} does not select exactly one slice")]
    InvalidBoundingBox { start: [usize; 3], end: [usize; 3] },

    #[error("voxel {voxel:?} lies outside a volume of {dims:?}")]
    OutOfBounds { voxel: [i64; 3], dims: [usize; 3] },

    #[error("expected {expected} values, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("a segmentation is already running")]
    Busy,
}
