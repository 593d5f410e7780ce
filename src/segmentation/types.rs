use crate::error::SegmentError;
use anyhow::Result;
use ndarray::Array4;
use std::fmt;
use std::str::FromStr;

/// Canonical 2D viewing planes, numbered like the viewer's canvas tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    Axial,
    Coronal,
    Sagittal,
}

impl Plane {
    /// Canvas tile showing this plane
    pub fn tile(self) -> i32 {
        match self {
            Plane::Axial => 0,
            Plane::Coronal => 1,
            Plane::Sagittal => 2,
        }
    }

    /// Voxel axis held fixed by a slice in this plane
    pub fn pinned_axis(self) -> usize {
        match self {
            Plane::Axial => 2,
            Plane::Coronal => 1,
            Plane::Sagittal => 0,
        }
    }
}

impl TryFrom<i32> for Plane {
    type Error = SegmentError;

    fn try_from(tile: i32) -> Result<Self, Self::Error> {
        match tile {
            0 => Ok(Plane::Axial),
            1 => Ok(Plane::Coronal),
            2 => Ok(Plane::Sagittal),
            other => Err(SegmentError::UnknownPlane(other)),
        }
    }
}

impl FromStr for Plane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "axial" | "ax" => Ok(Plane::Axial),
            "coronal" | "cor" => Ok(Plane::Coronal),
            "sagittal" | "sag" => Ok(Plane::Sagittal),
            other => Err(format!("unknown plane '{other}'")),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::Axial => write!(f, "axial"),
            Plane::Coronal => write!(f, "coronal"),
            Plane::Sagittal => write!(f, "sagittal"),
        }
    }
}

/// Flattened 2D slice with its (width, height)
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

/// Trait for scribble-prompted segmentation networks
/// Allows swapping the ONNX Runtime backend for another engine or a stub
pub trait SegmentationModel {
    /// Run the network on a `[1, 5, H, W]` input
    ///
    /// # Returns
    /// * Raw logits shaped `[1, 1, H, W]`
    fn predict(&mut self, input: Array4<f32>) -> Result<Array4<f32>>;

    /// Short name for logs
    fn name(&self) -> &str {
        "model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_map_to_planes() {
        for plane in [Plane::Axial, Plane::Coronal, Plane::Sagittal] {
            assert_eq!(Plane::try_from(plane.tile()), Ok(plane));
        }
    }

    #[test]
    fn render_tile_is_not_a_plane() {
        assert_eq!(Plane::try_from(3), Err(SegmentError::UnknownPlane(3)));
        assert_eq!(Plane::try_from(-1), Err(SegmentError::UnknownPlane(-1)));
    }

    #[test]
    fn plane_names_parse() {
        assert_eq!("Coronal".parse::<Plane>(), Ok(Plane::Coronal));
        assert_eq!("sag".parse::<Plane>(), Ok(Plane::Sagittal));
        assert!("oblique".parse::<Plane>().is_err());
    }
}
