use super::{Drawing, Pointer, Viewer, BACKGROUND, DEFAULT_MAX_UNDO, OVERLAY};
use crate::error::SegmentError;
use crate::segmentation::{slice_bounds, Plane};
use crate::volume::{Colormap, Volume};
use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::str::FromStr;

/// Clip plane (depth, azimuth, elevation) shown while clipping is on
const CLIP_ON: [f32; 3] = [0.0, 0.0, 90.0];
/// A depth of 2 puts the plane outside the volume
const CLIP_OFF: [f32; 3] = [2.0, 0.0, 90.0];

/// Layers with their own opacity slider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Background,
    Overlay,
    Drawing,
}

impl FromStr for Layer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "background" | "back" => Ok(Self::Background),
            "overlay" => Ok(Self::Overlay),
            "drawing" | "draw" => Ok(Self::Drawing),
            other => bail!("unknown layer '{other}'"),
        }
    }
}

/// Headless renderer
///
/// Owns the volumes, the drawing and the display state a GPU viewer would
/// hold. "Repainting" only counts frames. [`Scene::render_preview`] writes
/// the slice under the pointer to a PNG.
#[derive(Debug)]
pub struct Scene {
    volumes: Vec<Volume>,
    drawing: Option<Drawing>,
    drawing_enabled: bool,
    max_undo: usize,
    pen: u8,
    draw_opacity: f32,
    clip_plane: [f32; 3],
    pointer: Pointer,
    frames: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO)
    }
}

impl Scene {
    pub fn new(max_undo: usize) -> Self {
        Self {
            volumes: Vec::new(),
            drawing: None,
            drawing_enabled: false,
            max_undo,
            pen: 2,
            draw_opacity: 1.0,
            clip_plane: CLIP_OFF,
            pointer: Pointer::default(),
            frames: 0,
        }
    }

    pub fn set_pointer(&mut self, pointer: Pointer) {
        self.pointer = pointer;
    }

    pub fn set_pen(&mut self, pen: u8) {
        self.pen = pen;
    }

    pub fn pen(&self) -> u8 {
        self.pen
    }

    pub fn drawing_enabled(&self) -> bool {
        self.drawing_enabled
    }

    /// Paint one stroke with the current pen
    ///
    /// The stroke is recorded for undo. If any voxel is out of range the
    /// whole stroke is rolled back.
    pub fn paint_stroke(&mut self, voxels: &[[i64; 3]]) -> Result<()> {
        if !self.drawing_enabled {
            bail!("drawing is disabled, load an image first");
        }
        let pen = self.pen;
        let Some(drawing) = self.drawing.as_mut() else {
            bail!("no drawing to paint on");
        };

        drawing.begin_stroke();
        for &voxel in voxels {
            if let Err(err) = drawing.paint(voxel, pen) {
                drawing.undo();
                return Err(err.into());
            }
        }
        tracing::debug!("Painted {} voxels with pen {}", voxels.len(), pen);
        Ok(())
    }

    /// Undo the last stroke, returning false when there is none
    pub fn undo(&mut self) -> bool {
        let undone = self.drawing.as_mut().is_some_and(Drawing::undo);
        if undone {
            self.frames += 1;
        }
        undone
    }

    /// Replace the drawing with the non-zero voxels of `scribble`
    pub fn load_drawing(&mut self, scribble: &Volume) -> Result<()> {
        let background = self.volumes.get(BACKGROUND).ok_or(SegmentError::NoImage)?;
        if scribble.dims() != background.dims() {
            bail!(
                "scribble grid {:?} does not match image grid {:?}",
                scribble.dims(),
                background.dims()
            );
        }
        let pen = self.pen;
        let bitmap = scribble.data().mapv(|v| if v > 0.0 { pen } else { 0 });
        self.drawing = Some(Drawing::from_bitmap(bitmap, self.max_undo));
        Ok(())
    }

    pub fn set_opacity(&mut self, layer: Layer, opacity: f32) -> Result<()> {
        let opacity = opacity.clamp(0.0, 1.0);
        match layer {
            Layer::Background => {
                self.volumes
                    .get_mut(BACKGROUND)
                    .ok_or(SegmentError::NoImage)?
                    .opacity = opacity;
            }
            Layer::Overlay => {
                self.volumes
                    .get_mut(OVERLAY)
                    .ok_or(SegmentError::NoOverlay)?
                    .opacity = opacity;
            }
            Layer::Drawing => self.draw_opacity = opacity,
        }
        self.frames += 1;
        Ok(())
    }

    pub fn set_clip(&mut self, enabled: bool) {
        self.clip_plane = if enabled { CLIP_ON } else { CLIP_OFF };
        self.frames += 1;
    }

    pub fn clip_plane(&self) -> [f32; 3] {
        self.clip_plane
    }

    /// Number of repaints requested so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write the 2D slice under the pointer as a PNG
    ///
    /// The background is shown in grayscale, the overlay in red, and drawing
    /// marks in their pen colour. Each layer is blended at its opacity.
    pub fn render_preview<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let _span = tracing::debug_span!("render_preview").entered();

        let background = self.volumes.get(BACKGROUND).ok_or(SegmentError::NoImage)?;
        let plane = Plane::try_from(self.pointer.tile)?;
        let bounds = slice_bounds(plane, self.pointer.voxel, background.dims())?;

        let extents = bounds.extents();
        let pinned = bounds.pinned_axis();
        let mut free = (0..3).filter(|&axis| axis != pinned).map(|axis| extents[axis]);
        let (width, height) = match (free.next(), free.next()) {
            (Some(w), Some(h)) => (w, h),
            _ => bail!("slice has fewer than two free axes"),
        };

        let (gray, _) = background.get_volume_data(&bounds)?;
        let (lo, hi) = gray
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = if hi > lo { hi - lo } else { 1.0 };

        let overlay = match self.volumes.get(OVERLAY) {
            Some(volume) => Some((volume.get_volume_data(&bounds)?.0, volume)),
            None => None,
        };
        let marks = self.drawing.as_ref().map(|d| d.slice_values(&bounds));

        let mut image = RgbImage::new(width as u32, height as u32);
        for (i, &value) in gray.iter().enumerate() {
            let (col, row) = (i % width, height - 1 - i / width);
            let level = if value.is_finite() {
                (value - lo) / range * background.opacity
            } else {
                0.0
            };
            let mut pixel = [level; 3];

            if let Some((values, volume)) = &overlay {
                if values[i] > 0.0 {
                    pixel = blend(pixel, colormap_rgb(volume.colormap), volume.opacity);
                }
            }
            if let Some(marks) = &marks {
                if marks[i] > 0 {
                    pixel = blend(pixel, pen_rgb(marks[i]), self.draw_opacity);
                }
            }
            let rgb = pixel.map(|c| (c * 255.0).clamp(0.0, 255.0) as u8);
            image.put_pixel(col as u32, row as u32, Rgb(rgb));
        }

        image
            .save(path)
            .with_context(|| format!("Failed to write preview {}", path.display()))?;

        tracing::info!("Wrote {} preview to {}", plane, path.display());
        Ok(())
    }
}

fn blend(under: [f32; 3], over: [f32; 3], alpha: f32) -> [f32; 3] {
    [0, 1, 2].map(|c| under[c] * (1.0 - alpha) + over[c] * alpha)
}

fn colormap_rgb(colormap: Colormap) -> [f32; 3] {
    match colormap {
        Colormap::Gray => [1.0, 1.0, 1.0],
        Colormap::Red => [1.0, 0.0, 0.0],
    }
}

fn pen_rgb(pen: u8) -> [f32; 3] {
    match pen {
        1 => [1.0, 0.0, 0.0],
        2 => [0.0, 1.0, 0.0],
        3 => [0.0, 0.0, 1.0],
        _ => [1.0, 1.0, 0.0],
    }
}

impl Viewer for Scene {
    fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn volume(&self, index: usize) -> Option<&Volume> {
        self.volumes.get(index)
    }

    fn volume_mut(&mut self, index: usize) -> Option<&mut Volume> {
        self.volumes.get_mut(index)
    }

    fn add_volume(&mut self, volume: Volume) {
        tracing::debug!("Adding volume {} ({:?})", self.volumes.len(), volume.dims());
        self.volumes.push(volume);
        self.frames += 1;
    }

    fn remove_volume(&mut self, index: usize) -> Option<Volume> {
        if index >= self.volumes.len() {
            return None;
        }
        self.frames += 1;
        Some(self.volumes.remove(index))
    }

    fn drawing(&self) -> Option<&Drawing> {
        self.drawing.as_ref()
    }

    fn create_empty_drawing(&mut self) {
        self.drawing = self
            .volumes
            .get(BACKGROUND)
            .map(|background| Drawing::new(background.dims(), self.max_undo));
    }

    fn close_drawing(&mut self) {
        self.drawing = None;
    }

    fn set_drawing_enabled(&mut self, enabled: bool) {
        self.drawing_enabled = enabled;
        if enabled && self.drawing.is_none() {
            self.create_empty_drawing();
        }
    }

    fn pointer(&self) -> Pointer {
        self.pointer
    }

    fn update(&mut self) {
        self.frames += 1;
        tracing::debug!("Repaint #{}", self.frames);
    }
}
