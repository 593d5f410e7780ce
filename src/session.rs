use crate::error::SegmentError;
use crate::segmentation::{
    assemble_input, binarize, extract_slice, fuse_prediction, normalize, slice_bounds, Plane,
    SegmentationModel,
};
use crate::viewer::{Viewer, BACKGROUND, OVERLAY};
use crate::volume::{self, BoundingBox, Colormap, Volume};
use anyhow::{Context, Result};
use ndarray::{Array3, Zip};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Overlay opacity for an image that was already conformed
pub const OVERLAY_OPACITY: f32 = 0.8;

/// Overlay opacity after an explicit conform
pub const CONFORMED_OVERLAY_OPACITY: f32 = 0.5;

/// What to do when a freshly loaded image is not on the conformed grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConformPolicy {
    Always,
    Never,
    Ask,
}

/// Trait for user dialogs
pub trait Prompt {
    /// Ask a yes/no question
    fn confirm(&mut self, question: &str) -> bool;

    /// Show a message that needs no answer
    fn alert(&mut self, message: &str);
}

/// Shared "segmentation in flight" flag
///
/// Clones observe the same flag, so a frontend can disable its controls or
/// reject input while a request runs.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// Mark the session busy, or fail if it already is
    pub fn try_acquire(&self) -> Result<BusyGuard, SegmentError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SegmentError::Busy)?;
        tracing::info!("Segmentation running");
        Ok(BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when dropped, on success and failure alike
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        tracing::info!("Segmentation idle");
    }
}

/// Image loading and overlay lifecycle
#[derive(Debug, Clone)]
pub struct Workspace {
    policy: ConformPolicy,
}

impl Workspace {
    pub fn new(policy: ConformPolicy) -> Self {
        Self { policy }
    }

    /// Open `path` as the new background scan
    pub fn load_background<V: Viewer>(
        &self,
        viewer: &mut V,
        path: &Path,
        prompt: &mut dyn Prompt,
    ) -> Result<()> {
        let volume = Volume::open(path)?;
        self.replace_background(viewer, volume, prompt)
    }

    /// Drop every loaded volume and the drawing, then show `volume`
    pub fn replace_background<V: Viewer>(
        &self,
        viewer: &mut V,
        volume: Volume,
        prompt: &mut dyn Prompt,
    ) -> Result<()> {
        while viewer.remove_volume(0).is_some() {}
        viewer.close_drawing();
        viewer.add_volume(volume);
        self.on_image_loaded(viewer, prompt)
    }

    fn on_image_loaded<V: Viewer>(&self, viewer: &mut V, prompt: &mut dyn Prompt) -> Result<()> {
        if viewer.volume_count() > 1 {
            return Ok(());
        }
        let background = viewer.volume(BACKGROUND).ok_or(SegmentError::NoImage)?;

        if volume::is_conformed(background) {
            add_overlay(viewer, OVERLAY_OPACITY)?;
        } else {
            let dims = background.dims();
            let conform = match self.policy {
                ConformPolicy::Always => true,
                ConformPolicy::Never => false,
                ConformPolicy::Ask => prompt.confirm(&format!(
                    "The input image ({}x{}x{}) is not a conformed 256³ volume. \
                     Would you like to conform the image?",
                    dims[0], dims[1], dims[2]
                )),
            };
            if conform {
                self.conform_background(viewer)?;
            } else {
                tracing::warn!("Image left unconformed, segmentation may be unreliable");
                prompt.alert(
                    "Please conform the image before proceeding. \
                     The segmentation will not work correctly.",
                );
                add_overlay(viewer, OVERLAY_OPACITY)?;
            }
        }

        viewer.set_drawing_enabled(true);
        Ok(())
    }

    /// Resample the background onto the conformed grid and start a fresh
    /// overlay and drawing on it
    pub fn conform_background<V: Viewer>(&self, viewer: &mut V) -> Result<()> {
        if viewer.volume_count() == 0 {
            return Err(SegmentError::NoImage.into());
        }
        while viewer.volume_count() > 1 {
            viewer.remove_volume(OVERLAY);
        }
        ensure_conformed(viewer)?;
        viewer.close_drawing();
        viewer.create_empty_drawing();
        add_overlay(viewer, CONFORMED_OVERLAY_OPACITY)
    }
}

fn ensure_conformed<V: Viewer>(viewer: &mut V) -> Result<()> {
    let background = viewer.volume(BACKGROUND).ok_or(SegmentError::NoImage)?;
    if volume::is_conformed(background) {
        return Ok(());
    }
    let conformed = volume::conform(background).context("Failed to conform image")?;
    viewer.remove_volume(BACKGROUND);
    viewer.add_volume(conformed);
    Ok(())
}

fn add_overlay<V: Viewer>(viewer: &mut V, opacity: f32) -> Result<()> {
    let background = viewer.volume(BACKGROUND).ok_or(SegmentError::NoImage)?;
    let mut overlay = background.empty_like();
    overlay.opacity = opacity;
    viewer.add_volume(overlay);
    Ok(())
}

/// Result of one segmentation request
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// No scribble was drawn, nothing changed
    NothingDrawn,
    Segmented {
        plane: Plane,
        bounds: BoundingBox,
        /// Foreground pixels in the written slice
        foreground: usize,
    },
}

/// Runs segmentation requests against a viewer
///
/// Holds the loaded model and the busy flag. Only one request runs at a
/// time.
pub struct Segmenter<M> {
    model: M,
    busy: BusyFlag,
}

impl<M: SegmentationModel> Segmenter<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            busy: BusyFlag::default(),
        }
    }

    /// Handle on the flag guarding this segmenter
    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    /// Segment the slice under the pointer from the current scribble
    ///
    /// The slice is written into the overlay, the viewer is repainted and the
    /// drawing is reset. Nothing happens when no scribble is drawn.
    pub fn segment<V: Viewer>(&mut self, viewer: &mut V) -> Result<SegmentOutcome> {
        let _busy = self.busy.try_acquire()?;
        let _span = tracing::info_span!("segment").entered();

        let background = viewer.volume(BACKGROUND).ok_or(SegmentError::NoImage)?;
        if viewer.volume_count() <= OVERLAY {
            return Err(SegmentError::NoOverlay.into());
        }

        let pointer = viewer.pointer();
        let plane = Plane::try_from(pointer.tile)?;
        let bounds = slice_bounds(plane, pointer.voxel, background.dims())?;
        let mut image = extract_slice(background, &bounds, plane)?;

        let (marks, drawn) = match viewer.drawing() {
            Some(drawing) if drawing.has_marks() => {
                (drawing.bitmap().clone(), drawing.slice_values(&bounds))
            }
            _ => {
                tracing::info!("Nothing drawn, skipping segmentation");
                return Ok(SegmentOutcome::NothingDrawn);
            }
        };

        // The overlay is only written once the model has answered.
        let overlay = viewer.volume(OVERLAY).ok_or(SegmentError::NoOverlay)?;
        check_grid(overlay, &marks)?;
        let mut clicks = extract_slice(overlay, &bounds, plane)?;
        for (click, &mark) in clicks.data.iter_mut().zip(&drawn) {
            *click = if mark > 0 || *click == 1.0 { 1.0 } else { 0.0 };
        }
        binarize(&mut clicks.data);
        normalize(&mut image.data);

        let input = assemble_input(&image.data, &clicks.data, image.width, image.height)?;
        let logits = self
            .model
            .predict(input)
            .with_context(|| format!("{} inference failed", self.model.name()))?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        let mask = fuse_prediction(&logits, &clicks.data)?;

        let overlay = viewer.volume_mut(OVERLAY).ok_or(SegmentError::NoOverlay)?;
        merge_marks(overlay, &marks);
        overlay.set_volume_data(&bounds, &mask)?;
        overlay.colormap = Colormap::Red;
        viewer.update();
        viewer.close_drawing();
        viewer.create_empty_drawing();

        let foreground = mask.iter().filter(|&&v| v > 0.0).count();
        tracing::info!(
            "Segmented {} slice {:?}..={:?}: {} foreground pixels",
            plane,
            bounds.start,
            bounds.end,
            foreground
        );
        Ok(SegmentOutcome::Segmented {
            plane,
            bounds,
            foreground,
        })
    }
}

fn check_grid(overlay: &Volume, marks: &Array3<u8>) -> Result<(), SegmentError> {
    let (x, y, z) = marks.dim();
    if overlay.dims() != [x, y, z] {
        return Err(SegmentError::ShapeMismatch {
            expected: overlay.dims().iter().product(),
            actual: marks.len(),
        });
    }
    Ok(())
}

/// Burn drawing marks into the overlay, leaving it strictly binary
///
/// `marks` must be on the overlay grid, see `check_grid`.
fn merge_marks(overlay: &mut Volume, marks: &Array3<u8>) {
    Zip::from(overlay.data_mut())
        .and(marks)
        .for_each(|voxel, &mark| {
            *voxel = if mark > 0 || *voxel == 1.0 { 1.0 } else { 0.0 };
        });
}
