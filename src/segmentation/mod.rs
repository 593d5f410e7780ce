mod postprocess;
mod preprocess;
mod scribble_prompt;
mod slice;
pub mod types;

pub use postprocess::fuse_prediction;
pub use preprocess::{assemble_input, binarize, normalize};
pub use scribble_prompt::InferenceOptions;
pub use slice::{extract_slice, slice_bounds};
pub use types::{Plane, SegmentationModel};

use anyhow::Result;
use std::path::Path;

/// Create the default segmentation model (ScribblePrompt UNet)
pub fn create_default_model<P: AsRef<Path>>(
    model_path: P,
    options: &InferenceOptions,
) -> Result<Box<dyn SegmentationModel>> {
    let model = scribble_prompt::ScribblePromptUnet::new(model_path, options)?;
    Ok(Box::new(model))
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    fn predict(&mut self, input: ndarray::Array4<f32>) -> Result<ndarray::Array4<f32>> {
        (**self).predict(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
