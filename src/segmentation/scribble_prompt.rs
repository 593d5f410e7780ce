use super::preprocess::INPUT_CHANNELS;
use super::types::SegmentationModel;
use crate::error::SegmentError;
use anyhow::{ensure, Context, Result};
use ndarray::Array4;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::time::Instant;

/// Name of the network's single input tensor
const INPUT_NAME: &str = "input";
/// Name of the network's single output tensor
const OUTPUT_NAME: &str = "output";

/// Runtime knobs for the ONNX session
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// Skip GPU execution providers
    pub cpu_only: bool,
    pub intra_threads: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            cpu_only: false,
            intra_threads: 4,
        }
    }
}

/// ScribblePrompt UNet segmentation model
///
/// Takes a `[1, 5, H, W]` prompt tensor and returns `[1, 1, H, W]` logits.
/// The session is built once and reused for every request.
pub struct ScribblePromptUnet {
    session: Session,
}

impl ScribblePromptUnet {
    /// Load the network from an ONNX file
    ///
    /// # Default Configuration
    /// - Execution providers: TensorRT, then CUDA, then CPU
    /// - Graph optimization: disabled
    pub fn new<P: AsRef<Path>>(model_path: P, options: &InferenceOptions) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading ScribblePrompt model from {}", path.display());

        let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();
        if !options.cpu_only {
            providers.push(TensorRTExecutionProvider::default().build());
            providers.push(CUDAExecutionProvider::default().build());
        }
        providers.push(CPUExecutionProvider::default().build());

        let session = Session::builder()?
            .with_execution_providers(providers)?
            .with_optimization_level(GraphOptimizationLevel::Disable)?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("ScribblePrompt model loaded successfully");

        Ok(Self { session })
    }
}

impl SegmentationModel for ScribblePromptUnet {
    fn predict(&mut self, input: Array4<f32>) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("scribble_prompt_predict").entered();

        let (batch, channels, height, width) = input.dim();
        ensure!(
            batch == 1 && channels == INPUT_CHANNELS,
            "expected input [1, {INPUT_CHANNELS}, H, W], got [{batch}, {channels}, {height}, {width}]"
        );

        let shape = [batch, channels, height, width];
        let tensor = Tensor::from_array((shape.as_slice(), input.into_raw_vec().into_boxed_slice()))
            .context("Failed to build input tensor")?;

        let started = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => tensor])
            .context("Failed to run inference")?;
        tracing::info!(
            "Inference took {:.1}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );

        let (_, logits) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .context("Model output is not a float tensor")?;

        let expected = height * width;
        if logits.len() != expected {
            return Err(SegmentError::ShapeMismatch {
                expected,
                actual: logits.len(),
            }
            .into());
        }

        let logits = Array4::from_shape_vec((1, 1, height, width), logits.to_vec())?;
        Ok(logits)
    }

    fn name(&self) -> &str {
        "scribbleprompt-unet"
    }
}
