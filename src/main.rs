mod error;
mod segmentation;
mod session;
mod shell;
mod viewer;
mod volume;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use segmentation::{InferenceOptions, Plane};
use session::{ConformPolicy, SegmentOutcome, Segmenter, Workspace};
use shell::{Shell, TerminalPrompt, DEFAULT_SEGMENTATION_PATH};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use viewer::{Pointer, Scene, Viewer, DEFAULT_MAX_UNDO, OVERLAY};
use volume::Volume;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Path to the ScribblePrompt model (ONNX file)
    #[arg(long, global = true, default_value = "scribbleprompt_unet.onnx")]
    model: PathBuf,

    /// Run inference on the CPU only
    #[arg(long, global = true)]
    cpu_only: bool,

    /// Intra-op threads for inference
    #[arg(long, global = true, default_value_t = 4)]
    threads: usize,

    /// What to do with images that are not on the conformed 256³ grid
    #[arg(long, global = true, value_enum, default_value_t = ConformPolicy::Ask)]
    conform: ConformPolicy,

    /// Undo steps kept for freehand strokes
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_UNDO)]
    max_undo: usize,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Interactive session driven by commands on stdin or from a script
    Shell {
        /// Image to open at startup
        image: Option<PathBuf>,

        /// Read commands from this file instead of stdin
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Segment one slice from a scribble volume and save the mask
    Segment {
        /// Image to segment
        image: PathBuf,

        /// Scribble volume on the same grid, non-zero voxels are marks
        scribble: PathBuf,

        /// Viewing plane of the slice
        #[arg(long)]
        plane: Plane,

        /// Slice index along the plane's pinned axis
        #[arg(long)]
        slice: i64,

        /// Where to write the segmentation
        #[arg(short, long, default_value = DEFAULT_SEGMENTATION_PATH)]
        output: PathBuf,

        /// Also write a PNG preview of the segmented slice
        #[arg(long)]
        preview: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    tracing::info!("scribseg starting");
    tracing::info!("Model: {}", args.model.display());
    tracing::info!("Conform policy: {:?}", args.conform);

    let options = InferenceOptions {
        cpu_only: args.cpu_only,
        intra_threads: args.threads,
    };
    let model = segmentation::create_default_model(&args.model, &options)
        .context("Failed to load segmentation model")?;
    let segmenter = Segmenter::new(model);
    let workspace = Workspace::new(args.conform);
    let scene = Scene::new(args.max_undo);

    match args.mode.unwrap_or(Mode::Shell {
        image: None,
        script: None,
    }) {
        Mode::Shell { image, script } => {
            run_shell(scene, workspace, segmenter, image, script)
        }
        Mode::Segment {
            image,
            scribble,
            plane,
            slice,
            output,
            preview,
        } => {
            let mut scene = scene;
            let mut segmenter = segmenter;
            let mut prompt = TerminalPrompt;
            workspace.load_background(&mut scene, &image, &mut prompt)?;

            let scribble = Volume::open(&scribble)
                .with_context(|| format!("Failed to load scribble {}", scribble.display()))?;
            scene.load_drawing(&scribble)?;

            let mut voxel = [0; 3];
            voxel[plane.pinned_axis()] = slice;
            scene.set_pointer(Pointer {
                voxel,
                tile: plane.tile(),
            });

            match segmenter.segment(&mut scene)? {
                SegmentOutcome::NothingDrawn => {
                    tracing::warn!("Scribble has no marks, nothing to segment");
                }
                SegmentOutcome::Segmented { .. } => {
                    let overlay = scene
                        .volume(OVERLAY)
                        .context("Segmentation overlay disappeared")?;
                    overlay.save_mask(&output)?;
                }
            }

            if let Some(path) = preview {
                scene.render_preview(&path)?;
            }
            Ok(())
        }
    }
}

fn run_shell<M: segmentation::SegmentationModel>(
    mut scene: Scene,
    workspace: Workspace,
    segmenter: Segmenter<M>,
    image: Option<PathBuf>,
    script: Option<PathBuf>,
) -> Result<()> {
    let mut prompt = TerminalPrompt;
    if let Some(image) = image {
        workspace.load_background(&mut scene, &image, &mut prompt)?;
    }
    let mut shell = Shell::new(scene, workspace, segmenter, prompt);

    match script {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open script {}", path.display()))?;
            shell.run(BufReader::new(file).lines())
        }
        None => {
            // Read one line at a time so dialogs can share stdin
            let stdin_lines = std::iter::from_fn(|| {
                let mut line = String::new();
                match io::stdin().read_line(&mut line) {
                    Ok(0) => None,
                    Ok(_) => Some(Ok(line)),
                    Err(err) => Some(Err(err)),
                }
            });
            shell.run(stdin_lines)
        }
    }
}
