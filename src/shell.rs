use crate::error::SegmentError;
use crate::segmentation::SegmentationModel;
use crate::session::{Prompt, Segmenter, Workspace};
use crate::viewer::{Layer, Pointer, Scene, Viewer, BACKGROUND, OVERLAY};
use anyhow::{bail, ensure, Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Where `save` writes when no path is given
pub const DEFAULT_SEGMENTATION_PATH: &str = "segmentation.nii";

/// One user action
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(PathBuf),
    Conform,
    Cursor(Pointer),
    Draw(Vec<[i64; 3]>),
    Pen(u8),
    /// Stylus lifted, segments like `Segment`
    PenUp,
    Segment,
    Undo,
    Clip(bool),
    Opacity(Layer, u8),
    Save(PathBuf),
    Preview(PathBuf),
    Status,
    Quit,
}

fn numbers<T>(args: &[&str]) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    args.iter()
        .map(|arg| {
            arg.parse::<T>()
                .with_context(|| format!("'{arg}' is not a valid number"))
        })
        .collect()
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = words.collect();

        let command = match head {
            "load" => {
                ensure!(args.len() == 1, "usage: load <path>");
                Command::Load(PathBuf::from(args[0]))
            }
            "conform" => Command::Conform,
            "cursor" => {
                ensure!(args.len() == 4, "usage: cursor <x> <y> <z> <tile>");
                let v = numbers::<i64>(&args)?;
                Command::Cursor(Pointer {
                    voxel: [v[0], v[1], v[2]],
                    tile: i32::try_from(v[3]).context("tile index out of range")?,
                })
            }
            "draw" => {
                ensure!(
                    !args.is_empty() && args.len() % 3 == 0,
                    "usage: draw <x> <y> <z> [<x> <y> <z> ...]"
                );
                let v = numbers::<i64>(&args)?;
                Command::Draw(v.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
            }
            "pen" => {
                ensure!(args.len() == 1, "usage: pen <value>");
                Command::Pen(numbers::<u8>(&args)?[0])
            }
            "pen-up" => Command::PenUp,
            "segment" | "s" => Command::Segment,
            "undo" | "z" => Command::Undo,
            "clip" => match args.as_slice() {
                ["on"] => Command::Clip(true),
                ["off"] => Command::Clip(false),
                _ => bail!("usage: clip on|off"),
            },
            "opacity" => {
                ensure!(args.len() == 2, "usage: opacity <layer> <0-255>");
                Command::Opacity(args[0].parse()?, numbers::<u8>(&args[1..])?[0])
            }
            "save" => match args.as_slice() {
                [] => Command::Save(PathBuf::from(DEFAULT_SEGMENTATION_PATH)),
                [path] => Command::Save(PathBuf::from(*path)),
                _ => bail!("usage: save [path]"),
            },
            "preview" => {
                ensure!(args.len() == 1, "usage: preview <path.png>");
                Command::Preview(PathBuf::from(args[0]))
            }
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

/// Whether the loop keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Dialogs on the terminal: questions on stderr, answers from stdin
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&mut self, question: &str) -> bool {
        eprint!("{question} [y/N] ");
        io::stderr().flush().ok();
        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn alert(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Line-oriented front end wiring user actions to the segmentation session
pub struct Shell<M, P> {
    scene: Scene,
    workspace: Workspace,
    segmenter: Segmenter<M>,
    prompt: P,
}

impl<M: SegmentationModel, P: Prompt> Shell<M, P> {
    pub fn new(scene: Scene, workspace: Workspace, segmenter: Segmenter<M>, prompt: P) -> Self {
        Self {
            scene,
            workspace,
            segmenter,
            prompt,
        }
    }

    #[cfg(test)]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Execute commands until `quit` or the end of input
    ///
    /// A failing command is logged and the shell stays usable.
    pub fn run<I>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        tracing::info!("Shell ready, type 'status' for the current state");
        for line in lines {
            let line = line.context("Failed to read command")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.parse::<Command>().and_then(|c| self.execute(c)) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => tracing::error!("{line}: {err:#}"),
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Load(path) => {
                self.workspace
                    .load_background(&mut self.scene, &path, &mut self.prompt)?;
            }
            Command::Conform => self.workspace.conform_background(&mut self.scene)?,
            Command::Cursor(pointer) => self.scene.set_pointer(pointer),
            Command::Draw(voxels) => self.scene.paint_stroke(&voxels)?,
            Command::Pen(value) => self.scene.set_pen(value),
            Command::PenUp | Command::Segment => self.segment()?,
            Command::Undo => {
                if !self.scene.undo() {
                    tracing::info!("Nothing to undo");
                }
            }
            Command::Clip(enabled) => self.scene.set_clip(enabled),
            Command::Opacity(layer, value) => {
                self.scene.set_opacity(layer, f32::from(value) / 255.0)?;
            }
            Command::Save(path) => {
                let overlay = self
                    .scene
                    .volume(OVERLAY)
                    .ok_or(SegmentError::NoOverlay)?;
                overlay.save_mask(&path)?;
            }
            Command::Preview(path) => self.scene.render_preview(&path)?,
            Command::Status => self.log_status(),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn segment(&mut self) -> Result<()> {
        match self.segmenter.segment(&mut self.scene) {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(SegmentError::NoImage) = err.downcast_ref::<SegmentError>() {
                    self.prompt.alert("Please open a voxel-based image");
                }
                Err(err)
            }
        }
    }

    fn log_status(&self) {
        let scene = &self.scene;
        let dims = scene.volume(BACKGROUND).map(|v| v.dims());
        let pointer = scene.pointer();
        tracing::info!(
            "image={:?} volumes={} pointer={:?} tile={} drawing={} pen={} undo={} clip={:?} busy={} frames={}",
            dims,
            scene.volume_count(),
            pointer.voxel,
            pointer.tile,
            scene.drawing_enabled(),
            scene.pen(),
            scene.drawing().map_or(0, |d| d.undo_depth()),
            scene.clip_plane(),
            self.segmenter.busy_flag().is_busy(),
            scene.frames()
        );
    }
}
