//! Viewer application: one model, a fixed camera.

use std::path::PathBuf;

use anyhow::{bail, Context};
use glam::Vec3;
use tracing::info;

use crimson_app::{AppContext, ObjImporter, RenderApp};

pub const DEFAULT_MODEL: &str = "assets/models/chest/source/MESH_Chest.obj";
pub const DEFAULT_SHADER: &str = "assets/shaders/shader.spv";

/// Command line options.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerArgs {
    pub model: PathBuf,
    pub shader: PathBuf,
    pub vsync: bool,
    pub target_fps: Option<u32>,
    pub rotation_degrees: f32,
    pub animation: usize,
}

impl Default for ViewerArgs {
    fn default() -> Self {
        Self {
            model: PathBuf::from(DEFAULT_MODEL),
            shader: PathBuf::from(DEFAULT_SHADER),
            vsync: false,
            target_fps: None,
            rotation_degrees: 0.0,
            animation: 0,
        }
    }
}

impl ViewerArgs {
    /// Parse the process arguments.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse arguments, program name excluded.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Self::default();
        let mut positional = 0;
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--vsync" => parsed.vsync = true,
                "--fps" => {
                    let value = args.next().context("--fps needs a value")?;
                    parsed.target_fps =
                        Some(value.parse().with_context(|| format!("invalid --fps: {value}"))?);
                }
                "--rotate" => {
                    let value = args.next().context("--rotate needs a value")?;
                    parsed.rotation_degrees =
                        value.parse().with_context(|| format!("invalid --rotate: {value}"))?;
                }
                "--animation" => {
                    let value = args.next().context("--animation needs a value")?;
                    parsed.animation =
                        value.parse().with_context(|| format!("invalid --animation: {value}"))?;
                }
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                _ => {
                    match positional {
                        0 => parsed.model = PathBuf::from(arg),
                        1 => parsed.shader = PathBuf::from(arg),
                        _ => bail!("unexpected argument: {arg}"),
                    }
                    positional += 1;
                }
            }
        }

        Ok(parsed)
    }
}

/// The viewer holds no GPU state of its own; the renderer owns the model.
pub struct Viewer {
    frames: u64,
}

impl RenderApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let args = ViewerArgs::from_env()?;

        ctx.load_model(&ObjImporter, &args.model)
            .with_context(|| format!("Failed to load model {}", args.model.display()))?;

        let model = ctx.renderer.model_mut();
        if args.rotation_degrees != 0.0 {
            model.set_base_rotation(args.rotation_degrees, Vec3::Y);
        }
        if model.has_animations() {
            model.set_animation(args.animation);
        }

        info!(
            "Viewer ready: {} meshes, animated: {}",
            model.index_counts().len(),
            model.has_animations()
        );

        Ok(Self { frames: 0 })
    }

    fn update(&mut self, _ctx: &mut AppContext, _dt: f32) {
        self.frames += 1;
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        info!("Viewer shutting down after {} frames", self.frames);
    }
}
