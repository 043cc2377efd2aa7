//! Crimson model viewer
//!
//! Loads one model and renders it with the Crimson frame orchestrator.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p crimson-viewer -- [MODEL] [SHADER] [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--vsync`: Force FIFO presentation instead of preferring mailbox
//! - `--fps <N>`: Limit the frame rate
//! - `--rotate <DEGREES>`: Base rotation of the model around +Y
//! - `--animation <N>`: Animation index to play (default: 0)
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use crimson_app::{run_app, AppConfig, RendererConfig};

use crate::app::{Viewer, ViewerArgs};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let args = ViewerArgs::from_env()?;

    let mut config = AppConfig::new("Crimson Souls")
        .with_size(WIDTH, HEIGHT)
        .with_renderer(
            RendererConfig::new()
                .with_shader(&args.shader)
                .with_vsync(args.vsync),
        );
    if let Some(fps) = args.target_fps {
        config = config.with_target_fps(fps);
    }

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Crimson model viewer

USAGE:
    cargo run -p crimson-viewer -- [MODEL] [SHADER] [OPTIONS]

ARGUMENTS:
    MODEL                   Model file to load
                            Default: {}
    SHADER                  SPIR-V module with vertMain/fragMain entry points
                            Default: {}

OPTIONS:
    --vsync                 Force FIFO presentation instead of preferring mailbox
    --fps <N>               Limit the frame rate
    --rotate <DEGREES>      Base rotation of the model around +Y
    --animation <N>         Animation index to play (default: 0)
    -h, --help              Print this help message

CONTROLS:
    ESC                     Quit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)",
        app::DEFAULT_MODEL,
        app::DEFAULT_SHADER
    );
}
