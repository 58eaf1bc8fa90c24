//! Prism demo viewer
//!
//! Opens a window and renders a spinning, textured pair of quads until the
//! window is closed. Resizing and minimizing rebuild the swapchain.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p prism-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--validation`: Enable Vulkan validation layers
//! - `--no-validation`: Disable Vulkan validation layers
//! - `-h, --help`: Print help message
//!
//! Validation defaults to on in debug builds.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::process::ExitCode;

use prism_app::{init_logging, run_app, AppConfig};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { validation: Option<bool> },
    Help,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let mut validation = None;
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--validation" => validation = Some(true),
            "--no-validation" => validation = Some(false),
            other => anyhow::bail!("Unknown argument: {other} (see --help)"),
        }
    }
    Ok(Command::Run { validation })
}

fn main() -> ExitCode {
    let validation = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run { validation }) => validation,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    init_logging();

    let mut config = AppConfig::new("Prism Viewer").with_size(WIDTH, HEIGHT);
    if let Some(validation) = validation {
        config = config.with_validation(validation);
    }

    match run_app(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    eprintln!(
        "Prism demo viewer

USAGE:
    cargo run -p prism-viewer -- [OPTIONS]

OPTIONS:
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers
    -h, --help              Print this help message

ASSETS (relative to the working directory):
    shaders/vert.spv, shaders/frag.spv, textures/texture.png

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Command> {
        parse_args(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn no_arguments_keep_the_default_validation() {
        assert_eq!(parse(&[]).unwrap(), Command::Run { validation: None });
    }

    #[test]
    fn validation_flags_last_one_wins() {
        assert_eq!(
            parse(&["--validation"]).unwrap(),
            Command::Run {
                validation: Some(true)
            }
        );
        assert_eq!(
            parse(&["--validation", "--no-validation"]).unwrap(),
            Command::Run {
                validation: Some(false)
            }
        );
    }

    #[test]
    fn help_wins_over_everything() {
        assert_eq!(parse(&["--validation", "-h"]).unwrap(), Command::Help);
        assert_eq!(parse(&["--help"]).unwrap(), Command::Help);
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(parse(&["--fast"]).is_err());
    }
}
