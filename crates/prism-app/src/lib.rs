//! Windowed application runner for Prism.
//!
//! Handles the boilerplate around the renderer:
//! - Logging setup
//! - Window creation and resize tracking
//! - GPU context and renderer initialization
//! - Driving the frame scheduler from the event loop
//!
//! # Example
//!
//! ```no_run
//! use prism_app::{init_logging, run_app, AppConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging();
//!     run_app(AppConfig::new("Prism").with_size(1024, 768))
//! }
//! ```

mod config;
mod runner;
mod stats;

pub use config::{AppConfig, AssetPaths};
pub use runner::{init_logging, run_app};
pub use stats::FrameStats;
