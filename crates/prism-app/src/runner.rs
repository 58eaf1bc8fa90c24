//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use ash::vk;
use prism_gpu::GpuContextBuilder;
use prism_render::{FrameScheduler, FrameStatus, Renderer, RendererAssets};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::AppConfig;
use crate::stats::{pacing_delay, target_frame_time, FrameStats};

/// Install the `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Open a window and render until it is closed.
///
/// Returns the first fatal error raised while starting up or rendering.
pub fn run_app(config: AppConfig) -> anyhow::Result<()> {
    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        state: None,
        failure: None,
    };
    event_loop
        .run_app(&mut runner)
        .context("Event loop error")?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Implements winit's `ApplicationHandler`; owns the state once resumed.
struct AppRunner {
    config: AppConfig,
    state: Option<AppState>,
    failure: Option<anyhow::Error>,
}

/// Live application state.
///
/// The scheduler, which owns the renderer and its surface, drops before the
/// window it presents to.
struct AppState {
    scheduler: FrameScheduler<Renderer>,
    window: Arc<Window>,
    stats: FrameStats,
    target_frame_time: Option<Duration>,
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match AppState::new(&self.config, event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(state) = self.state.take() {
                    if let Err(e) = state.shutdown() {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    self.fail(event_loop, e);
                    return;
                }
                state.window.request_redraw();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.scheduler.notify_resized(size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl AppRunner {
    /// Record a fatal error and stop the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        if let Some(state) = self.state.take() {
            if let Err(shutdown) = state.shutdown() {
                error!("Shutdown after failure also failed: {shutdown:#}");
            }
        }
        self.failure.get_or_insert(e);
        event_loop.exit();
    }
}

impl AppState {
    fn new(config: &AppConfig, event_loop: &ActiveEventLoop) -> anyhow::Result<Self> {
        let window_attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .build_for_window(window.as_ref())?;
        info!("GPU: {}", gpu.capabilities().summary());

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let renderer = Renderer::new(gpu, &RendererAssets::from(&config.assets), extent)?;
        let built = renderer.extent().unwrap_or(extent);

        Ok(Self {
            scheduler: FrameScheduler::new(renderer, built),
            window,
            stats: FrameStats::new(),
            target_frame_time: target_frame_time(config.target_fps),
        })
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        match self.scheduler.render_frame()? {
            FrameStatus::Presented | FrameStatus::Rebuilt => self.stats.tick(),
            // Minimized: don't spin while there is nothing to draw into
            FrameStatus::Skipped => thread::sleep(Duration::from_millis(10)),
        }

        if let Some(delay) = pacing_delay(self.target_frame_time, frame_start.elapsed()) {
            thread::sleep(delay);
        }

        Ok(())
    }

    fn shutdown(mut self) -> anyhow::Result<()> {
        info!("Starting cleanup...");
        self.scheduler.shutdown()?;
        self.stats
            .report(self.scheduler.frame_count(), self.scheduler.rebuild_count());

        if let Some((errors, warnings)) = self.scheduler.backend().gpu().validation_counts() {
            info!("Validation messages: {errors} errors, {warnings} warnings");
        }

        drop(self.scheduler);
        drop(self.window);
        info!("Cleanup complete");
        Ok(())
    }
}
