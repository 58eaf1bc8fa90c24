//! Frame timing: FPS statistics and an optional frame cap.

use std::time::{Duration, Instant};

/// Running FPS statistics over every presented frame.
#[derive(Debug, Clone)]
pub struct FrameStats {
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    samples: u64,
    last_frame: Instant,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            samples: 0,
            last_frame: Instant::now(),
        }
    }

    /// Record a frame that ended now.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.record(dt);
    }

    /// Record a frame that took `dt`.
    pub fn record(&mut self, dt: Duration) {
        let secs = dt.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let fps = 1.0 / secs;
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.samples += 1;
    }

    /// Average FPS, None before the first sample.
    pub fn average_fps(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.fps_sum / self.samples as f64)
    }

    pub fn min_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.min_fps)
    }

    pub fn max_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.max_fps)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Log a summary at info.
    pub fn report(&self, frames: u64, rebuilds: u64) {
        tracing::info!("Frame statistics:");
        if let (Some(min), Some(max), Some(avg)) =
            (self.min_fps(), self.max_fps(), self.average_fps())
        {
            tracing::info!("  Min: {min:.1}");
            tracing::info!("  Max: {max:.1}");
            tracing::info!("  Avg: {avg:.1}");
        }
        tracing::info!("  Total frames: {frames}");
        tracing::info!("  Swapchain rebuilds: {rebuilds}");
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame duration for `fps`, None when uncapped.
pub fn target_frame_time(fps: Option<u32>) -> Option<Duration> {
    fps.filter(|&fps| fps > 0)
        .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
}

/// How long to sleep after a frame that took `elapsed` to hit `target`.
pub fn pacing_delay(target: Option<Duration>, elapsed: Duration) -> Option<Duration> {
    target
        .and_then(|target| target.checked_sub(elapsed))
        .filter(|delay| !delay.is_zero())
}
