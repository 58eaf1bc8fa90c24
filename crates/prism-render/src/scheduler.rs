//! Acquire, submit and present, with swapchain rebuilds on invalidation.

use ash::vk;
use prism_gpu::{AcquireOutcome, PresentOutcome};
use std::time::Instant;

use crate::error::Result;

/// GPU-facing operations the scheduler drives.
///
/// `slot` is the frame-in-flight index in `0..frames_in_flight()`;
/// `image_index` is a swapchain image index returned by `acquire_image`.
pub trait FrameBackend {
    /// Number of frames that may be recorded ahead of the GPU.
    fn frames_in_flight(&self) -> usize;

    /// Block until the previous submission from `slot` has retired.
    fn wait_for_frame(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next swapchain image, signaling the slot's
    /// image-available semaphore. Waits without a timeout.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Write this frame's uniforms into the buffer of `image_index`.
    fn update_uniforms(&mut self, slot: usize, image_index: u32, elapsed: f32) -> Result<()>;

    /// Submit the pre-recorded commands of `image_index`.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Queue `image_index` for presentation once rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Rebuild the swapchain and everything that depends on it, returning
    /// the extent it was built with. A recoverable error leaves the old
    /// swapchain in place and asks for a retry on a later frame.
    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D>;

    /// Wait for the device to go idle.
    fn wait_idle(&mut self) -> Result<()>;
}

/// Where the scheduler is within a frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
}

/// What one call to [`FrameScheduler::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was presented and the swapchain is still current.
    Presented,
    /// The swapchain was rebuilt during this call.
    Rebuilt,
    /// Nothing was rendered; a rebuild is waiting for a nonzero extent.
    Skipped,
}

/// Drives one frame cycle per call and absorbs swapchain invalidation.
pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    phase: FramePhase,
    slot: usize,
    extent: vk::Extent2D,
    built_extent: vk::Extent2D,
    rebuild_pending: bool,
    frame_count: u64,
    rebuild_count: u64,
    start: Instant,
}

impl<B: FrameBackend> FrameScheduler<B> {
    /// Take over `backend`, whose swapchain was built with `extent`.
    pub fn new(backend: B, extent: vk::Extent2D) -> Self {
        Self {
            backend,
            phase: FramePhase::Idle,
            slot: 0,
            extent,
            built_extent: extent,
            rebuild_pending: false,
            frame_count: 0,
            rebuild_count: 0,
            start: Instant::now(),
        }
    }

    /// Record a new window extent. The rebuild happens on the next
    /// [`render_frame`](Self::render_frame), and waits there while either
    /// dimension is zero.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent == self.extent && !self.rebuild_pending {
            return;
        }
        tracing::debug!("Window resized to {width}x{height}");
        self.extent = extent;
        self.rebuild_pending = extent != self.built_extent || self.rebuild_pending;
    }

    /// Run one acquire → update → submit → present cycle.
    pub fn render_frame(&mut self) -> Result<FrameStatus> {
        let mut rebuilt = false;
        if self.rebuild_pending {
            if !self.rebuild()? {
                return Ok(FrameStatus::Skipped);
            }
            rebuilt = true;
        }

        let slot = self.slot;
        self.backend.wait_for_frame(slot)?;

        self.phase = FramePhase::Acquiring;
        let (image_index, suboptimal) = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                self.phase = FramePhase::Idle;
                self.rebuild_pending = true;
                return Ok(if self.rebuild()? {
                    FrameStatus::Rebuilt
                } else {
                    FrameStatus::Skipped
                });
            }
        };

        self.phase = FramePhase::Submitting;
        let elapsed = self.start.elapsed().as_secs_f32();
        self.backend.update_uniforms(slot, image_index, elapsed)?;
        self.backend.submit(slot, image_index)?;

        self.phase = FramePhase::Presenting;
        let outcome = self.backend.present(slot, image_index)?;

        self.phase = FramePhase::Idle;
        self.frame_count += 1;
        self.slot = (slot + 1) % self.backend.frames_in_flight().max(1);
        tracing::trace!("Frame {} presented image {image_index}", self.frame_count);

        // A suboptimal acquire still presents; rebuild once afterwards
        if outcome.needs_rebuild() || suboptimal {
            tracing::debug!("Swapchain {outcome:?} on present, suboptimal on acquire: {suboptimal}");
            self.rebuild_pending = true;
            rebuilt |= self.rebuild()?;
        }

        Ok(if rebuilt {
            FrameStatus::Rebuilt
        } else {
            FrameStatus::Presented
        })
    }

    /// Rebuild for the current extent, or defer while the window or the
    /// surface has a zero size.
    ///
    /// Returns whether the rebuild happened; a deferred rebuild stays pending.
    fn rebuild(&mut self) -> Result<bool> {
        if self.extent.width == 0 || self.extent.height == 0 {
            tracing::debug!("Deferring swapchain rebuild until the window has a nonzero size");
            return Ok(false);
        }

        let built = match self.backend.rebuild_swapchain(self.extent) {
            Ok(built) => built,
            Err(e) if e.is_recoverable() => {
                tracing::debug!("Deferring swapchain rebuild: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.built_extent = built;
        self.rebuild_pending = false;
        self.rebuild_count += 1;
        tracing::info!(
            "Swapchain rebuilt at {}x{} for a {}x{} window (rebuild #{})",
            built.width,
            built.height,
            self.extent.width,
            self.extent.height,
            self.rebuild_count
        );
        Ok(true)
    }

    /// Wait for all GPU work to finish.
    pub fn shutdown(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.phase = FramePhase::Idle;
        tracing::info!(
            "Frame scheduler stopped after {} frames and {} rebuilds",
            self.frame_count,
            self.rebuild_count
        );
        Ok(())
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Swapchain rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Whether a rebuild is waiting for the next frame.
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Latest window extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Extent the current swapchain was built with.
    pub fn built_extent(&self) -> vk::Extent2D {
        self.built_extent
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Give the backend back, e.g. to drop it in a chosen order.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use prism_gpu::GpuError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Update(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
        Rebuild(u32, u32),
        WaitIdle,
    }

    /// Swapchain stand-in handing out image indices round-robin.
    struct MockBackend {
        image_count: u32,
        next_image: u32,
        acquires: u64,
        out_of_date_on_acquire: Vec<u64>,
        suboptimal_on_acquire: Vec<u64>,
        present_outcomes: Vec<(u64, PresentOutcome)>,
        presents: u64,
        /// Rebuild attempts that find a zero-sized surface.
        zero_surface_rebuilds: u32,
        /// Largest extent the surface accepts.
        max_extent: Option<vk::Extent2D>,
        calls: Vec<Call>,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                acquires: 0,
                out_of_date_on_acquire: Vec::new(),
                suboptimal_on_acquire: Vec::new(),
                present_outcomes: Vec::new(),
                presents: 0,
                zero_surface_rebuilds: 0,
                max_extent: None,
                calls: Vec::new(),
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            2
        }

        fn wait_for_frame(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.acquires += 1;
            self.calls.push(Call::Acquire(slot));
            if self.out_of_date_on_acquire.contains(&self.acquires) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: self.suboptimal_on_acquire.contains(&self.acquires),
            })
        }

        fn update_uniforms(&mut self, slot: usize, image_index: u32, _elapsed: f32) -> Result<()> {
            assert!(image_index < self.image_count);
            self.calls.push(Call::Update(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert_eq!(self.calls.last(), Some(&Call::Update(slot, image_index)));
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            assert_eq!(self.calls.last(), Some(&Call::Submit(slot, image_index)));
            self.presents += 1;
            self.calls.push(Call::Present(slot, image_index));
            let outcome = self
                .present_outcomes
                .iter()
                .find(|(n, _)| *n == self.presents)
                .map_or(PresentOutcome::Presented, |(_, o)| *o);
            Ok(outcome)
        }

        fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D> {
            if self.zero_surface_rebuilds > 0 {
                self.zero_surface_rebuilds -= 1;
                return Err(RenderError::Gpu(GpuError::SwapchainInvalid));
            }
            self.calls.push(Call::Rebuild(extent.width, extent.height));
            self.next_image = 0;
            Ok(self.max_extent.map_or(extent, |max| vk::Extent2D {
                width: extent.width.min(max.width),
                height: extent.height.min(max.height),
            }))
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn scheduler(backend: MockBackend) -> FrameScheduler<MockBackend> {
        FrameScheduler::new(backend, extent(800, 600))
    }

    #[test]
    fn hundred_frames_without_resize_never_rebuild() {
        let mut scheduler = scheduler(MockBackend::new(3));
        for _ in 0..100 {
            assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);
            assert_eq!(scheduler.phase(), FramePhase::Idle);
        }

        assert_eq!(scheduler.frame_count(), 100);
        assert_eq!(scheduler.rebuild_count(), 0);
        let backend = scheduler.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 100);
    }

    #[test]
    fn out_of_date_on_frame_fifty_rebuilds_once_before_frame_fifty_one() {
        let mut backend = MockBackend::new(3);
        backend.out_of_date_on_acquire.push(50);
        let mut scheduler = scheduler(backend);

        for frame in 1..=49 {
            assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented, "frame {frame}");
        }
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.rebuild_count(), 1);

        while scheduler.frame_count() < 100 {
            assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);
        }
        assert_eq!(scheduler.rebuild_count(), 1);

        // The failed acquire is followed directly by the rebuild: no submit,
        // no present, and the next acquire comes after it.
        let calls = &scheduler.backend().calls;
        let rebuild_at = calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(800, 600)))
            .unwrap();
        assert!(matches!(calls[rebuild_at - 1], Call::Acquire(_)));
        let acquires_before = calls[..rebuild_at]
            .iter()
            .filter(|c| matches!(c, Call::Acquire(_)))
            .count();
        assert_eq!(acquires_before, 50);
        let presents_before = calls[..rebuild_at]
            .iter()
            .filter(|c| matches!(c, Call::Present(..)))
            .count();
        assert_eq!(presents_before, 49);
    }

    #[test]
    fn suboptimal_present_rebuilds_after_presenting() {
        let mut backend = MockBackend::new(3);
        backend.present_outcomes.push((3, PresentOutcome::Suboptimal));
        backend.present_outcomes.push((5, PresentOutcome::OutOfDate));
        let mut scheduler = scheduler(backend);

        let statuses: Vec<FrameStatus> = (0..6).map(|_| scheduler.render_frame().unwrap()).collect();
        assert_eq!(
            statuses,
            vec![
                FrameStatus::Presented,
                FrameStatus::Presented,
                FrameStatus::Rebuilt,
                FrameStatus::Presented,
                FrameStatus::Rebuilt,
                FrameStatus::Presented,
            ]
        );
        assert_eq!(scheduler.frame_count(), 6);
        assert_eq!(scheduler.rebuild_count(), 2);
    }

    #[test]
    fn slots_alternate_and_indices_stay_in_range() {
        let mut scheduler = scheduler(MockBackend::new(3));
        for _ in 0..7 {
            scheduler.render_frame().unwrap();
        }
        let waits: Vec<usize> = scheduler
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![0, 1, 0, 1, 0, 1, 0]);
        assert!(scheduler.backend().calls.iter().all(|c| match c {
            Call::Present(_, index) => *index < 3,
            _ => true,
        }));
    }

    #[test]
    fn minimized_window_defers_rebuild_until_nonzero() {
        let mut scheduler = scheduler(MockBackend::new(3));
        scheduler.render_frame().unwrap();

        scheduler.notify_resized(0, 0);
        for _ in 0..5 {
            assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Skipped);
        }
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.rebuild_count(), 0);
        let backend = scheduler.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Acquire(_))), 1);

        scheduler.notify_resized(1024, 768);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.rebuild_count(), 1);
        assert!(!scheduler.rebuild_pending());
        assert_eq!(
            scheduler.backend().count(|c| *c == Call::Rebuild(1024, 768)),
            1
        );
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn out_of_date_while_minimized_is_retried_on_resize() {
        let mut backend = MockBackend::new(3);
        backend.out_of_date_on_acquire.push(2);
        let mut scheduler = scheduler(backend);
        scheduler.render_frame().unwrap();

        // The size reaches zero before the resize event arrives
        scheduler.extent = extent(0, 0);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Skipped);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Skipped);

        scheduler.notify_resized(640, 480);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn resize_to_the_built_extent_is_ignored() {
        let mut scheduler = scheduler(MockBackend::new(2));
        scheduler.notify_resized(800, 600);
        assert!(!scheduler.rebuild_pending());
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);

        scheduler.notify_resized(801, 600);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds_once() {
        let mut backend = MockBackend::new(3);
        backend.suboptimal_on_acquire.push(4);
        let mut scheduler = scheduler(backend);

        let statuses: Vec<FrameStatus> = (0..6).map(|_| scheduler.render_frame().unwrap()).collect();
        assert_eq!(statuses[3], FrameStatus::Rebuilt);
        assert!(statuses
            .iter()
            .enumerate()
            .all(|(i, s)| i == 3 || *s == FrameStatus::Presented));
        assert_eq!(scheduler.frame_count(), 6);
        assert_eq!(scheduler.rebuild_count(), 1);

        // The suboptimal frame is still submitted and presented first
        let calls = &scheduler.backend().calls;
        let rebuild_at = calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(..)))
            .unwrap();
        assert!(matches!(calls[rebuild_at - 1], Call::Present(..)));
        let presents_before = calls[..rebuild_at]
            .iter()
            .filter(|c| matches!(c, Call::Present(..)))
            .count();
        assert_eq!(presents_before, 4);
    }

    #[test]
    fn suboptimal_acquire_and_present_rebuild_only_once() {
        let mut backend = MockBackend::new(3);
        backend.suboptimal_on_acquire.push(2);
        backend.present_outcomes.push((2, PresentOutcome::Suboptimal));
        let mut scheduler = scheduler(backend);

        scheduler.render_frame().unwrap();
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.rebuild_count(), 1);
        assert_eq!(
            scheduler.backend().count(|c| matches!(c, Call::Rebuild(..))),
            1
        );
    }

    #[test]
    fn zero_surface_extent_keeps_rebuild_pending() {
        let mut backend = MockBackend::new(3);
        backend.out_of_date_on_acquire.push(2);
        backend.zero_surface_rebuilds = 2;
        let mut scheduler = scheduler(backend);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);

        // The window still reports 800x600 but the surface is zero-sized
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Skipped);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Skipped);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.rebuild_count(), 0);
        assert_eq!(
            scheduler.backend().count(|c| matches!(c, Call::Rebuild(..))),
            0
        );
        // No frame was recorded against the stale swapchain meanwhile
        assert_eq!(
            scheduler.backend().count(|c| matches!(c, Call::Acquire(_))),
            2
        );

        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert!(!scheduler.rebuild_pending());
        assert_eq!(scheduler.rebuild_count(), 1);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn fatal_rebuild_errors_propagate() {
        struct FailingRebuild(MockBackend);

        impl FrameBackend for FailingRebuild {
            fn frames_in_flight(&self) -> usize {
                self.0.frames_in_flight()
            }
            fn wait_for_frame(&mut self, slot: usize) -> Result<()> {
                self.0.wait_for_frame(slot)
            }
            fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
                self.0.acquire_image(slot)
            }
            fn update_uniforms(&mut self, slot: usize, image_index: u32, elapsed: f32) -> Result<()> {
                self.0.update_uniforms(slot, image_index, elapsed)
            }
            fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
                self.0.submit(slot, image_index)
            }
            fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
                self.0.present(slot, image_index)
            }
            fn rebuild_swapchain(&mut self, _extent: vk::Extent2D) -> Result<vk::Extent2D> {
                Err(GpuError::Presentation(vk::Result::ERROR_DEVICE_LOST).into())
            }
            fn wait_idle(&mut self) -> Result<()> {
                self.0.wait_idle()
            }
        }

        let mut backend = MockBackend::new(3);
        backend.out_of_date_on_acquire.push(1);
        let mut scheduler = FrameScheduler::new(FailingRebuild(backend), extent(800, 600));
        let err = scheduler.render_frame().unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn clamped_rebuild_records_the_built_extent() {
        let mut backend = MockBackend::new(3);
        backend.max_extent = Some(extent(1024, 768));
        let mut scheduler = scheduler(backend);

        scheduler.notify_resized(4000, 3000);
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.built_extent(), extent(1024, 768));
        assert_eq!(scheduler.extent(), extent(4000, 3000));

        // Settling on the size the surface actually allows needs no rebuild
        scheduler.notify_resized(1024, 768);
        assert!(!scheduler.rebuild_pending());
        assert_eq!(scheduler.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn shutdown_waits_for_idle() {
        let mut scheduler = scheduler(MockBackend::new(3));
        scheduler.render_frame().unwrap();
        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.backend().calls.last(), Some(&Call::WaitIdle));
    }
}
