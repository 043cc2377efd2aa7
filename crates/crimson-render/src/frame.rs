//! Frame orchestration independent of the graphics API.
//!
//! [`FrameScheduler`] owns the ordering rules of a frame: slot fences are
//! waited before reuse, swapchain images are fenced against the frame that
//! last rendered them, and stale swapchains are rebuilt before drawing
//! resumes. The device work itself is delegated to a [`FrameBackend`].

use tracing::{debug, info};

use crate::error::Result;

/// Outcome of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// What a call to [`FrameScheduler::draw_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// The swapchain was rebuilt; nothing was drawn.
    Recreated,
    /// The window has no area; recreation is pending.
    Deferred,
}

/// Device operations driven by the scheduler.
///
/// `slot` is always a frame slot index and `image` a swapchain image index;
/// the two are never interchangeable.
pub trait FrameBackend {
    type Fence: Copy + PartialEq;

    /// Fence signaled when `slot`'s last submission completed.
    fn slot_fence(&self, slot: usize) -> Self::Fence;

    /// Block until `fence` is signaled.
    fn wait_for_fence(&mut self, fence: Self::Fence) -> Result<()>;

    fn reset_fence(&mut self, fence: Self::Fence) -> Result<()>;

    /// Acquire the next image, signaling `slot`'s image-available semaphore.
    fn acquire(&mut self, slot: usize) -> Result<AcquireResult>;

    /// Write uniforms for `slot` and advance animation by `dt` seconds.
    fn update(&mut self, slot: usize, dt: f32) -> Result<()>;

    /// Reset and record `slot`'s command buffer targeting `image`.
    fn record(&mut self, slot: usize, image: u32) -> Result<()>;

    /// Submit `slot`'s commands, signaling `image`'s render-finished
    /// semaphore and `slot`'s fence.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;

    /// Queue `image` for presentation. Returns `true` when the swapchain is
    /// stale.
    fn present(&mut self, image: u32) -> Result<bool>;

    /// Current framebuffer size of the window.
    fn framebuffer_size(&self) -> (u32, u32);

    fn wait_idle(&mut self) -> Result<()>;

    /// Rebuild the swapchain and its dependents; returns the new image count.
    fn recreate(&mut self) -> Result<usize>;
}

/// CPU-side frame state machine.
#[derive(Debug)]
pub struct FrameScheduler<F> {
    frames_in_flight: usize,
    current_slot: usize,
    /// Fence of the submission that last rendered each swapchain image.
    images_in_flight: Vec<Option<F>>,
    needs_recreate: bool,
    frame_count: u64,
}

impl<F: Copy + PartialEq> FrameScheduler<F> {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_slot: 0,
            images_in_flight: vec![None; image_count],
            needs_recreate: false,
            frame_count: 0,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn images_in_flight(&self) -> &[Option<F>] {
        &self.images_in_flight
    }

    /// Rebuild the swapchain at the start of the next frame.
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Run one frame.
    ///
    /// Stale or suboptimal swapchains are handled internally; only
    /// unexpected backend failures are returned as errors.
    pub fn draw_frame<B>(&mut self, backend: &mut B, dt: f32) -> Result<FrameStatus>
    where
        B: FrameBackend<Fence = F>,
    {
        if self.needs_recreate {
            return self.recreate(backend);
        }

        let slot = self.current_slot;
        let fence = backend.slot_fence(slot);
        backend.wait_for_fence(fence)?;

        let image = match backend.acquire(slot)? {
            AcquireResult::OutOfDate => {
                debug!("Swapchain out of date on acquire");
                self.needs_recreate = true;
                return self.recreate(backend);
            }
            AcquireResult::Image { index, suboptimal } => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
        };

        let image_slot = image as usize;
        if image_slot >= self.images_in_flight.len() {
            self.images_in_flight.resize(image_slot + 1, None);
        }
        if let Some(previous) = self.images_in_flight[image_slot] {
            if previous != fence {
                backend.wait_for_fence(previous)?;
            }
        }
        self.images_in_flight[image_slot] = Some(fence);

        backend.update(slot, dt)?;

        backend.reset_fence(fence)?;
        backend.record(slot, image)?;
        backend.submit(slot, image)?;

        if backend.present(image)? {
            self.needs_recreate = true;
        }

        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
        self.frame_count += 1;
        Ok(FrameStatus::Presented)
    }

    /// Rebuild the swapchain once the window has a drawable area.
    pub fn recreate<B>(&mut self, backend: &mut B) -> Result<FrameStatus>
    where
        B: FrameBackend<Fence = F>,
    {
        let (width, height) = backend.framebuffer_size();
        if width == 0 || height == 0 {
            self.needs_recreate = true;
            return Ok(FrameStatus::Deferred);
        }

        backend.wait_for_fence(backend.slot_fence(self.current_slot))?;
        backend.wait_idle()?;

        let image_count = backend.recreate()?;
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
        self.needs_recreate = false;

        info!("Swapchain recreated for {width}x{height} ({image_count} images)");
        Ok(FrameStatus::Recreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FenceState {
        Signaled,
        Reset,
        Pending,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Update(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(u32),
        WaitIdle,
        Recreate,
    }

    /// Device stand-in that enforces fence discipline as it goes.
    struct MockBackend {
        fences: Vec<FenceState>,
        image_count: usize,
        next_image: u32,
        /// Scripted acquire results consumed before falling back to cycling.
        acquire_script: VecDeque<AcquireResult>,
        present_script: VecDeque<bool>,
        /// Fence whose submission last targeted each image.
        image_owner: Vec<Option<usize>>,
        framebuffer: (u32, u32),
        events: Vec<Event>,
    }

    impl MockBackend {
        fn new(frames: usize, images: usize) -> Self {
            Self {
                fences: vec![FenceState::Signaled; frames],
                image_count: images,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_owner: vec![None; images],
                framebuffer: (1280, 720),
                events: Vec::new(),
            }
        }

        fn recorded(&self) -> Vec<(usize, u32)> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Record(slot, image) => Some((*slot, *image)),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, event: &Event) -> usize {
            self.events.iter().filter(|e| *e == event).count()
        }
    }

    impl FrameBackend for MockBackend {
        type Fence = usize;

        fn slot_fence(&self, slot: usize) -> usize {
            slot
        }

        fn wait_for_fence(&mut self, fence: usize) -> Result<()> {
            self.events.push(Event::Wait(fence));
            // Waiting lets the GPU finish; a reset fence would block forever.
            assert_ne!(self.fences[fence], FenceState::Reset, "deadlock on fence {fence}");
            self.fences[fence] = FenceState::Signaled;
            Ok(())
        }

        fn reset_fence(&mut self, fence: usize) -> Result<()> {
            assert_eq!(self.fences[fence], FenceState::Signaled);
            self.events.push(Event::Reset(fence));
            self.fences[fence] = FenceState::Reset;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<AcquireResult> {
            self.events.push(Event::Acquire(slot));
            if let Some(result) = self.acquire_script.pop_front() {
                return Ok(result);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            Ok(AcquireResult::Image {
                index,
                suboptimal: false,
            })
        }

        fn update(&mut self, slot: usize, _dt: f32) -> Result<()> {
            // Uniform slot is only written once its fence has completed.
            assert_eq!(self.fences[slot], FenceState::Signaled);
            self.events.push(Event::Update(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image: u32) -> Result<()> {
            assert_eq!(self.fences[slot], FenceState::Reset);
            if let Some(owner) = self.image_owner[image as usize] {
                assert_ne!(
                    self.fences[owner],
                    FenceState::Pending,
                    "image {image} still in use by fence {owner}"
                );
            }
            self.events.push(Event::Record(slot, image));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
            self.events.push(Event::Submit(slot, image));
            self.fences[slot] = FenceState::Pending;
            self.image_owner[image as usize] = Some(slot);
            Ok(())
        }

        fn present(&mut self, image: u32) -> Result<bool> {
            self.events.push(Event::Present(image));
            Ok(self.present_script.pop_front().unwrap_or(false))
        }

        fn framebuffer_size(&self) -> (u32, u32) {
            self.framebuffer
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.events.push(Event::WaitIdle);
            for fence in &mut self.fences {
                if *fence == FenceState::Pending {
                    *fence = FenceState::Signaled;
                }
            }
            Ok(())
        }

        fn recreate(&mut self) -> Result<usize> {
            self.events.push(Event::Recreate);
            self.image_owner = vec![None; self.image_count];
            self.next_image = 0;
            Ok(self.image_count)
        }
    }

    #[test]
    fn slots_cycle_and_fences_guard_reuse() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3);

        for _ in 0..8 {
            assert_eq!(
                scheduler.draw_frame(&mut backend, 0.016).unwrap(),
                FrameStatus::Presented
            );
        }

        let slots: Vec<usize> = backend.recorded().iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(scheduler.frame_count(), 8);

        // Every reset of a slot fence is directly preceded by waiting on it
        // somewhere since that slot's previous submit.
        let mut waited = [true, true];
        for event in &backend.events {
            match *event {
                Event::Wait(f) => waited[f] = true,
                Event::Submit(slot, _) => waited[slot] = false,
                Event::Reset(f) => assert!(waited[f], "fence {f} reset without wait"),
                _ => {}
            }
        }
    }

    #[test]
    fn reused_image_waits_on_previous_fence() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3);

        // Images 0,1,2 then 0 again: frame 3 runs in slot 1 but image 0 was
        // last rendered by slot 0, whose frame-2 submission is pending.
        for _ in 0..4 {
            scheduler.draw_frame(&mut backend, 0.0).unwrap();
        }

        let frame3 = backend
            .events
            .iter()
            .rposition(|e| *e == Event::Acquire(1))
            .unwrap();
        assert_eq!(backend.events[frame3 + 1], Event::Wait(0));
        assert_eq!(scheduler.images_in_flight(), &[Some(1), Some(1), Some(0)]);
    }

    #[test]
    fn same_fence_is_not_waited_twice() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquire_script = VecDeque::from(vec![
            AcquireResult::Image {
                index: 2,
                suboptimal: false,
            },
            AcquireResult::Image {
                index: 1,
                suboptimal: false,
            },
            AcquireResult::Image {
                index: 2,
                suboptimal: false,
            },
        ]);
        let mut scheduler = FrameScheduler::new(2, 3);

        for _ in 0..3 {
            scheduler.draw_frame(&mut backend, 0.0).unwrap();
        }

        // Third frame is slot 0 again on image 2, already owned by fence 0.
        assert_eq!(backend.count(&Event::Wait(0)), 2);
    }

    #[test]
    fn out_of_date_acquire_recreates_without_drawing() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquire_script = VecDeque::from(vec![AcquireResult::OutOfDate]);
        let mut scheduler = FrameScheduler::new(2, 3);

        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Recreated
        );
        assert!(backend.recorded().is_empty());
        assert_eq!(backend.count(&Event::Recreate), 1);
        assert_eq!(scheduler.current_slot(), 0);
        assert!(!scheduler.needs_recreate());

        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Presented
        );
    }

    #[test]
    fn suboptimal_acquire_draws_then_recreates() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquire_script = VecDeque::from(vec![AcquireResult::Image {
            index: 0,
            suboptimal: true,
        }]);
        let mut scheduler = FrameScheduler::new(2, 3);

        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Presented
        );
        assert!(scheduler.needs_recreate());
        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Recreated
        );
    }

    #[test]
    fn stale_present_and_resize_reset_image_tracking() {
        let mut backend = MockBackend::new(2, 3);
        backend.present_script = VecDeque::from(vec![false, true]);
        let mut scheduler = FrameScheduler::new(2, 3);

        scheduler.draw_frame(&mut backend, 0.0).unwrap();
        scheduler.draw_frame(&mut backend, 0.0).unwrap();
        assert!(scheduler.needs_recreate());
        assert!(scheduler.images_in_flight().iter().any(Option::is_some));

        backend.image_count = 4;
        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Recreated
        );
        assert_eq!(scheduler.images_in_flight(), &[None, None, None, None]);

        // Recreation waits on the current slot's fence, then the device.
        let recreate = backend
            .events
            .iter()
            .position(|e| *e == Event::Recreate)
            .unwrap();
        assert_eq!(backend.events[recreate - 1], Event::WaitIdle);
        assert_eq!(backend.events[recreate - 2], Event::Wait(0));
    }

    #[test]
    fn zero_size_window_defers_recreation() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3);
        scheduler.request_recreate();
        backend.framebuffer = (0, 720);

        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Deferred
        );
        assert!(scheduler.needs_recreate());
        assert!(backend.events.is_empty());

        backend.framebuffer = (800, 600);
        assert_eq!(
            scheduler.draw_frame(&mut backend, 0.0).unwrap(),
            FrameStatus::Recreated
        );
    }
}
