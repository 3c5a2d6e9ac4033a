// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`RenderDevice`] and [`WindowSurface`] for exercising the frame
//! lifecycle without a GPU. Every device call is logged so tests can check
//! ordering, and every object carries a live token so leaks show up.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;

use crate::device::{
    ChainConfig, ClearValues, PresentStatus, RenderDevice, RenderTargets, SurfaceSupport,
};
use crate::error::{RenderError, RenderResult};
use crate::window::WindowSurface;
use crate::RenderSize;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateTargets { id: usize, previous: Option<usize> },
    WaitFence(usize),
    ResetFence(usize),
    Acquire { signal: usize },
    Submit {
        cmd: u32,
        wait: usize,
        signal: usize,
        fence: usize,
    },
    Present { image: u32, wait: usize },
    WaitIdle,
    Allocate(usize),
    Free(usize),
    Begin(u32),
    End(u32),
    BeginPass {
        cmd: u32,
        image: u32,
        clear_color: [f32; 4],
        depth: f32,
    },
    Viewport { cmd: u32, width: u32, height: u32 },
    EndPass(u32),
}

struct LiveToken {
    counters: Vec<Arc<AtomicUsize>>,
}

impl LiveToken {
    fn new(counters: Vec<Arc<AtomicUsize>>) -> Self {
        for c in &counters {
            c.fetch_add(1, Ordering::SeqCst);
        }
        Self { counters }
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        for c in &self.counters {
            c.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct MockSemaphore {
    pub id: usize,
    _live: LiveToken,
}

pub struct MockFence {
    pub id: usize,
    signaled: AtomicBool,
    // submitted, not yet observed complete
    pending: AtomicBool,
    _live: LiveToken,
}

impl MockFence {
    pub fn signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

pub struct MockTargets {
    pub id: usize,
    pub previous: Option<usize>,
    extent: vk::Extent2D,
    color_format: vk::Format,
    depth_format: vk::Format,
    image_count: usize,
    _live: LiveToken,
}

impl RenderTargets for MockTargets {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    fn color_format(&self) -> vk::Format {
        self.color_format
    }
    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
    fn image_count(&self) -> usize {
        self.image_count
    }
    fn framebuffer_count(&self) -> usize {
        self.image_count
    }
}

struct State {
    calls: Vec<Call>,
    next_id: usize,
    next_cmd: u32,
    next_image: u32,

    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    depth_format: vk::Format,

    acquire_script: VecDeque<(u32, PresentStatus)>,
    present_script: VecDeque<PresentStatus>,
    acquire_failure: Option<vk::Result>,
    fence_failure_countdown: Option<usize>,

    complete_on_wait: bool,
    pending_waits: Vec<usize>,
}

pub struct MockDevice {
    state: Mutex<State>,
    live: Arc<AtomicUsize>,
    live_targets: Arc<AtomicUsize>,
}

impl MockDevice {
    /// Surface with no fixed extent, min 2 images and no max, sRGB BGRA
    /// color and a 32-bit float depth format.
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 16384,
                height: 16384,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                next_id: 1,
                next_cmd: 0,
                next_image: 0,
                capabilities,
                formats,
                depth_format: vk::Format::D32_SFLOAT,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                acquire_failure: None,
                fence_failure_countdown: None,
                complete_on_wait: false,
                pending_waits: Vec::new(),
            }),
            live: Arc::new(AtomicUsize::new(0)),
            live_targets: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn next_id(&self) -> usize {
        let mut s = self.state();
        let id = s.next_id;
        s.next_id += 1;
        id
    }

    /// Semaphores, fences and targets currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn live_targets(&self) -> usize {
        self.live_targets.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Make the `n`th fence created from now on fail (1-based).
    pub fn fail_fence_creation_at(&self, n: usize) {
        self.state().fence_failure_countdown = Some(n);
    }

    /// Leave submitted fences unsignaled until someone waits on them, so
    /// every wait on a recent submission has to block.
    pub fn complete_on_wait(&self) {
        self.state().complete_on_wait = true;
    }

    /// Fences that were still pending when a wait on them was issued.
    pub fn pending_waits(&self) -> Vec<usize> {
        self.state().pending_waits.clone()
    }

    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state().acquire_failure = Some(result);
    }

    pub fn set_depth_format(&self, format: vk::Format) {
        self.state().depth_format = format;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state().formats = formats;
    }

    pub fn set_max_image_count(&self, max: u32) {
        self.state().capabilities.max_image_count = max;
    }

    /// Image indices the next acquires return, each with `Ok`.
    pub fn script_acquire(&self, images: impl IntoIterator<Item = u32>) {
        self.script_acquire_results(images.into_iter().map(|i| (i, PresentStatus::Ok)));
    }

    pub fn script_acquire_results(
        &self,
        results: impl IntoIterator<Item = (u32, PresentStatus)>,
    ) {
        self.state().acquire_script.extend(results);
    }

    pub fn script_present(&self, statuses: impl IntoIterator<Item = PresentStatus>) {
        self.state().present_script.extend(statuses);
    }
}

impl RenderDevice for MockDevice {
    type Semaphore = MockSemaphore;
    type Fence = MockFence;
    type CommandBuffer = u32;
    type Targets = MockTargets;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let s = self.state();
        Ok(SurfaceSupport {
            capabilities: s.capabilities,
            formats: s.formats.clone(),
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        })
    }

    fn depth_format(&self) -> RenderResult<vk::Format> {
        Ok(self.state().depth_format)
    }

    fn create_targets(
        &self,
        config: &ChainConfig,
        previous: Option<&MockTargets>,
    ) -> RenderResult<MockTargets> {
        let id = self.next_id();
        let previous = previous.map(|p| p.id);
        self.record(Call::CreateTargets { id, previous });

        Ok(MockTargets {
            id,
            previous,
            extent: config.extent,
            color_format: config.surface_format.format,
            depth_format: config.depth_format,
            image_count: config.min_image_count as usize,
            _live: LiveToken::new(vec![self.live.clone(), self.live_targets.clone()]),
        })
    }

    fn create_semaphore(&self) -> RenderResult<MockSemaphore> {
        Ok(MockSemaphore {
            id: self.next_id(),
            _live: LiveToken::new(vec![self.live.clone()]),
        })
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<MockFence> {
        {
            let mut s = self.state();
            match s.fence_failure_countdown {
                Some(1) => {
                    s.fence_failure_countdown = None;
                    return Err(RenderError::vk(
                        "vkCreateFence",
                        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                    ));
                }
                Some(n) => s.fence_failure_countdown = Some(n - 1),
                None => {}
            }
        }
        Ok(MockFence {
            id: self.next_id(),
            signaled: AtomicBool::new(signaled),
            pending: AtomicBool::new(false),
            _live: LiveToken::new(vec![self.live.clone()]),
        })
    }

    fn wait_for_fence(&self, fence: &MockFence) -> RenderResult<()> {
        assert!(
            fence.signaled() || fence.pending(),
            "waiting on fence {} that nothing will signal",
            fence.id
        );
        let mut s = self.state();
        s.calls.push(Call::WaitFence(fence.id));
        if fence.pending.swap(false, Ordering::SeqCst) {
            s.pending_waits.push(fence.id);
            fence.signaled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn reset_fence(&self, fence: &MockFence) -> RenderResult<()> {
        assert!(
            !fence.pending(),
            "resetting fence {} while its submission is pending",
            fence.id
        );
        fence.signaled.store(false, Ordering::SeqCst);
        self.record(Call::ResetFence(fence.id));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        targets: &MockTargets,
        signal: &MockSemaphore,
    ) -> RenderResult<(u32, PresentStatus)> {
        let mut s = self.state();
        if let Some(result) = s.acquire_failure.take() {
            return Err(RenderError::vk("vkAcquireNextImageKHR", result));
        }
        s.calls.push(Call::Acquire { signal: signal.id });

        if let Some(scripted) = s.acquire_script.pop_front() {
            return Ok(scripted);
        }
        let image = s.next_image % targets.image_count as u32;
        s.next_image = s.next_image.wrapping_add(1);
        Ok((image, PresentStatus::Ok))
    }

    fn submit(
        &self,
        cmd: u32,
        wait: &MockSemaphore,
        signal: &MockSemaphore,
        fence: &MockFence,
    ) -> RenderResult<()> {
        self.record(Call::Submit {
            cmd,
            wait: wait.id,
            signal: signal.id,
            fence: fence.id,
        });
        if self.state().complete_on_wait {
            fence.pending.store(true, Ordering::SeqCst);
        } else {
            // work completes instantly
            fence.signaled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn present(
        &self,
        _targets: &MockTargets,
        image_index: u32,
        wait: &MockSemaphore,
    ) -> RenderResult<PresentStatus> {
        let mut s = self.state();
        s.calls.push(Call::Present {
            image: image_index,
            wait: wait.id,
        });
        Ok(s.present_script.pop_front().unwrap_or(PresentStatus::Ok))
    }

    fn wait_idle(&self) -> RenderResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn allocate_command_buffers(&self, count: usize) -> RenderResult<Vec<u32>> {
        let mut s = self.state();
        s.calls.push(Call::Allocate(count));
        let first = s.next_cmd;
        s.next_cmd += count as u32;
        Ok((first..first + count as u32).collect())
    }

    fn free_command_buffers(&self, buffers: &[u32]) {
        self.record(Call::Free(buffers.len()));
    }

    fn begin_commands(&self, cmd: u32) -> RenderResult<()> {
        self.record(Call::Begin(cmd));
        Ok(())
    }

    fn end_commands(&self, cmd: u32) -> RenderResult<()> {
        self.record(Call::End(cmd));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: u32,
        _targets: &MockTargets,
        image_index: u32,
        clear: &ClearValues,
    ) {
        self.record(Call::BeginPass {
            cmd,
            image: image_index,
            clear_color: clear.color,
            depth: clear.depth,
        });
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: u32, extent: vk::Extent2D) {
        self.record(Call::Viewport {
            cmd,
            width: extent.width,
            height: extent.height,
        });
    }

    fn cmd_end_render_pass(&self, cmd: u32) {
        self.record(Call::EndPass(cmd));
    }
}

/// Window stand-in with a settable size and resize flag.
pub struct MockWindow {
    extent: RenderSize,
    resized: bool,
    restore: Option<(usize, RenderSize)>,
    close_at: Option<usize>,
    closed: bool,
    pub waits: usize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: RenderSize::new(width, height),
            resized: false,
            restore: None,
            close_at: None,
            closed: false,
            waits: 0,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = RenderSize::new(width, height);
        self.resized = true;
    }

    /// Collapse to 0x0 and come back at `size` after `waits` blocking waits.
    pub fn minimize_then_restore(&mut self, waits: usize, size: RenderSize) {
        self.extent = RenderSize::default();
        self.resized = true;
        self.restore = Some((self.waits + waits, size));
    }

    /// Collapse to 0x0 and get a close request after `waits` blocking waits.
    pub fn minimize_then_close(&mut self, waits: usize) {
        self.extent = RenderSize::default();
        self.resized = true;
        self.close_at = Some(self.waits + waits);
    }
}

impl WindowSurface for MockWindow {
    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized(&mut self) {
        self.resized = false;
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some((at, size)) = self.restore {
            if self.waits >= at {
                self.extent = size;
                self.restore = None;
            }
        }
        if self.close_at.is_some_and(|at| self.waits >= at) {
            self.closed = true;
        }
    }

    fn should_close(&self) -> bool {
        self.closed
    }
}
