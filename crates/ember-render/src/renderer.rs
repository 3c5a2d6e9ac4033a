// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::device::{ClearValues, PresentStatus, RenderDevice};
use crate::error::{RenderError, RenderResult};
use crate::swapchain::{PresentModePreference, SurfaceChain};
use crate::window::WindowSurface;
use crate::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, Default)]
pub struct RendererConfig {
    pub clear_color: Option<[f32; 4]>,
    pub present_mode: PresentModePreference,
}

/// Frame orchestrator: owns the surface chain and one command buffer per
/// in-flight slot, and runs the begin/end frame protocol.
///
/// A frame is `begin_frame` → `begin_render_pass` → draws →
/// `end_render_pass` → `end_frame`. Calling these out of order is a bug in
/// the caller and panics. Stale or suboptimal surfaces are handled here by
/// rebuilding the chain; only unrecoverable failures come back as errors.
pub struct Renderer<D: RenderDevice> {
    command_buffers: Vec<D::CommandBuffer>,
    chain: SurfaceChain<D>,
    device: Arc<D>,

    clear: ClearValues,
    present_mode: PresentModePreference,

    current_image: u32,
    frame_index: usize,
    frame_in_progress: bool,
    recreations: u64,
}

impl<D: RenderDevice> Renderer<D> {
    pub fn new<W: WindowSurface>(
        device: Arc<D>,
        window: &mut W,
        config: RendererConfig,
    ) -> RenderResult<Self> {
        let size = wait_for_drawable_size(window).ok_or(RenderError::WindowClosed)?;
        window.reset_resized();
        let chain = SurfaceChain::new(device.clone(), size, config.present_mode, None)?;
        let command_buffers = device.allocate_command_buffers(chain.slot_count())?;

        let mut clear = ClearValues::default();
        if let Some(color) = config.clear_color {
            clear.color = color;
        }

        Ok(Self {
            command_buffers,
            chain,
            device,
            clear,
            present_mode: config.present_mode,
            current_image: 0,
            frame_index: 0,
            frame_in_progress: false,
            recreations: 0,
        })
    }

    /// Acquire the next image and start recording.
    ///
    /// Returns `Ok(None)` when the surface was out of date; the chain has
    /// been rebuilt and the caller should try again on its next iteration.
    pub fn begin_frame<W: WindowSurface>(
        &mut self,
        window: &mut W,
    ) -> RenderResult<Option<D::CommandBuffer>> {
        assert!(
            !self.frame_in_progress,
            "begin_frame called while a frame is already in progress"
        );

        let (image_index, status) = self.chain.acquire_next_image()?;
        match status {
            PresentStatus::OutOfDate => {
                self.recreate_chain(window)?;
                return Ok(None);
            }
            PresentStatus::Suboptimal => debug!("acquire: suboptimal surface, rendering anyway"),
            PresentStatus::Ok => {}
        }

        self.current_image = image_index;
        self.frame_in_progress = true;

        let cmd = self.current_command_buffer();
        self.device.begin_commands(cmd)?;
        Ok(Some(cmd))
    }

    /// Finish recording, submit and present, rebuilding the chain when the
    /// surface went stale or the window was resized.
    pub fn end_frame<W: WindowSurface>(&mut self, window: &mut W) -> RenderResult<()> {
        assert!(
            self.frame_in_progress,
            "end_frame called while no frame is in progress"
        );

        let cmd = self.current_command_buffer();
        self.device.end_commands(cmd)?;
        let status = self.chain.submit(cmd, self.current_image)?;

        self.frame_in_progress = false;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        if status.needs_recreate() || window.was_resized() {
            debug!(?status, resized = window.was_resized(), "present asks for a new chain");
            self.recreate_chain(window)?;
        }
        Ok(())
    }

    pub fn begin_render_pass(&self, cmd: D::CommandBuffer) {
        self.assert_active(cmd, "begin_render_pass");
        self.device
            .cmd_begin_render_pass(cmd, self.chain.targets(), self.current_image, &self.clear);
        // pipelines are built with dynamic viewport/scissor, so a resize
        // does not need a pipeline rebuild
        self.device
            .cmd_set_viewport_and_scissor(cmd, self.chain.extent());
    }

    pub fn end_render_pass(&self, cmd: D::CommandBuffer) {
        self.assert_active(cmd, "end_render_pass");
        self.device.cmd_end_render_pass(cmd);
    }

    pub fn current_command_buffer(&self) -> D::CommandBuffer {
        assert!(
            self.frame_in_progress,
            "no command buffer outside of a frame"
        );
        self.command_buffers[self.frame_index]
    }

    /// Index of the in-flight slot being recorded, for double-buffered
    /// per-frame resources.
    pub fn frame_index(&self) -> usize {
        assert!(self.frame_in_progress, "no frame index outside of a frame");
        self.frame_index
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    pub fn chain(&self) -> &SurfaceChain<D> {
        &self.chain
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.chain.aspect_ratio()
    }

    pub fn recreation_count(&self) -> u64 {
        self.recreations
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear.color = rgba;
    }

    fn assert_active(&self, cmd: D::CommandBuffer, what: &str) {
        assert!(
            self.frame_in_progress,
            "{what} called while no frame is in progress"
        );
        assert!(
            cmd == self.current_command_buffer(),
            "{what} called with a command buffer from a different frame"
        );
    }

    /// Rebuild the chain at the window's current size. Does nothing when
    /// the window closes while minimized; the old chain stays until drop.
    fn recreate_chain<W: WindowSurface>(&mut self, window: &mut W) -> RenderResult<()> {
        let Some(size) = wait_for_drawable_size(window) else {
            debug!("window closing, chain rebuild skipped");
            return Ok(());
        };
        // this rebuild already covers any resize seen so far
        window.reset_resized();
        self.device.wait_idle()?;

        let next = SurfaceChain::new(
            self.device.clone(),
            size,
            self.present_mode,
            Some(&self.chain),
        )?;
        if !self.chain.compare_formats(&next) {
            return Err(RenderError::FormatChanged {
                old_color: self.chain.color_format(),
                new_color: next.color_format(),
                old_depth: self.chain.depth_format(),
                new_depth: next.depth_format(),
            });
        }
        // old chain dropped here, after the new one took over its images
        self.chain = next;

        if self.command_buffers.len() != self.chain.slot_count() {
            self.device.free_command_buffers(&self.command_buffers);
            self.command_buffers = self
                .device
                .allocate_command_buffers(self.chain.slot_count())?;
        }

        self.recreations += 1;
        info!(
            "surface chain recreated ({}x{}, #{})",
            self.chain.extent().width,
            self.chain.extent().height,
            self.recreations
        );
        Ok(())
    }
}

impl<D: RenderDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle on renderer teardown: {e}");
        }
        self.device.free_command_buffers(&self.command_buffers);
    }
}

/// Block on window events while the window has no drawable area. `None`
/// when the window is asked to close first.
fn wait_for_drawable_size<W: WindowSurface>(window: &mut W) -> Option<crate::RenderSize> {
    loop {
        if window.should_close() {
            return None;
        }
        let size = window.extent();
        if !size.is_degenerate() {
            return Some(size);
        }
        window.wait_events();
    }
}
