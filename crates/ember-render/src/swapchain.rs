// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::{ChainConfig, PresentStatus, RenderDevice, RenderTargets, SurfaceSupport};
use crate::error::{RenderError, RenderResult};
use crate::sync::FrameSync;
use crate::RenderSize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// Low latency without tearing when the surface offers it.
    #[default]
    Mailbox,
    /// Strict vsync.
    Fifo,
    /// Uncapped, may tear.
    Immediate,
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> RenderResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(RenderError::UnsupportedSurface("no surface formats"))
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match preference {
        PresentModePreference::Mailbox => &[vk::PresentModeKHR::MAILBOX],
        PresentModePreference::Fifo => &[],
        PresentModePreference::Immediate => {
            &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
        }
    };
    // FIFO is the one mode every surface must support
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == "no max").
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn negotiate(
    support: &SurfaceSupport,
    want: RenderSize,
    depth_format: vk::Format,
    preference: PresentModePreference,
) -> RenderResult<ChainConfig> {
    let caps = &support.capabilities;
    Ok(ChainConfig {
        extent: choose_extent(caps, want),
        min_image_count: choose_image_count(caps),
        surface_format: choose_surface_format(&support.formats)?,
        depth_format,
        present_mode: choose_present_mode(&support.present_modes, preference),
        pre_transform: caps.current_transform,
    })
}

/// The presentable surface chain: the backend's render targets plus the
/// synchronization set that paces acquire/submit/present against them.
pub struct SurfaceChain<D: RenderDevice> {
    // sync objects go before the targets they guard
    sync: FrameSync<D>,
    targets: D::Targets,
    device: Arc<D>,
}

impl<D: RenderDevice> SurfaceChain<D> {
    /// Negotiate and build a chain for `window_extent`.
    ///
    /// `previous` is only borrowed for the duration of the call: its
    /// presentation handle is named as the predecessor of the new one, and
    /// the caller decides when to drop it.
    pub fn new(
        device: Arc<D>,
        window_extent: RenderSize,
        preference: PresentModePreference,
        previous: Option<&SurfaceChain<D>>,
    ) -> RenderResult<Self> {
        let support = device.surface_support()?;
        let depth_format = device.depth_format()?;
        let config = negotiate(&support, window_extent, depth_format, preference)?;

        let targets = device.create_targets(&config, previous.map(|p| &p.targets))?;
        let sync = FrameSync::new(device.as_ref(), targets.image_count())?;

        info!(
            "surface chain ready: {}x{}, color {:?}, depth {:?}, {:?}, {} images{}",
            targets.extent().width,
            targets.extent().height,
            targets.color_format(),
            targets.depth_format(),
            config.present_mode,
            targets.image_count(),
            if previous.is_some() { " (recreated)" } else { "" }
        );

        Ok(Self {
            sync,
            targets,
            device,
        })
    }

    /// Whether color and depth formats match, i.e. render passes and
    /// pipelines built against one chain stay compatible with the other.
    pub fn compare_formats(&self, other: &SurfaceChain<D>) -> bool {
        self.targets.color_format() == other.targets.color_format()
            && self.targets.depth_format() == other.targets.depth_format()
    }

    /// Wait for the current slot's previous submission, then acquire.
    pub fn acquire_next_image(&mut self) -> RenderResult<(u32, PresentStatus)> {
        let slot = self.sync.current_slot();
        self.device.wait_for_fence(self.sync.in_flight(slot))?;

        let (image_index, status) = self
            .device
            .acquire_next_image(&self.targets, self.sync.image_available(slot))?;

        debug_assert!(
            status == PresentStatus::OutOfDate || (image_index as usize) < self.image_count(),
            "acquired image {image_index} out of range"
        );
        Ok((image_index, status))
    }

    /// Submit `cmd` for `image_index` and present it.
    ///
    /// The slot advances after the present request whatever it reports; a
    /// failed queue submission is returned before anything is presented.
    pub fn submit(
        &mut self,
        cmd: D::CommandBuffer,
        image_index: u32,
    ) -> RenderResult<PresentStatus> {
        let slot = self.sync.current_slot();
        let image = image_index as usize;

        if let Some(owner) = self.sync.image_owner(image) {
            self.device.wait_for_fence(self.sync.in_flight(owner))?;
        }
        self.sync.claim_image(image);

        let fence = self.sync.in_flight(slot);
        self.device.reset_fence(fence)?;
        self.device.submit(
            cmd,
            self.sync.image_available(slot),
            self.sync.render_finished(slot),
            fence,
        )?;

        let status = self
            .device
            .present(&self.targets, image_index, self.sync.render_finished(slot));
        self.sync.advance();
        status
    }

    pub fn targets(&self) -> &D::Targets {
        &self.targets
    }

    pub fn sync(&self) -> &FrameSync<D> {
        &self.sync
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.sync.current_slot()
    }

    pub fn slot_count(&self) -> usize {
        self.sync.slot_count()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    pub fn image_count(&self) -> usize {
        self.targets.image_count()
    }

    pub fn color_format(&self) -> vk::Format {
        self.targets.color_format()
    }

    pub fn depth_format(&self) -> vk::Format {
        self.targets.depth_format()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let e = self.extent();
        e.width as f32 / e.height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};
    use crate::MAX_FRAMES_IN_FLIGHT;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            fmt(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            ),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        let fifo_only = [vk::PresentModeKHR::FIFO];

        assert_eq!(
            choose_present_mode(&all, PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&fifo_only, PresentModePreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, PresentModePreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&fifo_only, PresentModePreference::Immediate),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_fixed_surface_size() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn extent_clamps_window_size() {
        let c = caps(2, 3);
        let e = choose_extent(&c, RenderSize::new(8000, 4));
        assert_eq!((e.width, e.height), (4096, 16));
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn chain_invariants_hold() {
        let device = Arc::new(MockDevice::new());
        let chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();

        assert_eq!(chain.image_count(), 3);
        assert_eq!(chain.targets().framebuffer_count(), chain.image_count());
        assert_eq!(chain.sync().image_count(), chain.image_count());
        assert_eq!(chain.slot_count(), MAX_FRAMES_IN_FLIGHT);
        assert_eq!((chain.extent().width, chain.extent().height), (800, 600));
    }

    #[test]
    fn compare_formats_is_reflexive_and_detects_changes() {
        let device = Arc::new(MockDevice::new());
        let size = RenderSize::new(800, 600);
        let pref = PresentModePreference::Mailbox;

        let a = SurfaceChain::new(device.clone(), size, pref, None).unwrap();
        assert!(a.compare_formats(&a));

        let same = SurfaceChain::new(device.clone(), size, pref, Some(&a)).unwrap();
        assert!(a.compare_formats(&same));

        device.set_depth_format(vk::Format::D24_UNORM_S8_UINT);
        let depth_changed = SurfaceChain::new(device.clone(), size, pref, Some(&a)).unwrap();
        assert!(!a.compare_formats(&depth_changed));

        device.set_depth_format(vk::Format::D32_SFLOAT);
        device.set_formats(vec![fmt(
            vk::Format::R8G8B8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )]);
        let color_changed = SurfaceChain::new(device.clone(), size, pref, Some(&a)).unwrap();
        assert!(!a.compare_formats(&color_changed));
        assert!(!color_changed.compare_formats(&a));
    }

    #[test]
    fn predecessor_is_named_on_recreation() {
        let device = Arc::new(MockDevice::new());
        let size = RenderSize::new(800, 600);
        let pref = PresentModePreference::Mailbox;

        let first = SurfaceChain::new(device.clone(), size, pref, None).unwrap();
        let second = SurfaceChain::new(device.clone(), size, pref, Some(&first)).unwrap();

        assert_eq!(first.targets().previous, None);
        assert_eq!(second.targets().previous, Some(first.targets().id));
    }

    #[test]
    fn failed_construction_leaks_nothing() {
        let device = Arc::new(MockDevice::new());
        device.fail_fence_creation_at(1);
        let res = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        );
        assert!(res.is_err());
        assert_eq!(device.live(), 0);
    }

    #[test]
    fn acquire_waits_on_slot_fence_first() {
        let device = Arc::new(MockDevice::new());
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let fence = chain.sync().in_flight(0).id;
        let sem = chain.sync().image_available(0).id;
        device.clear_calls();

        let (index, status) = chain.acquire_next_image().unwrap();
        assert_eq!((index, status), (0, PresentStatus::Ok));
        assert_eq!(
            device.calls(),
            vec![Call::WaitFence(fence), Call::Acquire { signal: sem }]
        );
    }

    #[test]
    fn submit_waits_on_stale_image_fence_before_reset() {
        let device = Arc::new(MockDevice::new());
        // image 1 comes back on the third frame, still owned by slot 1
        device.script_acquire([0, 1, 1]);
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let f0 = chain.sync().in_flight(0).id;
        let f1 = chain.sync().in_flight(1).id;

        for _ in 0..2 {
            let (i, _) = chain.acquire_next_image().unwrap();
            chain.submit(7, i).unwrap();
        }
        let (i, _) = chain.acquire_next_image().unwrap();
        assert_eq!((i, chain.current_slot()), (1, 0));
        device.clear_calls();

        chain.submit(7, i).unwrap();
        let calls = device.calls();
        let wait_stale = calls.iter().position(|c| *c == Call::WaitFence(f1));
        let reset_own = calls.iter().position(|c| *c == Call::ResetFence(f0));
        assert!(wait_stale.is_some() && reset_own.is_some());
        assert!(wait_stale < reset_own);
        assert_eq!(chain.sync().image_owner(1), Some(0));
        assert_eq!(chain.current_slot(), 1);
    }

    #[test]
    fn revisited_image_blocks_on_its_pending_fence() {
        let device = Arc::new(MockDevice::new());
        device.complete_on_wait();
        device.script_acquire([0, 1, 1]);
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let f0 = chain.sync().in_flight(0).id;
        let f1 = chain.sync().in_flight(1).id;

        for _ in 0..2 {
            let (i, _) = chain.acquire_next_image().unwrap();
            chain.submit(7, i).unwrap();
        }
        assert!(chain.sync().in_flight(1).pending());
        assert!(!chain.sync().in_flight(1).signaled());

        // slot 0's own fence is still in flight when its next acquire starts
        let (i, _) = chain.acquire_next_image().unwrap();
        assert_eq!(device.pending_waits(), vec![f0]);
        // image 1 still belongs to slot 1's unfinished submission
        device.clear_calls();
        chain.submit(7, i).unwrap();

        assert_eq!(device.pending_waits(), vec![f0, f1]);
        let calls = device.calls();
        assert_eq!(calls[0], Call::WaitFence(f1));
        assert_eq!(calls[1], Call::ResetFence(f0));
        assert!(chain.sync().in_flight(1).signaled());
    }

    #[test]
    fn fresh_image_skips_image_fence_wait() {
        let device = Arc::new(MockDevice::new());
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let (i, _) = chain.acquire_next_image().unwrap();
        device.clear_calls();
        chain.submit(3, i).unwrap();

        let calls = device.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::WaitFence(_))));
        assert!(matches!(calls[0], Call::ResetFence(_)));
        assert!(matches!(calls[1], Call::Submit { cmd: 3, .. }));
        assert!(matches!(calls[2], Call::Present { image: 0, .. }));
    }

    #[test]
    fn slot_advances_even_when_present_is_stale() {
        let device = Arc::new(MockDevice::new());
        device.script_present([PresentStatus::OutOfDate]);
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let (i, _) = chain.acquire_next_image().unwrap();
        let status = chain.submit(1, i).unwrap();
        assert_eq!(status, PresentStatus::OutOfDate);
        assert_eq!(chain.current_slot(), 1);
    }

    #[test]
    fn submit_signals_and_waits_on_slot_semaphores() {
        let device = Arc::new(MockDevice::new());
        let mut chain = SurfaceChain::new(
            device.clone(),
            RenderSize::new(800, 600),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        let available = chain.sync().image_available(0).id;
        let finished = chain.sync().render_finished(0).id;
        let fence = chain.sync().in_flight(0).id;

        let (i, _) = chain.acquire_next_image().unwrap();
        device.clear_calls();
        chain.submit(9, i).unwrap();

        assert!(device.calls().contains(&Call::Submit {
            cmd: 9,
            wait: available,
            signal: finished,
            fence,
        }));
        assert!(device.calls().contains(&Call::Present {
            image: i,
            wait: finished,
        }));
    }
}
