// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral frame lifecycle: surface chain negotiation, per-slot
//! synchronization and the begin/end frame state machine.
//!
//! Backends implement [`RenderDevice`]; windows implement [`WindowSurface`].
#![deny(unsafe_op_in_unsafe_fn)]

pub mod device;
pub mod error;
pub mod renderer;
pub mod swapchain;
pub mod sync;
pub mod window;

#[cfg(test)]
mod mock;

pub use device::{
    ChainConfig, ClearValues, PresentStatus, RenderDevice, RenderTargets, SurfaceSupport,
};
pub use error::{RenderError, RenderResult};
pub use renderer::{Renderer, RendererConfig};
pub use swapchain::{PresentModePreference, SurfaceChain};
pub use sync::FrameSync;
pub use window::WindowSurface;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero in either dimension, e.g. a minimized window.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
