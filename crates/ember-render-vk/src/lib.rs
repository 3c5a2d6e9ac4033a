// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: an ash implementation of [`ember_render::RenderDevice`]
//! plus the draw path used by the app: per-frame global uniforms at set 0
//! and per-object push constants.
#![deny(unsafe_op_in_unsafe_fn)]

mod context;
mod debug;
mod device;
pub mod mesh;
pub mod pipeline;
pub mod render_system;
pub mod resources;
mod targets;
pub mod uniforms;

pub use context::{ContextOptions, VkContext};
pub use mesh::{Mesh, Vertex};
pub use pipeline::{GraphicsPipeline, PipelineConfig};
pub use render_system::{FrameInfo, PushConstants, SimpleRenderSystem};
pub use targets::VkTargets;
pub use uniforms::{FrameUniforms, GlobalUbo};
