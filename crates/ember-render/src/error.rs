// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{op} failed: {result:?}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("surface unusable: {0}")]
    UnsupportedSurface(&'static str),

    #[error(
        "surface chain format changed on recreation \
         (color {old_color:?} -> {new_color:?}, depth {old_depth:?} -> {new_depth:?})"
    )]
    FormatChanged {
        old_color: vk::Format,
        new_color: vk::Format,
        old_depth: vk::Format,
        new_depth: vk::Format,
    },

    #[error("window closed before it had a drawable area")]
    WindowClosed,

    #[error("backend: {0}")]
    Backend(String),
}

impl RenderError {
    pub fn vk(op: &'static str, result: vk::Result) -> Self {
        RenderError::Vulkan { op, result }
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Attach an operation name to raw `vk::Result` errors.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn op(self, op: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::vk(op, result))
    }
}
