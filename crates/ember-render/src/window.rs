// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;

/// What the frame lifecycle needs from the window it presents into.
pub trait WindowSurface {
    /// Current drawable size in physical pixels.
    fn extent(&self) -> RenderSize;

    /// Edge-triggered: true once a resize happened since the last reset.
    fn was_resized(&self) -> bool;
    fn reset_resized(&mut self);

    /// Block until the platform delivers at least one event.
    fn wait_events(&mut self);

    /// The user or platform asked for the window to go away. Blocking
    /// waits give up once this is set.
    fn should_close(&self) -> bool;
}
