// SPDX-License-Identifier: CEPL-1.0
//! winit window driven by `pump_app_events`, so the engine owns its loop and
//! can either poll or block for events between frames.
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ember_render::{RenderSize, WindowSurface};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window as WinitWindow, WindowAttributes, WindowId},
};

pub struct Window {
    // window state drops before the loop that created it
    state: WindowState,
    event_loop: EventLoop<()>,
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<WinitWindow>,
    create_error: Option<winit::error::OsError>,
    extent: RenderSize,
    resized: bool,
    close_requested: bool,
}

impl WindowState {
    fn new(attributes: WindowAttributes, extent: RenderSize) -> Self {
        Self {
            attributes,
            window: None,
            create_error: None,
            extent,
            resized: false,
            close_requested: false,
        }
    }

    fn handle(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                self.extent = RenderSize::new(size.width, size.height);
                self.resized = true;
                debug!("resized → {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                self.extent = RenderSize::new(size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() == id) {
            self.handle(&event);
        }
    }
}

impl Window {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new().context("create event loop")?;
        let attributes = WinitWindow::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height));

        let mut window = Self {
            state: WindowState::new(attributes, RenderSize::new(width, height)),
            event_loop,
        };

        // the window only exists once the platform resumes us
        while window.state.window.is_none() {
            if let Some(e) = window.state.create_error.take() {
                return Err(e).context("create window");
            }
            if let PumpStatus::Exit(code) = window.pump(Some(Duration::ZERO)) {
                bail!("event loop exited ({code}) before the window was created");
            }
        }

        let e = window.state.extent;
        info!("window \"{title}\" created: {}x{}", e.width, e.height);
        Ok(window)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }

    /// Handle whatever events are pending without blocking.
    pub fn poll_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(Some(Duration::ZERO)) {
            self.state.close_requested = true;
        }
    }

    pub fn request_close(&mut self) {
        self.state.close_requested = true;
    }
}

impl WindowSurface for Window {
    fn extent(&self) -> RenderSize {
        self.state.extent
    }

    fn was_resized(&self) -> bool {
        self.state.resized
    }

    fn reset_resized(&mut self) {
        self.state.resized = false;
    }

    /// Blocks in the platform queue. Once the loop has exited this returns
    /// at once with the close latch set.
    fn wait_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(None) {
            self.state.close_requested = true;
        }
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}
