// Platform - winit windowing behind the SurfaceProvider trait
//
// The event loop is pumped by the engine's own frame loop instead of
// driving the application through `run_app`, so draw() stays a plain call.
// Only one `Platform` may exist per process; every `Window` owns it.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{WindowAttributes, WindowId},
};

use crate::backend::SurfaceProvider;
use crate::config::WindowConfig;
use crate::error::RendererError;

static PLATFORM_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on a process-wide flag, released on drop
#[derive(Debug)]
struct SingleInit {
    flag: &'static AtomicBool,
}

impl SingleInit {
    fn acquire(flag: &'static AtomicBool) -> Result<Self, RendererError> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(RendererError::PlatformAlreadyInitialized);
        }
        Ok(Self { flag })
    }
}

impl Drop for SingleInit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Windowing context. Create before any window, drop after the last one.
pub struct Platform {
    event_loop: EventLoop<()>,
    _claim: SingleInit,
}

impl Platform {
    pub fn init() -> Result<Self> {
        let claim = SingleInit::acquire(&PLATFORM_ACTIVE)?;
        let event_loop = EventLoop::new().context("Failed to create event loop")?;

        log::debug!("Windowing platform initialized");
        Ok(Self {
            event_loop,
            _claim: claim,
        })
    }

    fn pump(&mut self, timeout: Duration, events: &mut WindowEvents) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(Some(timeout), events) {
            log::debug!("Event loop exited with code {}", code);
            events.close_requested = true;
        }
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        log::debug!("Windowing platform terminated");
    }
}

/// Escape closes the window, like the native close button
fn is_close_key(key: PhysicalKey, state: ElementState) -> bool {
    state == ElementState::Pressed && key == PhysicalKey::Code(KeyCode::Escape)
}

/// Event handler state shared with winit while pumping
#[derive(Default)]
struct WindowEvents {
    pending: Option<WindowAttributes>,
    created: Option<winit::window::Window>,
    create_error: Option<winit::error::OsError>,
    close_requested: bool,
}

impl ApplicationHandler for WindowEvents {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.pending.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.created = Some(window),
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. }
                if is_close_key(event.physical_key, event.state) =>
            {
                log::info!("ESC pressed, exiting...");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }
}

/// A fixed-size native window
pub struct Window {
    // Declared before the platform: the native window goes first
    handle: winit::window::Window,
    events: WindowEvents,
    platform: Platform,
}

impl Window {
    /// Open a non-resizable window, pumping events until it exists
    pub fn open(mut platform: Platform, config: &WindowConfig) -> Result<Self> {
        let attributes = winit::window::Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(false);

        let mut events = WindowEvents {
            pending: Some(attributes),
            ..Default::default()
        };

        let handle = loop {
            platform.pump(Duration::from_millis(10), &mut events);

            if let Some(e) = events.create_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let Some(handle) = events.created.take() {
                break handle;
            }
            if events.close_requested {
                return Err(RendererError::WindowClosed.into());
            }
        };

        log::info!(
            "Window: {}x{} ({})",
            config.width,
            config.height,
            config.title
        );

        Ok(Self {
            handle,
            events,
            platform,
        })
    }
}

impl SurfaceProvider for Window {
    fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        let extensions =
            ash_window::enumerate_required_extensions(self.handle.raw_display_handle())
                .context("Failed to query surface extensions")?;
        Ok(extensions)
    }

    unsafe fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let surface = ash_window::create_surface(
            entry,
            instance,
            self.handle.raw_display_handle(),
            self.handle.raw_window_handle(),
            None,
        )
        .context("Failed to create window surface")?;
        Ok(surface)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.handle.inner_size();
        (size.width, size.height)
    }

    fn poll_events(&mut self) {
        self.platform.pump(Duration::ZERO, &mut self.events);
    }

    fn should_close(&self) -> bool {
        self.events.close_requested
    }

    fn swap_buffers(&mut self) {
        self.handle.request_redraw();
    }
}
