// src/session/egl.rs

//! EGL context bring-up over a GBM display, loaded dynamically at runtime.
//!
//! The config chosen for the context must report the surface's DRM fourcc as
//! its `NATIVE_VISUAL_ID`; a mismatched config renders fine but produces
//! buffers the controller refuses to scan out.

use std::ffi::c_void;

use khronos_egl as egl;
use log::{debug, warn};

use crate::error::SessionError;
use crate::session::backend::PixelFormat;

/// EGL_PLATFORM_GBM_KHR, not exported by the bindings.
const PLATFORM_GBM_KHR: egl::Enum = 0x31D7;

type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

/// An initialized EGL display, context and window surface.
///
/// `native_display` and `native_window` must be live GBM device and surface
/// pointers for as long as this context exists.
pub struct GpuContext {
    instance: EglInstance,
    display: egl::Display,
    context: Option<egl::Context>,
    surface: Option<egl::Surface>,
}

impl GpuContext {
    pub fn new(
        native_display: *mut c_void,
        native_window: *mut c_void,
        format: PixelFormat,
    ) -> Result<Self, SessionError> {
        let instance = unsafe { EglInstance::load_required() }
            .map_err(|e| SessionError::GraphicsContextError(format!("libEGL load: {}", e)))?;

        let display = unsafe {
            instance.get_platform_display(PLATFORM_GBM_KHR, native_display, &[egl::ATTRIB_NONE])
        }
        .map_err(|e| SessionError::GraphicsContextError(format!("get_platform_display: {}", e)))?;

        let (major, minor) = instance
            .initialize(display)
            .map_err(|e| SessionError::GraphicsContextError(format!("initialize: {}", e)))?;
        debug!("EGL {}.{} initialized", major, minor);

        let config = Self::choose_config(&instance, display, format)?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = instance
            .create_context(display, config, None, &context_attribs)
            .map_err(|e| SessionError::GraphicsContextError(format!("create_context: {}", e)))?;

        let surface = unsafe {
            instance.create_window_surface(display, config, native_window, None)
        }
        .map_err(|e| {
            SessionError::GraphicsContextError(format!("create_window_surface: {}", e))
        })?;

        instance
            .make_current(display, Some(surface), Some(surface), Some(context))
            .map_err(|e| SessionError::GraphicsContextError(format!("make_current: {}", e)))?;

        // Keep the back buffer intact across swaps so the composed frame
        // can still be read back afterwards. Best effort; without it only
        // screenshot capture on the direct render path degrades.
        if let Err(e) =
            instance.surface_attrib(display, surface, egl::SWAP_BEHAVIOR, egl::BUFFER_PRESERVED)
        {
            warn!("Failed to request preserved swaps: {}", e);
        }

        // Tie buffer exchange to the display's vertical refresh.
        if let Err(e) = instance.swap_interval(display, 1) {
            warn!("Failed to set swap interval: {}", e);
        }

        Ok(GpuContext {
            instance,
            display,
            context: Some(context),
            surface: Some(surface),
        })
    }

    /// Picks a window-renderable ES2 RGB888 config whose native visual id is
    /// exactly the surface's fourcc.
    fn choose_config(
        instance: &EglInstance,
        display: egl::Display,
        format: PixelFormat,
    ) -> Result<egl::Config, SessionError> {
        let attribs = [
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let mut configs = Vec::with_capacity(64);
        instance
            .choose_config(display, &attribs, &mut configs)
            .map_err(|e| SessionError::GraphicsContextError(format!("choose_config: {}", e)))?;

        let wanted = format.fourcc() as egl::Int;
        for config in &configs {
            match instance.get_config_attrib(display, *config, egl::NATIVE_VISUAL_ID) {
                Ok(visual) if visual == wanted => return Ok(*config),
                Ok(_) => {}
                Err(e) => warn!("get_config_attrib failed: {}", e),
            }
        }
        Err(SessionError::GraphicsContextError(format!(
            "no EGL config with native visual {:?} among {} candidates",
            format,
            configs.len()
        )))
    }

    /// Blocks until the back buffer is presented and the surface's buffers
    /// are exchanged.
    pub fn swap_buffers(&self) -> Result<(), SessionError> {
        let surface = self
            .surface
            .ok_or_else(|| SessionError::GraphicsContextError("surface released".into()))?;
        self.instance
            .swap_buffers(self.display, surface)
            .map_err(|e| SessionError::GraphicsContextError(format!("swap_buffers: {}", e)))
    }

    /// Builds a `glow` context resolving GL entry points through EGL.
    pub fn load_gl(&self) -> glow::Context {
        unsafe {
            glow::Context::from_loader_function(|name| {
                self.instance
                    .get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        }
    }

    /// Unbinds and destroys the context and surface, then terminates the
    /// display connection. Idempotent.
    pub fn release(&mut self) {
        if self.context.is_none() && self.surface.is_none() {
            return;
        }
        if let Err(e) = self.instance.make_current(self.display, None, None, None) {
            warn!("Failed to unbind EGL context: {}", e);
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.instance.destroy_surface(self.display, surface) {
                warn!("Failed to destroy EGL surface: {}", e);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = self.instance.destroy_context(self.display, context) {
                warn!("Failed to destroy EGL context: {}", e);
            }
        }
        if let Err(e) = self.instance.terminate(self.display) {
            warn!("Failed to terminate EGL display: {}", e);
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.release();
    }
}
