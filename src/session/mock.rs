// src/session/mock.rs

//! Recording mock backend for exercising the session state machine.
//!
//! Records every call in order and can be told to fail any single step, so
//! tests can check both the happy-path call sequence and that partial
//! progress is unwound after each possible failure point.

use std::collections::HashSet;

use crate::error::SessionError;
use crate::session::backend::{
    BufferId, ConnectorInfo, DisplayBackend, DisplayMode, FbId, PixelFormat,
};

/// The step a [`MockBackend`] should fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    OpenDevice,
    ProbeConnectors,
    ResolveController,
    CreateAllocator,
    CreateSurface,
    /// Fail `create_surface` only for the given format.
    CreateSurfaceFor(PixelFormat),
    InitGpuContext,
    ExchangeGpuBuffers,
    LockFrontBuffer,
    RegisterFramebuffer,
    Commit,
}

pub struct MockBackend {
    pub calls: Vec<String>,
    pub fail_at: Option<FailAt>,
    pub connectors: Vec<ConnectorInfo>,
    /// Format of the surface most recently created, as the GPU context sees it.
    pub surface_format: Option<PixelFormat>,
    pub locked: HashSet<u32>,
    pub registered: HashSet<u32>,
    pub max_locked: usize,
    pub gpu_context_live: bool,
    pub device_open: bool,
    pub restores: u32,
    pub teardowns: u32,
    next_buffer: u32,
}

pub fn test_mode() -> DisplayMode {
    DisplayMode {
        width: 1920,
        height: 1080,
        refresh_hz: 60,
        pixel_clock_khz: 148_500,
        preferred: false,
    }
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            calls: Vec::new(),
            fail_at: None,
            connectors: vec![ConnectorInfo {
                id: 31,
                connected: true,
                modes: vec![test_mode()],
            }],
            surface_format: None,
            locked: HashSet::new(),
            registered: HashSet::new(),
            max_locked: 0,
            gpu_context_live: false,
            device_open: false,
            restores: 0,
            teardowns: 0,
            next_buffer: 0,
        }
    }

    pub fn failing(fail_at: FailAt) -> Self {
        let mut mock = Self::new();
        mock.fail_at = Some(fail_at);
        mock
    }

    fn should_fail(&self, step: FailAt) -> bool {
        self.fail_at == Some(step)
    }

    /// True when no device, context, buffer or framebuffer is still held.
    pub fn is_clean(&self) -> bool {
        !self.device_open
            && !self.gpu_context_live
            && self.locked.is_empty()
            && self.registered.is_empty()
    }
}

impl DisplayBackend for MockBackend {
    fn open_device(&mut self) -> Result<(), SessionError> {
        self.calls.push("open_device".into());
        if self.should_fail(FailAt::OpenDevice) {
            return Err(SessionError::DeviceUnavailable("mock".into()));
        }
        self.device_open = true;
        Ok(())
    }

    fn probe_connectors(&mut self) -> Result<Vec<ConnectorInfo>, SessionError> {
        self.calls.push("probe_connectors".into());
        if self.should_fail(FailAt::ProbeConnectors) {
            return Err(SessionError::DeviceUnavailable("mock probe".into()));
        }
        Ok(self.connectors.clone())
    }

    fn resolve_controller(&mut self, connector_id: u32) -> Result<(), SessionError> {
        self.calls.push(format!("resolve_controller({})", connector_id));
        if self.should_fail(FailAt::ResolveController) {
            return Err(SessionError::NoUsableController {
                connector: connector_id,
            });
        }
        Ok(())
    }

    fn create_allocator(&mut self) -> Result<(), SessionError> {
        self.calls.push("create_allocator".into());
        if self.should_fail(FailAt::CreateAllocator) {
            return Err(SessionError::SurfaceCreationFailed("mock allocator".into()));
        }
        Ok(())
    }

    fn create_surface(
        &mut self,
        _mode: DisplayMode,
        format: PixelFormat,
    ) -> Result<(), SessionError> {
        self.calls.push(format!("create_surface({:?})", format));
        if self.should_fail(FailAt::CreateSurface)
            || self.should_fail(FailAt::CreateSurfaceFor(format))
        {
            return Err(SessionError::SurfaceCreationFailed("mock surface".into()));
        }
        self.surface_format = Some(format);
        Ok(())
    }

    fn init_gpu_context(&mut self, format: PixelFormat) -> Result<(), SessionError> {
        self.calls.push(format!("init_gpu_context({:?})", format));
        if self.should_fail(FailAt::InitGpuContext) {
            return Err(SessionError::GraphicsContextError("mock context".into()));
        }
        if self.surface_format != Some(format) {
            return Err(SessionError::GraphicsContextError(
                "format does not match surface".into(),
            ));
        }
        self.gpu_context_live = true;
        Ok(())
    }

    fn exchange_gpu_buffers(&mut self) -> Result<(), SessionError> {
        self.calls.push("exchange_gpu_buffers".into());
        if self.should_fail(FailAt::ExchangeGpuBuffers) {
            return Err(SessionError::GraphicsContextError("mock exchange".into()));
        }
        Ok(())
    }

    fn lock_front_buffer(&mut self) -> Result<BufferId, SessionError> {
        self.calls.push("lock_front_buffer".into());
        if self.should_fail(FailAt::LockFrontBuffer) {
            return Err(SessionError::SurfaceCreationFailed("mock lock".into()));
        }
        self.next_buffer += 1;
        self.locked.insert(self.next_buffer);
        self.max_locked = self.max_locked.max(self.locked.len());
        Ok(BufferId(self.next_buffer))
    }

    fn register_framebuffer(&mut self, buffer: BufferId) -> Result<FbId, SessionError> {
        self.calls.push(format!("register_framebuffer({})", buffer.0));
        if self.should_fail(FailAt::RegisterFramebuffer) {
            return Err(SessionError::FramebufferRegistrationFailed("mock".into()));
        }
        assert!(self.locked.contains(&buffer.0), "registering unlocked buffer");
        self.registered.insert(buffer.0);
        Ok(FbId(buffer.0))
    }

    fn commit(&mut self, fb: FbId) -> Result<(), SessionError> {
        self.calls.push(format!("commit({})", fb.0));
        if self.should_fail(FailAt::Commit) {
            return Err(SessionError::CommitFailed("mock".into()));
        }
        assert!(self.registered.contains(&fb.0), "committing unregistered fb");
        Ok(())
    }

    fn unregister_framebuffer(&mut self, fb: FbId) {
        self.calls.push(format!("unregister_framebuffer({})", fb.0));
        assert!(self.registered.remove(&fb.0), "double unregister");
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        self.calls.push(format!("release_buffer({})", buffer.0));
        assert!(self.locked.remove(&buffer.0), "double release");
    }

    fn restore_original(&mut self) -> Result<(), SessionError> {
        self.calls.push("restore_original".into());
        self.restores += 1;
        Ok(())
    }

    fn release_gpu_context(&mut self) {
        self.calls.push("release_gpu_context".into());
        self.gpu_context_live = false;
    }

    fn teardown(&mut self) {
        self.calls.push("teardown".into());
        self.teardowns += 1;
        self.gpu_context_live = false;
        self.device_open = false;
        self.surface_format = None;
        self.locked.clear();
        self.registered.clear();
    }
}
