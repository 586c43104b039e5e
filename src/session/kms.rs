// src/session/kms.rs

//! Production display backend over DRM/KMS and GBM.
//!
//! Owns the device node, the saved CRTC snapshot, the GBM allocator and
//! scanout surface, the EGL context, and the per-swap buffer bookkeeping.
//! Resources are held in `Option` fields declared in reverse acquisition
//! order, so a plain drop already tears down GPU context before surface
//! before allocator before device.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;

use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, Mode, ModeTypeFlags};
use drm::Device as DrmDevice;
use gbm::{AsRaw, BufferObject, BufferObjectFlags, Format};
use log::{debug, info, warn};

use crate::error::SessionError;
use crate::session::backend::{
    BufferId, ConnectorInfo, DisplayBackend, DisplayMode, FbId, PixelFormat,
};
use crate::session::egl::GpuContext;
use crate::session::DisplaySession;

/// An open DRM device node.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl DrmDevice for Card {}
impl ControlDevice for Card {}

/// Saved controller state, restored when the session closes.
struct SavedCrtc {
    handle: crtc::Handle,
    info: crtc::Info,
    connector: connector::Handle,
}

pub struct KmsBackend {
    // Declaration order is drop order: context, surface, allocator, device.
    gpu: Option<GpuContext>,
    surface: Option<gbm::Surface<()>>,
    /// Buffers locked from the surface, keyed by our own counter ids.
    buffers: HashMap<u32, BufferObject<()>>,
    /// Controller-registered framebuffers for live buffers.
    framebuffers: HashMap<u32, framebuffer::Handle>,
    gbm: Option<gbm::Device<Card>>,
    card: Option<Card>,
    connectors: Vec<connector::Info>,
    selected: Option<connector::Info>,
    /// The DRM mode corresponding to the session's selected `DisplayMode`.
    mode: Option<Mode>,
    format: Option<PixelFormat>,
    saved: Option<SavedCrtc>,
    next_buffer_id: u32,
}

impl KmsBackend {
    pub fn new() -> Self {
        KmsBackend {
            gpu: None,
            surface: None,
            buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            gbm: None,
            card: None,
            connectors: Vec::new(),
            selected: None,
            mode: None,
            format: None,
            saved: None,
            next_buffer_id: 0,
        }
    }

    fn card(&self) -> Result<&Card, SessionError> {
        self.card
            .as_ref()
            .ok_or_else(|| SessionError::DeviceUnavailable("device not open".into()))
    }

    /// Scans /dev/dri/card* and opens the first node exposing KMS resources.
    fn scan_device_nodes() -> Result<Card, SessionError> {
        let mut last_err = String::from("no /dev/dri/card* nodes found");
        for index in 0..8 {
            let path = PathBuf::from(format!("/dev/dri/card{}", index));
            if !path.exists() {
                continue;
            }
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(f) => f,
                Err(e) => {
                    last_err = format!("{:?}: {}", path, e);
                    continue;
                }
            };
            let card = Card(file);
            match card.resource_handles() {
                Ok(res) if !res.connectors().is_empty() => {
                    info!("Using DRM device {:?}", path);
                    return Ok(card);
                }
                Ok(_) => last_err = format!("{:?}: no connectors", path),
                Err(e) => last_err = format!("{:?}: {}", path, e),
            }
        }
        Err(SessionError::DeviceUnavailable(last_err))
    }

    fn drm_mode_to_display(mode: &Mode) -> DisplayMode {
        let (width, height) = mode.size();
        DisplayMode {
            width: width as u32,
            height: height as u32,
            refresh_hz: mode.vrefresh(),
            pixel_clock_khz: mode.clock(),
            preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
        }
    }

    fn find_drm_mode(&self, wanted: DisplayMode) -> Option<Mode> {
        let selected = self.selected.as_ref()?;
        selected
            .modes()
            .iter()
            .find(|m| {
                let (w, h) = m.size();
                w as u32 == wanted.width
                    && h as u32 == wanted.height
                    && m.vrefresh() == wanted.refresh_hz
                    && m.clock() == wanted.pixel_clock_khz
            })
            .copied()
    }
}

impl Default for KmsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for KmsBackend {
    fn open_device(&mut self) -> Result<(), SessionError> {
        let card = Self::scan_device_nodes()?;
        self.card = Some(card);
        Ok(())
    }

    fn probe_connectors(&mut self) -> Result<Vec<ConnectorInfo>, SessionError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| SessionError::DeviceUnavailable("device not open".into()))?;
        let resources = card
            .resource_handles()
            .map_err(|e| SessionError::DeviceUnavailable(format!("resources: {}", e)))?;

        let mut infos = Vec::new();
        self.connectors.clear();
        for handle in resources.connectors() {
            let info = card
                .get_connector(*handle, false)
                .map_err(|e| SessionError::DeviceUnavailable(format!("connector: {}", e)))?;
            let connected = info.state() == connector::State::Connected;
            infos.push(ConnectorInfo {
                id: u32::from(*handle),
                connected,
                modes: info.modes().iter().map(Self::drm_mode_to_display).collect(),
            });
            self.connectors.push(info);
        }
        debug!(
            "Probed {} connectors, {} connected",
            infos.len(),
            infos.iter().filter(|i| i.connected).count()
        );
        Ok(infos)
    }

    fn resolve_controller(&mut self, connector_id: u32) -> Result<(), SessionError> {
        let info = self
            .connectors
            .iter()
            .find(|c| u32::from(c.handle()) == connector_id)
            .cloned()
            .ok_or(SessionError::NoUsableController {
                connector: connector_id,
            })?;

        let card = self.card()?;
        let resources = card
            .resource_handles()
            .map_err(|e| SessionError::DeviceUnavailable(format!("resources: {}", e)))?;

        // Prefer the encoder already driving this connector, else the first
        // encoder/CRTC pair the hardware allows.
        let mut crtc_handle = None;
        if let Some(enc_handle) = info.current_encoder() {
            if let Ok(encoder) = card.get_encoder(enc_handle) {
                crtc_handle = encoder.crtc();
            }
        }
        if crtc_handle.is_none() {
            'outer: for enc_handle in info.encoders() {
                if let Ok(encoder) = card.get_encoder(*enc_handle) {
                    for candidate in resources.filter_crtcs(encoder.possible_crtcs()) {
                        crtc_handle = Some(candidate);
                        break 'outer;
                    }
                }
            }
        }
        let crtc_handle = crtc_handle.ok_or(SessionError::NoUsableController {
            connector: connector_id,
        })?;

        let crtc_info = card.get_crtc(crtc_handle).map_err(|_| {
            SessionError::NoUsableController {
                connector: connector_id,
            }
        })?;

        debug!(
            "Controller {:?} drives connector {}; saving state for restore",
            crtc_handle, connector_id
        );
        self.saved = Some(SavedCrtc {
            handle: crtc_handle,
            info: crtc_info,
            connector: info.handle(),
        });
        self.selected = Some(info);
        Ok(())
    }

    fn create_allocator(&mut self) -> Result<(), SessionError> {
        let card = self.card()?;
        let dup = card
            .0
            .try_clone()
            .map_err(|e| SessionError::SurfaceCreationFailed(format!("dup fd: {}", e)))?;
        let gbm = gbm::Device::new(Card(dup))
            .map_err(|e| SessionError::SurfaceCreationFailed(format!("gbm device: {}", e)))?;
        self.gbm = Some(gbm);
        Ok(())
    }

    fn create_surface(
        &mut self,
        mode: DisplayMode,
        format: PixelFormat,
    ) -> Result<(), SessionError> {
        let drm_mode = self
            .find_drm_mode(mode)
            .ok_or_else(|| SessionError::SurfaceCreationFailed("mode disappeared".into()))?;
        let gbm = self
            .gbm
            .as_ref()
            .ok_or_else(|| SessionError::SurfaceCreationFailed("no allocator".into()))?;

        let gbm_format = match format {
            PixelFormat::Xrgb8888 => Format::Xrgb8888,
            PixelFormat::Argb8888 => Format::Argb8888,
        };
        let surface = gbm
            .create_surface::<()>(
                mode.width,
                mode.height,
                gbm_format,
                BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
            )
            .map_err(|e| SessionError::SurfaceCreationFailed(format!("{:?}: {}", format, e)))?;

        self.mode = Some(drm_mode);
        self.format = Some(format);
        self.surface = Some(surface);
        Ok(())
    }

    fn init_gpu_context(&mut self, format: PixelFormat) -> Result<(), SessionError> {
        let gbm = self
            .gbm
            .as_ref()
            .ok_or_else(|| SessionError::GraphicsContextError("no allocator".into()))?;
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| SessionError::GraphicsContextError("no surface".into()))?;

        let gpu = GpuContext::new(
            gbm.as_raw() as *mut c_void,
            surface.as_raw() as *mut c_void,
            format,
        )?;
        self.gpu = Some(gpu);
        Ok(())
    }

    fn exchange_gpu_buffers(&mut self) -> Result<(), SessionError> {
        self.gpu
            .as_ref()
            .ok_or(SessionError::NotConfigured)?
            .swap_buffers()
    }

    fn lock_front_buffer(&mut self) -> Result<BufferId, SessionError> {
        let surface = self.surface.as_mut().ok_or(SessionError::NotConfigured)?;
        let bo = unsafe { surface.lock_front_buffer() }
            .map_err(|e| SessionError::SurfaceCreationFailed(format!("front buffer: {}", e)))?;
        self.next_buffer_id += 1;
        let id = self.next_buffer_id;
        self.buffers.insert(id, bo);
        Ok(BufferId(id))
    }

    fn register_framebuffer(&mut self, buffer: BufferId) -> Result<FbId, SessionError> {
        let bo = self.buffers.get(&buffer.0).ok_or_else(|| {
            SessionError::FramebufferRegistrationFailed("unknown buffer".into())
        })?;
        let depth = match self.format {
            Some(PixelFormat::Argb8888) => 32,
            _ => 24,
        };
        let card = self.card()?;
        let fb = card
            .add_framebuffer(bo, depth, 32)
            .map_err(|e| SessionError::FramebufferRegistrationFailed(e.to_string()))?;
        // Framebuffer ids deliberately alias buffer ids: both maps are
        // keyed by the same counter, and the DRM handle stays an internal
        // detail of `framebuffers`.
        self.framebuffers.insert(buffer.0, fb);
        Ok(FbId(buffer.0))
    }

    fn commit(&mut self, fb: FbId) -> Result<(), SessionError> {
        let handle = *self
            .framebuffers
            .get(&fb.0)
            .ok_or_else(|| SessionError::CommitFailed("unknown framebuffer".into()))?;
        let saved = self
            .saved
            .as_ref()
            .ok_or_else(|| SessionError::CommitFailed("no controller".into()))?;
        let mode = self
            .mode
            .ok_or_else(|| SessionError::CommitFailed("no mode".into()))?;
        let card = self.card()?;
        card.set_crtc(
            saved.handle,
            Some(handle),
            (0, 0),
            &[saved.connector],
            Some(mode),
        )
        .map_err(|e| SessionError::CommitFailed(e.to_string()))
    }

    fn unregister_framebuffer(&mut self, fb: FbId) {
        if let Some(handle) = self.framebuffers.remove(&fb.0) {
            if let Ok(card) = self.card() {
                if let Err(e) = card.destroy_framebuffer(handle) {
                    warn!("Failed to destroy framebuffer {:?}: {}", handle, e);
                }
            }
        }
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        // Dropping the BufferObject returns it to the surface.
        self.buffers.remove(&buffer.0);
    }

    fn restore_original(&mut self) -> Result<(), SessionError> {
        let saved = match self.saved.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };
        let card = self.card()?;
        card.set_crtc(
            saved.handle,
            saved.info.framebuffer(),
            saved.info.position(),
            &[saved.connector],
            saved.info.mode(),
        )
        .map_err(|e| SessionError::CommitFailed(format!("restore: {}", e)))
    }

    fn release_gpu_context(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            gpu.release();
        }
    }

    fn teardown(&mut self) {
        self.release_gpu_context();
        let fbs: Vec<u32> = self.framebuffers.keys().copied().collect();
        for fb in fbs {
            self.unregister_framebuffer(FbId(fb));
        }
        self.buffers.clear();
        self.surface = None;
        self.gbm = None;
        self.selected = None;
        self.connectors.clear();
        self.mode = None;
        self.format = None;
        self.saved = None;
        self.card = None;
    }
}

impl DisplaySession<KmsBackend> {
    /// Builds a `glow` context over the session's EGL context. Valid from
    /// `Configured`.
    pub fn create_gl_context(&self) -> Result<glow::Context, SessionError> {
        let gpu = self
            .backend
            .gpu
            .as_ref()
            .ok_or(SessionError::NotConfigured)?;
        Ok(gpu.load_gl())
    }
}
