// src/session/backend.rs

//! Hardware abstraction for the display session.
//!
//! Every fallible hardware step of display bring-up and presentation is an
//! operation on the [`DisplayBackend`] trait, expressed over plain data
//! types. The session state machine in `session::mod` drives the trait; the
//! production implementation lives in `session::kms`, and tests drive the
//! same machine against a recording mock.

use crate::error::SessionError;

/// Scanout pixel formats, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Xrgb8888,
    Argb8888,
}

impl PixelFormat {
    /// Formats tried in sequence when creating the scanout surface.
    pub const FALLBACK_ORDER: [PixelFormat; 2] = [PixelFormat::Xrgb8888, PixelFormat::Argb8888];

    /// The DRM fourcc code, also the value EGL reports as the config's
    /// native visual id.
    pub fn fourcc(self) -> u32 {
        match self {
            // 'XR24' / 'AR24' little-endian.
            PixelFormat::Xrgb8888 => u32::from_le_bytes(*b"XR24"),
            PixelFormat::Argb8888 => u32::from_le_bytes(*b"AR24"),
        }
    }
}

/// One display timing advertised by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub pixel_clock_khz: u32,
    /// Flagged by the display as its preferred timing.
    pub preferred: bool,
}

/// A physical output and the modes it advertises.
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: u32,
    pub connected: bool,
    pub modes: Vec<DisplayMode>,
}

/// Opaque handle for a locked scanout buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Opaque handle for a controller-registered framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FbId(pub u32);

/// The hardware steps the display session is built from.
///
/// Startup operations are expected in the order they are declared; the
/// session releases partial progress in reverse order when one fails.
/// `unregister_framebuffer` and `release_buffer` are infallible by contract:
/// failures there are logged by the backend and swallowed, because the
/// session has no recovery path once a buffer is on its way out.
pub trait DisplayBackend {
    /// Opens a DRM device node with usable resources.
    fn open_device(&mut self) -> Result<(), SessionError>;

    /// Enumerates connectors and the modes of the connected ones.
    fn probe_connectors(&mut self) -> Result<Vec<ConnectorInfo>, SessionError>;

    /// Finds a controller for the connector and snapshots its current state
    /// for later restoration.
    fn resolve_controller(&mut self, connector_id: u32) -> Result<(), SessionError>;

    /// Creates the GPU buffer allocator on top of the open device.
    fn create_allocator(&mut self) -> Result<(), SessionError>;

    /// Creates the scanout surface at the mode's dimensions in `format`.
    fn create_surface(&mut self, mode: DisplayMode, format: PixelFormat)
        -> Result<(), SessionError>;

    /// Brings up the GPU rendering context against the surface. The chosen
    /// context configuration must match `format` exactly.
    fn init_gpu_context(&mut self, format: PixelFormat) -> Result<(), SessionError>;

    /// Blocks until queued GPU work is presented to the surface's back
    /// buffer and the buffers are exchanged.
    fn exchange_gpu_buffers(&mut self) -> Result<(), SessionError>;

    /// Locks the surface's most recently rendered buffer for scanout.
    fn lock_front_buffer(&mut self) -> Result<BufferId, SessionError>;

    /// Registers a locked buffer with the controller.
    fn register_framebuffer(&mut self, buffer: BufferId) -> Result<FbId, SessionError>;

    /// Synchronously commits `fb` to the controller at the selected mode.
    fn commit(&mut self, fb: FbId) -> Result<(), SessionError>;

    /// Drops the controller registration for `fb`.
    fn unregister_framebuffer(&mut self, fb: FbId);

    /// Returns a locked buffer to the allocator.
    fn release_buffer(&mut self, buffer: BufferId);

    /// Restores the controller state snapshotted by `resolve_controller`.
    fn restore_original(&mut self) -> Result<(), SessionError>;

    /// Tears down the GPU rendering context.
    fn release_gpu_context(&mut self);

    /// Releases everything still held, in reverse acquisition order.
    /// Idempotent.
    fn teardown(&mut self);
}
