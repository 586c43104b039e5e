// src/error.rs

//! Error taxonomy for the player.
//!
//! Errors are grouped by the subsystem that raises them: `SessionError` for
//! the display session's hardware bring-up and presentation path,
//! `RenderError` for GL program construction, and `PlaybackError` for the
//! frame source and the coordinator loop. Application-level glue wraps these
//! in `anyhow::Error` with context.

use thiserror::Error;

/// Failures raised by the display session.
///
/// Each startup variant corresponds to one step of `DisplaySession::open`;
/// the presentation variants to one step of `swap`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No DRM device node could be opened, or none exposed usable resources.
    #[error("display device unavailable: {0}")]
    DeviceUnavailable(String),

    /// No connector reported an attached display.
    #[error("no display connected")]
    NoDisplayConnected,

    /// A connected connector exists but no controller can drive it.
    #[error("no usable controller for connector {connector}")]
    NoUsableController { connector: u32 },

    /// Allocator or scanout surface creation failed for every pixel format.
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    /// EGL display/config/context/surface bring-up failed.
    #[error("graphics context error: {0}")]
    GraphicsContextError(String),

    /// The controller rejected a rendered buffer as a framebuffer.
    #[error("framebuffer registration failed: {0}")]
    FramebufferRegistrationFailed(String),

    /// The synchronous modeset commit failed.
    #[error("display commit failed: {0}")]
    CommitFailed(String),

    /// An operation requiring a configured session was called too early
    /// or after close.
    #[error("display session is not configured")]
    NotConfigured,
}

/// Failures raised while building GL programs. Fatal at startup.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{stage} shader compilation failed: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("program link failed: {log}")]
    ProgramLink { log: String },
}

/// Failures raised by the frame source or the playback loop.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The source never produced a first frame within the startup budget.
    #[error("no frame arrived within the startup window")]
    StartupTimeout,

    /// The source reported an unrecoverable stream error.
    #[error("stream error: {0}")]
    Stream(String),
}
