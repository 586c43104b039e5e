// src/session/mod.rs

//! The display session: exclusive ownership of one physical display output.
//!
//! `DisplaySession` is a state machine over a [`DisplayBackend`]: it runs
//! device discovery and surface bring-up in `open`, presents rendered frames
//! with synchronous double-buffered `swap`, and hands the display back in
//! `close`. All hardware access goes through the backend trait, so the
//! machine's ordering and cleanup guarantees are tested against a mock.

pub mod backend;
pub mod egl;
pub mod kms;
#[cfg(test)]
pub mod mock;

use log::{debug, error, info, warn};

use crate::error::SessionError;
use backend::{BufferId, ConnectorInfo, DisplayBackend, DisplayMode, FbId, PixelFormat};

/// Lifecycle of a display session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Hardware configured, nothing presented yet.
    Configured,
    /// At least one frame committed to the display.
    Presenting,
    ShuttingDown,
    Closed,
}

/// A buffer currently owned by the display.
#[derive(Debug, Clone, Copy)]
struct LiveBuffer {
    buffer: BufferId,
    fb: FbId,
}

pub struct DisplaySession<B: DisplayBackend> {
    pub(crate) backend: B,
    state: SessionState,
    mode: Option<DisplayMode>,
    format: Option<PixelFormat>,
    /// The buffer the display is scanning out right now.
    active: Option<LiveBuffer>,
}

impl<B: DisplayBackend> DisplaySession<B> {
    pub fn new(backend: B) -> Self {
        DisplaySession {
            backend,
            state: SessionState::Uninitialized,
            mode: None,
            format: None,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Width of the selected mode. Valid from `Configured`.
    pub fn width(&self) -> Option<u32> {
        self.mode.map(|m| m.width)
    }

    /// Height of the selected mode. Valid from `Configured`.
    pub fn height(&self) -> Option<u32> {
        self.mode.map(|m| m.height)
    }

    /// The pixel format the surface ended up with.
    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Brings the display up: device, connector, mode, controller,
    /// allocator, surface (with format fallback) and GPU context.
    ///
    /// All-or-nothing: on any failure every partially acquired resource is
    /// released and the session stays `Uninitialized`.
    pub fn open(&mut self) -> Result<(), SessionError> {
        match self.open_inner() {
            Ok(()) => {
                self.state = SessionState::Configured;
                let mode = self.mode.as_ref().map(|m| (m.width, m.height, m.refresh_hz));
                info!(
                    "Display session configured: mode {:?}, format {:?}",
                    mode, self.format
                );
                Ok(())
            }
            Err(e) => {
                error!("Display session bring-up failed: {}", e);
                self.backend.teardown();
                self.mode = None;
                self.format = None;
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    fn open_inner(&mut self) -> Result<(), SessionError> {
        self.backend.open_device()?;
        debug!("Display device opened");

        let connectors = self.backend.probe_connectors()?;
        let connector = pick_connector(&connectors).ok_or(SessionError::NoDisplayConnected)?;
        let mode = select_mode(&connector.modes).ok_or(SessionError::NoDisplayConnected)?;
        debug!(
            "Selected connector {} mode {}x{}@{}",
            connector.id, mode.width, mode.height, mode.refresh_hz
        );

        self.backend.resolve_controller(connector.id)?;
        self.backend.create_allocator()?;

        let format = self.create_surface_with_fallback(mode)?;
        self.backend.init_gpu_context(format)?;

        self.mode = Some(mode);
        self.format = Some(format);
        Ok(())
    }

    fn create_surface_with_fallback(
        &mut self,
        mode: DisplayMode,
    ) -> Result<PixelFormat, SessionError> {
        let mut last_err = None;
        for format in PixelFormat::FALLBACK_ORDER {
            match self.backend.create_surface(mode, format) {
                Ok(()) => return Ok(format),
                Err(e) => {
                    warn!("Surface creation in {:?} failed: {}", format, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| SessionError::SurfaceCreationFailed("no formats tried".into())))
    }

    /// Presents the most recently rendered frame.
    ///
    /// Blocks on the GPU buffer exchange, locks the new front buffer,
    /// registers it, commits it, and only then releases the previously
    /// displayed buffer. At most two buffers are ever live.
    pub fn swap(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Configured | SessionState::Presenting => {}
            _ => return Err(SessionError::NotConfigured),
        }

        self.backend.exchange_gpu_buffers()?;

        let buffer = self.backend.lock_front_buffer()?;
        let fb = match self.backend.register_framebuffer(buffer) {
            Ok(fb) => fb,
            Err(e) => {
                self.backend.release_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = self.backend.commit(fb) {
            self.backend.unregister_framebuffer(fb);
            self.backend.release_buffer(buffer);
            return Err(e);
        }

        // The previous buffer is off-screen only now that the commit
        // succeeded.
        if let Some(prev) = self.active.take() {
            self.backend.unregister_framebuffer(prev.fb);
            self.backend.release_buffer(prev.buffer);
        }
        self.active = Some(LiveBuffer { buffer, fb });
        self.state = SessionState::Presenting;
        Ok(())
    }

    /// Restores the original display configuration and releases everything.
    /// Idempotent; restore failures are logged, not fatal.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Closed | SessionState::Uninitialized => return,
            _ => {}
        }
        self.state = SessionState::ShuttingDown;
        info!("Closing display session");

        if let Err(e) = self.backend.restore_original() {
            warn!("Failed to restore original display state: {}", e);
        }

        self.backend.release_gpu_context();

        if let Some(live) = self.active.take() {
            self.backend.unregister_framebuffer(live.fb);
            self.backend.release_buffer(live.buffer);
        }

        self.backend.teardown();
        self.mode = None;
        self.format = None;
        self.state = SessionState::Closed;
    }
}

impl<B: DisplayBackend> Drop for DisplaySession<B> {
    fn drop(&mut self) {
        if !matches!(
            self.state,
            SessionState::Closed | SessionState::Uninitialized
        ) {
            warn!("DisplaySession dropped without close(), closing now");
            self.close();
        }
    }
}

fn pick_connector(connectors: &[ConnectorInfo]) -> Option<&ConnectorInfo> {
    connectors.iter().find(|c| c.connected && !c.modes.is_empty())
}

/// Picks the first preferred mode, else the first advertised.
fn select_mode(modes: &[DisplayMode]) -> Option<DisplayMode> {
    modes
        .iter()
        .find(|m| m.preferred)
        .or_else(|| modes.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::mock::{test_mode, FailAt, MockBackend};
    use super::*;
    use test_log::test; // For logging within tests

    fn open_session(mock: MockBackend) -> DisplaySession<MockBackend> {
        let mut session = DisplaySession::new(mock);
        session.open().expect("open should succeed");
        session
    }

    #[test]
    fn open_reaches_configured_with_primary_format() {
        let session = open_session(MockBackend::new());
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.format(), Some(PixelFormat::Xrgb8888));
        assert_eq!(session.width(), Some(1920));
        assert_eq!(session.height(), Some(1080));
    }

    #[test]
    fn open_prefers_flagged_mode() {
        let mut mock = MockBackend::new();
        let preferred = DisplayMode {
            width: 1280,
            height: 720,
            refresh_hz: 60,
            pixel_clock_khz: 74_250,
            preferred: true,
        };
        mock.connectors[0].modes = vec![test_mode(), preferred];
        let session = open_session(mock);
        assert_eq!(session.width(), Some(1280));
    }

    #[test]
    fn open_fails_without_connected_display() {
        let mut mock = MockBackend::new();
        mock.connectors[0].connected = false;
        let mut session = DisplaySession::new(mock);
        let err = session.open().unwrap_err();
        assert!(matches!(err, SessionError::NoDisplayConnected));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.backend.is_clean());
    }

    #[test]
    fn open_is_all_or_nothing_at_every_step() {
        let steps = [
            FailAt::OpenDevice,
            FailAt::ProbeConnectors,
            FailAt::ResolveController,
            FailAt::CreateAllocator,
            FailAt::CreateSurface,
            FailAt::InitGpuContext,
        ];
        for step in steps {
            let mut session = DisplaySession::new(MockBackend::failing(step));
            assert!(session.open().is_err(), "step {:?} should fail open", step);
            assert_eq!(session.state(), SessionState::Uninitialized);
            assert!(
                session.backend.is_clean(),
                "resources leaked after failure at {:?}",
                step
            );
            assert_eq!(session.backend.teardowns, 1);
        }
    }

    #[test]
    fn format_falls_back_to_argb() {
        let mock = MockBackend::failing(FailAt::CreateSurfaceFor(PixelFormat::Xrgb8888));
        let session = open_session(mock);
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.format(), Some(PixelFormat::Argb8888));
        // The context was initialized against the fallback format.
        assert!(session
            .backend
            .calls
            .contains(&"init_gpu_context(Argb8888)".to_string()));
    }

    #[test]
    fn swap_before_open_is_rejected() {
        let mut session = DisplaySession::new(MockBackend::new());
        assert!(matches!(
            session.swap().unwrap_err(),
            SessionError::NotConfigured
        ));
    }

    #[test]
    fn first_swap_releases_nothing() {
        let mut session = open_session(MockBackend::new());
        session.swap().unwrap();
        assert_eq!(session.state(), SessionState::Presenting);
        assert!(!session
            .backend
            .calls
            .iter()
            .any(|c| c.starts_with("release_buffer")));
        assert_eq!(session.backend.locked.len(), 1);
    }

    #[test]
    fn swap_releases_predecessor_only_after_commit() {
        let mut session = open_session(MockBackend::new());
        session.swap().unwrap();
        session.swap().unwrap();

        let calls = &session.backend.calls;
        let commit2 = calls.iter().position(|c| c == "commit(2)").unwrap();
        let unregister1 = calls
            .iter()
            .position(|c| c == "unregister_framebuffer(1)")
            .unwrap();
        let release1 = calls.iter().position(|c| c == "release_buffer(1)").unwrap();
        assert!(commit2 < unregister1);
        assert!(unregister1 < release1);
    }

    #[test]
    fn at_most_two_buffers_live_across_many_swaps() {
        let mut session = open_session(MockBackend::new());
        for _ in 0..50 {
            session.swap().unwrap();
        }
        assert_eq!(session.backend.max_locked, 2);
        assert_eq!(session.backend.locked.len(), 1);
    }

    #[test]
    fn failed_registration_releases_new_buffer_keeps_active() {
        let mut session = open_session(MockBackend::new());
        session.swap().unwrap();

        session.backend.fail_at = Some(FailAt::RegisterFramebuffer);
        assert!(session.swap().is_err());

        // The active buffer from the first swap is untouched.
        assert_eq!(session.backend.locked.len(), 1);
        assert!(session.backend.locked.contains(&1));
        assert_eq!(session.backend.registered.len(), 1);
    }

    #[test]
    fn failed_commit_unwinds_new_buffer() {
        let mut session = open_session(MockBackend::new());
        session.swap().unwrap();

        session.backend.fail_at = Some(FailAt::Commit);
        assert!(session.swap().is_err());

        assert_eq!(session.backend.locked.len(), 1);
        assert_eq!(session.backend.registered.len(), 1);
        assert!(session.backend.registered.contains(&1));
    }

    #[test]
    fn close_restores_then_releases_and_is_idempotent() {
        let mut session = open_session(MockBackend::new());
        session.swap().unwrap();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.backend.is_clean());
        assert_eq!(session.backend.restores, 1);

        let restore_pos = session
            .backend
            .calls
            .iter()
            .position(|c| c == "restore_original")
            .unwrap();
        let release_pos = session
            .backend
            .calls
            .iter()
            .position(|c| c == "release_buffer(1)")
            .unwrap();
        assert!(restore_pos < release_pos);

        session.close();
        assert_eq!(session.backend.restores, 1);
        assert_eq!(session.backend.teardowns, 1);
    }

    #[test]
    fn close_without_open_is_a_no_op() {
        let mut session = DisplaySession::new(MockBackend::new());
        session.close();
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.backend.calls.is_empty());
    }
}
