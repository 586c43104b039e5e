// src/main.rs

// Declare modules
pub mod config;
pub mod coordinator;
pub mod diag;
pub mod error;
pub mod input;
pub mod overlay;
pub mod render;
pub mod screenshot;
pub mod session;
pub mod source;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use log::{error, info};

use crate::{
    config::Config,
    coordinator::{FrameSink, PlaybackCoordinator},
    input::StdinControl,
    overlay::Overlay,
    render::Renderer,
    session::{kms::KmsBackend, DisplaySession},
    source::{gst::GstFrameSource, DecodedFrame},
};

/// Renders acquired frames onto the display session and captures
/// screenshots of the composed output.
struct VideoSink {
    session: DisplaySession<KmsBackend>,
    gl: glow::Context,
    renderer: Renderer,
    overlay: Option<Overlay>,
    capture_dir: PathBuf,
}

impl FrameSink for VideoSink {
    fn present(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        self.renderer.begin_frame(&self.gl);
        self.renderer.draw_video(&self.gl, frame);
        if let Some(overlay) = &self.overlay {
            overlay.draw(&self.gl);
        }
        self.renderer.finish_frame(&self.gl);
        self.session.swap().context("display swap failed")?;
        Ok(())
    }

    fn capture_screenshot(&mut self) -> anyhow::Result<PathBuf> {
        let pixels = self.renderer.read_composed_pixels(&self.gl);
        screenshot::save_rgba(
            &self.capture_dir,
            self.renderer.width(),
            self.renderer.height(),
            &pixels,
        )
    }
}

/// Main entry point for the `kms-player` application.
///
/// Exit status: 0 on a clean stop, 1 when initialization fails, 2 when
/// playback fails at runtime.
fn main() -> ExitCode {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting kms-player...");

    let (source, sink, control, timing) = match initialize() {
        Ok(parts) => parts,
        Err(e) => {
            error!("Initialization failed: {:#}. Root cause: {:?}", e, e.root_cause());
            return ExitCode::from(1);
        }
    };

    let coordinator = PlaybackCoordinator::new(source, sink, control, timing);
    match coordinator.run() {
        Ok((source, mut sink, control)) => {
            // Teardown order: display session first, then render pipeline,
            // then the frame source.
            sink.session.close();
            drop(sink);
            drop(source);
            drop(control);
            info!("kms-player exited successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Playback failed: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Brings up every component in dependency order: display session, GL
/// context, renderer, overlay, frame source, keyboard control.
fn initialize() -> anyhow::Result<(
    GstFrameSource,
    VideoSink,
    StdinControl,
    config::TimingConfig,
)> {
    let config = Config::load().context("configuration loading failed")?;

    let mut session = DisplaySession::new(KmsBackend::new());
    session.open().context("display bring-up failed")?;
    let width = session
        .width()
        .context("configured session has no mode width")?;
    let height = session
        .height()
        .context("configured session has no mode height")?;

    let gl = session
        .create_gl_context()
        .context("GL loading failed")?;
    let renderer = Renderer::new(&gl, width, height, config.render.path.into())
        .context("render pipeline construction failed")?;
    info!("Render pipeline ready ({:?} path)", renderer.path());

    let overlay = if config.overlay.enabled {
        Some(
            Overlay::new(&gl, &config.overlay, width, height)
                .context("overlay construction failed")?,
        )
    } else {
        None
    };

    let source = GstFrameSource::new(&config.media.path)
        .context("frame source construction failed")?;
    let control = StdinControl::new().context("keyboard control setup failed")?;

    let sink = VideoSink {
        session,
        gl,
        renderer,
        overlay,
        capture_dir: config.capture.directory.clone(),
    };
    Ok((source, sink, control, config.timing))
}
