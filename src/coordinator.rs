// src/coordinator.rs

//! The playback loop: ties the frame source, the presentation sink and the
//! user control together.
//!
//! State machine: `AwaitingFirstFrame` until the source produces a frame
//! within the startup budget (else `StartupTimeout`), then `Playing` until
//! the user stops playback or the source fails, then `Stopped`. Single
//! threaded; the only suspension points are the bounded acquire and the
//! empty-iteration backoff sleep.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::TimingConfig;
use crate::diag::{available_memory_kb, ElapsedTimer, FpsCounter};
use crate::error::PlaybackError;
use crate::source::{Acquire, DecodedFrame, FrameSource};

/// Log "no frame yet" only every Nth consecutive miss.
const MISS_LOG_EVERY: u32 = 10;

/// Keys the user can press during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    Stop,
    Screenshot,
}

/// Non-blocking user input.
pub trait UserControl {
    fn poll_key(&mut self) -> Option<ControlKey>;
}

/// Where acquired frames go: the render-and-present bundle.
pub trait FrameSink {
    /// Renders and presents one frame. Errors are logged and playback
    /// continues; the frame is still released afterwards.
    fn present(&mut self, frame: &DecodedFrame) -> anyhow::Result<()>;

    /// Captures the last composed frame to disk.
    fn capture_screenshot(&mut self) -> anyhow::Result<PathBuf>;
}

pub struct PlaybackCoordinator<S, K, C>
where
    S: FrameSource,
    K: FrameSink,
    C: UserControl,
{
    // Declaration order is drop order: when `run` returns an error and
    // `self` goes down with it, the sink (and the display session inside)
    // must be torn down before the frame source.
    sink: K,
    source: S,
    control: C,
    timing: TimingConfig,
}

impl<S, K, C> PlaybackCoordinator<S, K, C>
where
    S: FrameSource,
    K: FrameSink,
    C: UserControl,
{
    pub fn new(source: S, sink: K, control: C, timing: TimingConfig) -> Self {
        PlaybackCoordinator {
            sink,
            source,
            control,
            timing,
        }
    }

    /// Runs playback to completion. Returns once the user stops playback;
    /// fails on startup timeout or a fatal source error.
    ///
    /// The parts are handed back so the caller controls teardown order.
    pub fn run(mut self) -> Result<(S, K, C), PlaybackError> {
        self.await_first_frame()?;
        info!("First frame presented, playback running");
        self.play()?;
        info!("Playback stopped");
        Ok((self.source, self.sink, self.control))
    }

    /// Waits for the first frame within the startup budget and presents it.
    fn await_first_frame(&mut self) -> Result<(), PlaybackError> {
        let deadline = Instant::now() + Duration::from_millis(self.timing.startup_timeout_ms);
        let acquire_timeout = Duration::from_millis(self.timing.acquire_timeout_ms);

        loop {
            if Instant::now() >= deadline {
                error!(
                    "No frame within {} ms of startup",
                    self.timing.startup_timeout_ms
                );
                return Err(PlaybackError::StartupTimeout);
            }
            self.source.pump_events()?;
            match self.source.try_acquire(acquire_timeout)? {
                Acquire::Frame(frame) => {
                    self.present_and_release(frame);
                    return Ok(());
                }
                Acquire::Empty | Acquire::EndOfStream => {
                    thread::sleep(Duration::from_millis(self.timing.empty_backoff_ms));
                }
            }
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let acquire_timeout = Duration::from_millis(self.timing.acquire_timeout_ms);
        let backoff = Duration::from_millis(self.timing.empty_backoff_ms);
        let mut fps = FpsCounter::new();
        let elapsed = ElapsedTimer::new();
        let mut misses = 0u32;

        loop {
            match self.control.poll_key() {
                Some(ControlKey::Stop) => {
                    info!("Stop requested");
                    return Ok(());
                }
                Some(ControlKey::Screenshot) => match self.sink.capture_screenshot() {
                    Ok(path) => info!("Captured {:?}", path),
                    Err(e) => warn!("Screenshot failed: {:#}", e),
                },
                None => {}
            }

            self.source.pump_events()?;

            match self.source.try_acquire(acquire_timeout)? {
                Acquire::Frame(frame) => {
                    misses = 0;
                    self.present_and_release(frame);
                    if let Some(rate) = fps.frame() {
                        let mem = available_memory_kb()
                            .map(|kb| format!("{} MiB free", kb / 1024))
                            .unwrap_or_else(|| "mem n/a".into());
                        info!("{} fps, {}, elapsed {}", rate, mem, elapsed.display());
                    }
                }
                Acquire::Empty | Acquire::EndOfStream => {
                    misses += 1;
                    if misses % MISS_LOG_EVERY == 0 {
                        debug!("No frame yet ({} consecutive misses)", misses);
                    }
                    thread::sleep(backoff);
                }
            }
        }
    }

    /// Presentation failures never kill playback; the frame always goes
    /// back to the source.
    fn present_and_release(&mut self, frame: DecodedFrame) {
        if let Err(e) = self.sink.present(&frame) {
            warn!("Frame presentation failed: {:#}", e);
        }
        self.source.release(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test; // For logging within tests

    fn fast_timing() -> TimingConfig {
        TimingConfig {
            acquire_timeout_ms: 0,
            empty_backoff_ms: 0,
            startup_timeout_ms: 50,
        }
    }

    fn frame() -> DecodedFrame {
        DecodedFrame::new(Box::new(vec![0u8; DecodedFrame::i420_size(4, 4)]), 4, 4)
    }

    /// Produces a frame on every acquire, tracking pairing.
    #[derive(Debug)]
    struct CountingSource {
        acquired: u32,
        released: u32,
        pumps: u32,
        fail_pump: bool,
    }

    impl CountingSource {
        fn new() -> Self {
            CountingSource {
                acquired: 0,
                released: 0,
                pumps: 0,
                fail_pump: false,
            }
        }
    }

    impl FrameSource for CountingSource {
        fn try_acquire(&mut self, _timeout: Duration) -> Result<Acquire, PlaybackError> {
            assert_eq!(
                self.acquired, self.released,
                "acquire while a frame is outstanding"
            );
            self.acquired += 1;
            Ok(Acquire::Frame(frame()))
        }

        fn release(&mut self, frame: DecodedFrame) {
            self.released += 1;
            drop(frame);
        }

        fn pump_events(&mut self) -> Result<(), PlaybackError> {
            self.pumps += 1;
            if self.fail_pump {
                return Err(PlaybackError::Stream("bus error".into()));
            }
            Ok(())
        }
    }

    /// Never produces anything.
    #[derive(Debug)]
    struct NeverSource;

    impl FrameSource for NeverSource {
        fn try_acquire(&mut self, _timeout: Duration) -> Result<Acquire, PlaybackError> {
            Ok(Acquire::Empty)
        }
        fn release(&mut self, _frame: DecodedFrame) {}
        fn pump_events(&mut self) -> Result<(), PlaybackError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct CountingSink {
        presented: u32,
        screenshots: u32,
        fail_present: bool,
    }

    impl CountingSink {
        fn new() -> Self {
            CountingSink {
                presented: 0,
                screenshots: 0,
                fail_present: false,
            }
        }
    }

    impl FrameSink for CountingSink {
        fn present(&mut self, _frame: &DecodedFrame) -> anyhow::Result<()> {
            self.presented += 1;
            if self.fail_present {
                anyhow::bail!("sink failure");
            }
            Ok(())
        }

        fn capture_screenshot(&mut self) -> anyhow::Result<PathBuf> {
            self.screenshots += 1;
            Ok(PathBuf::from("screenshot-test.png"))
        }
    }

    /// Replays a fixed key script, one entry per poll.
    #[derive(Debug)]
    struct ScriptedControl {
        script: Vec<Option<ControlKey>>,
        index: usize,
    }

    impl ScriptedControl {
        fn stop_after(polls: usize) -> Self {
            let mut script = vec![None; polls];
            script.push(Some(ControlKey::Stop));
            ScriptedControl { script, index: 0 }
        }
    }

    impl UserControl for ScriptedControl {
        fn poll_key(&mut self) -> Option<ControlKey> {
            let key = self.script.get(self.index).copied().flatten();
            self.index += 1;
            key
        }
    }

    #[test]
    fn three_hundred_frames_with_exact_pairing() {
        let coordinator = PlaybackCoordinator::new(
            CountingSource::new(),
            CountingSink::new(),
            ScriptedControl::stop_after(300),
            fast_timing(),
        );
        let (source, sink, _) = coordinator.run().unwrap();

        // One present during startup, 300 in the loop before the stop key.
        assert_eq!(sink.presented, 301);
        assert_eq!(source.acquired, 301);
        assert_eq!(source.released, 301);
    }

    #[test]
    fn startup_times_out_without_frames() {
        let coordinator = PlaybackCoordinator::new(
            NeverSource,
            CountingSink::new(),
            ScriptedControl::stop_after(0),
            fast_timing(),
        );
        assert!(matches!(
            coordinator.run().unwrap_err(),
            PlaybackError::StartupTimeout
        ));
    }

    #[test]
    fn pump_error_is_fatal() {
        let mut source = CountingSource::new();
        source.fail_pump = true;
        let coordinator = PlaybackCoordinator::new(
            source,
            CountingSink::new(),
            ScriptedControl::stop_after(100),
            fast_timing(),
        );
        assert!(matches!(
            coordinator.run().unwrap_err(),
            PlaybackError::Stream(_)
        ));
    }

    #[test]
    fn present_failure_still_releases_and_continues() {
        let mut sink = CountingSink::new();
        sink.fail_present = true;
        let coordinator = PlaybackCoordinator::new(
            CountingSource::new(),
            sink,
            ScriptedControl::stop_after(10),
            fast_timing(),
        );
        let (source, sink, _) = coordinator.run().unwrap();
        assert_eq!(sink.presented, 11);
        assert_eq!(source.released, source.acquired);
    }

    #[test]
    fn error_path_drops_sink_before_source() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct DroppingSource {
            log: Rc<RefCell<Vec<&'static str>>>,
        }
        impl FrameSource for DroppingSource {
            fn try_acquire(&mut self, _timeout: Duration) -> Result<Acquire, PlaybackError> {
                Ok(Acquire::Empty)
            }
            fn release(&mut self, _frame: DecodedFrame) {}
            fn pump_events(&mut self) -> Result<(), PlaybackError> {
                Ok(())
            }
        }
        impl Drop for DroppingSource {
            fn drop(&mut self) {
                self.log.borrow_mut().push("source");
            }
        }

        struct DroppingSink {
            log: Rc<RefCell<Vec<&'static str>>>,
        }
        impl FrameSink for DroppingSink {
            fn present(&mut self, _frame: &DecodedFrame) -> anyhow::Result<()> {
                Ok(())
            }
            fn capture_screenshot(&mut self) -> anyhow::Result<PathBuf> {
                Ok(PathBuf::new())
            }
        }
        impl Drop for DroppingSink {
            fn drop(&mut self) {
                self.log.borrow_mut().push("sink");
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let coordinator = PlaybackCoordinator::new(
            DroppingSource { log: log.clone() },
            DroppingSink { log: log.clone() },
            ScriptedControl::stop_after(0),
            fast_timing(),
        );
        // The source never produces, so run fails and drops everything.
        assert!(coordinator.run().is_err());
        assert_eq!(*log.borrow(), vec!["sink", "source"]);
    }

    #[test]
    fn screenshot_key_invokes_capture() {
        let mut script = vec![None, Some(ControlKey::Screenshot), None];
        script.push(Some(ControlKey::Stop));
        let control = ScriptedControl { script, index: 0 };
        let coordinator = PlaybackCoordinator::new(
            CountingSource::new(),
            CountingSink::new(),
            control,
            fast_timing(),
        );
        let (_, sink, _) = coordinator.run().unwrap();
        assert_eq!(sink.screenshots, 1);
    }
}
