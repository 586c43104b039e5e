// src/diag.rs

//! Playback-loop diagnostics: frame rate, elapsed time and available memory.

use std::time::Instant;

/// Counts presented frames and reports the rate once per second.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new() -> Self {
        FpsCounter {
            frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Records one frame. Returns `Some(fps)` when a one-second window just
    /// closed, `None` otherwise.
    pub fn frame(&mut self) -> Option<u32> {
        self.frames += 1;
        if self.window_start.elapsed().as_secs() >= 1 {
            let fps = self.frames;
            self.frames = 0;
            self.window_start = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock timer for the elapsed-time diagnostic.
#[derive(Debug)]
pub struct ElapsedTimer {
    start: Instant,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        ElapsedTimer {
            start: Instant::now(),
        }
    }

    /// Elapsed time formatted as HH:MM:SS.
    pub fn display(&self) -> String {
        let total = self.start.elapsed().as_secs();
        format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `MemAvailable` from /proc/meminfo, in kilobytes.
pub fn available_memory_kb() -> Option<u64> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&text)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_available_line() {
        let sample = "MemTotal:       16262192 kB\n\
                      MemFree:          832516 kB\n\
                      MemAvailable:   10183220 kB\n\
                      Buffers:          403280 kB\n";
        assert_eq!(parse_mem_available(sample), Some(10_183_220));
    }

    #[test]
    fn missing_mem_available_yields_none() {
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn elapsed_timer_formats_hhmmss() {
        let timer = ElapsedTimer::new();
        let display = timer.display();
        assert_eq!(display.len(), 8);
        assert!(display.starts_with("00:00:0"));
    }

    #[test]
    fn fps_counter_stays_quiet_inside_window() {
        let mut counter = FpsCounter::new();
        // Frames recorded immediately after construction fall inside the
        // one-second window.
        assert_eq!(counter.frame(), None);
        assert_eq!(counter.frame(), None);
    }
}
