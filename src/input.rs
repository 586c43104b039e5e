// src/input.rs

//! Non-blocking keyboard control over the controlling terminal.
//!
//! Puts stdin into raw, non-blocking mode and polls one byte at a time.
//! Terminal attributes and file status flags are restored on drop.

use std::io;

use anyhow::Context;
use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::coordinator::{ControlKey, UserControl};

const KEY_ESC: u8 = 0x1b;

/// Raw-mode stdin poller. ESC stops playback, `s` requests a screenshot.
pub struct StdinControl {
    saved_termios: Termios,
    saved_flags: OFlag,
    restored: bool,
}

impl StdinControl {
    /// Switches stdin to raw non-blocking mode, remembering the previous
    /// terminal attributes and file status flags.
    pub fn new() -> anyhow::Result<Self> {
        let stdin = io::stdin();
        let saved_termios =
            termios::tcgetattr(&stdin).context("failed to read terminal attributes")?;

        let mut raw = saved_termios.clone();
        raw.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw)
            .context("failed to set raw terminal mode")?;

        let flags = fcntl(&stdin, FcntlArg::F_GETFL)
            .context("failed to read stdin status flags")?;
        let saved_flags = OFlag::from_bits_truncate(flags);
        fcntl(&stdin, FcntlArg::F_SETFL(saved_flags | OFlag::O_NONBLOCK))
            .context("failed to set stdin non-blocking")?;

        debug!("Stdin switched to raw non-blocking mode");
        Ok(StdinControl {
            saved_termios,
            saved_flags,
            restored: false,
        })
    }

    fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let stdin = io::stdin();
        if let Err(e) = termios::tcsetattr(&stdin, SetArg::TCSANOW, &self.saved_termios) {
            warn!("Failed to restore terminal attributes: {}", e);
        }
        if let Err(e) = fcntl(&stdin, FcntlArg::F_SETFL(self.saved_flags)) {
            warn!("Failed to restore stdin status flags: {}", e);
        }
    }
}

impl UserControl for StdinControl {
    fn poll_key(&mut self) -> Option<ControlKey> {
        let mut buf = [0u8; 1];
        match nix::unistd::read(io::stdin(), &mut buf) {
            Ok(1) => match buf[0] {
                KEY_ESC => Some(ControlKey::Stop),
                b's' | b'S' => Some(ControlKey::Screenshot),
                _ => None,
            },
            // 0 bytes, EAGAIN, or any read failure all mean "no key".
            _ => None,
        }
    }
}

impl Drop for StdinControl {
    fn drop(&mut self) {
        self.restore();
    }
}
