// src/source/mod.rs

//! The decoded-frame supplier contract.
//!
//! A `FrameSource` hands out one planar I420 frame at a time under a bounded
//! wait; every acquired frame must be given back with `release` before the
//! next acquire. `pump_events` must be called once per loop iteration so the
//! source can service out-of-band events (end of stream, fatal errors).

pub mod gst;

use std::time::Duration;

use crate::error::PlaybackError;

/// One decoded I420 video frame.
///
/// The planes live back to back in a single allocation: `w*h` luma bytes,
/// then two `(w/2)*(h/2)` chroma planes.
pub struct DecodedFrame {
    storage: Box<dyn AsRef<[u8]> + Send>,
    width: u32,
    height: u32,
}

impl DecodedFrame {
    /// Wraps a backing allocation.
    ///
    /// Panics when `storage` holds fewer than `w*h + 2*(w/2)*(h/2)` bytes;
    /// the plane accessors would read out of bounds otherwise.
    pub fn new(storage: Box<dyn AsRef<[u8]> + Send>, width: u32, height: u32) -> Self {
        let len = (*storage).as_ref().len();
        assert!(
            len >= Self::i420_size(width, height),
            "I420 storage too small: {} bytes for {}x{}",
            len,
            width,
            height
        );
        DecodedFrame {
            storage,
            width,
            height,
        }
    }

    pub fn i420_size(width: u32, height: u32) -> usize {
        let luma = (width as usize) * (height as usize);
        let chroma = ((width / 2) as usize) * ((height / 2) as usize);
        luma + 2 * chroma
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn luma_len(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    fn chroma_len(&self) -> usize {
        ((self.width / 2) as usize) * ((self.height / 2) as usize)
    }

    pub fn y_plane(&self) -> &[u8] {
        &(*self.storage).as_ref()[..self.luma_len()]
    }

    pub fn u_plane(&self) -> &[u8] {
        let start = self.luma_len();
        &(*self.storage).as_ref()[start..start + self.chroma_len()]
    }

    pub fn v_plane(&self) -> &[u8] {
        let start = self.luma_len() + self.chroma_len();
        &(*self.storage).as_ref()[start..start + self.chroma_len()]
    }
}

/// Outcome of a bounded acquire.
pub enum Acquire {
    /// A frame is ready; it must be released before the next acquire.
    Frame(DecodedFrame),
    /// Nothing arrived within the timeout; retry after a backoff.
    Empty,
    /// The stream ended; a looping source restarts itself and this becomes
    /// a transient condition.
    EndOfStream,
}

pub trait FrameSource {
    /// Waits up to `timeout` for the next decoded frame.
    fn try_acquire(&mut self, timeout: Duration) -> Result<Acquire, PlaybackError>;

    /// Returns a frame obtained from `try_acquire`. Paired exactly 1:1.
    fn release(&mut self, frame: DecodedFrame);

    /// Services pending source events. An error is fatal to playback.
    fn pump_events(&mut self) -> Result<(), PlaybackError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_size_matches_plane_layout() {
        assert_eq!(DecodedFrame::i420_size(4, 4), 16 + 2 * 4);
        assert_eq!(DecodedFrame::i420_size(1920, 1080), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn plane_accessors_partition_the_storage() {
        let mut data = Vec::new();
        data.extend(std::iter::repeat(1u8).take(16)); // Y, 4x4
        data.extend(std::iter::repeat(2u8).take(4)); // U, 2x2
        data.extend(std::iter::repeat(3u8).take(4)); // V, 2x2
        let frame = DecodedFrame::new(Box::new(data), 4, 4);

        assert!(frame.y_plane().iter().all(|&b| b == 1));
        assert!(frame.u_plane().iter().all(|&b| b == 2));
        assert!(frame.v_plane().iter().all(|&b| b == 3));
        assert_eq!(frame.y_plane().len(), 16);
        assert_eq!(frame.u_plane().len(), 4);
        assert_eq!(frame.v_plane().len(), 4);
    }

    #[test]
    #[should_panic(expected = "I420 storage too small")]
    fn undersized_storage_is_rejected_at_construction() {
        let short = vec![0u8; DecodedFrame::i420_size(4, 4) - 1];
        let _ = DecodedFrame::new(Box::new(short), 4, 4);
    }
}
