// src/screenshot.rs

//! Screenshot capture: writes a composed RGBA frame as a timestamped PNG.
//!
//! GL `read_pixels` returns rows bottom-to-top, so the rows are flipped
//! before encoding.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;

/// Writes `pixels` (tightly packed RGBA, bottom row first) as a PNG named
/// `screenshot-YYYYMMDD-HHMMSS.png` under `directory`. Returns the path of
/// the written file.
pub fn save_rgba(
    directory: &Path,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> anyhow::Result<PathBuf> {
    let flipped = flip_rows(width as usize, height as usize, pixels);

    let filename = format!(
        "screenshot-{}.png",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    );
    let path = directory.join(filename);

    let file = File::create(&path)
        .with_context(|| format!("failed to create screenshot file {:?}", path))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder
        .write_header()
        .context("failed to write PNG header")?;
    png_writer
        .write_image_data(&flipped)
        .context("failed to write PNG image data")?;

    info!("Screenshot saved to {:?}", path);
    Ok(path)
}

/// Reverses the row order of a tightly packed RGBA image.
fn flip_rows(width: usize, height: usize, pixels: &[u8]) -> Vec<u8> {
    let stride = width * 4;
    let mut flipped = Vec::with_capacity(pixels.len());
    for row in (0..height).rev() {
        flipped.extend_from_slice(&pixels[row * stride..(row + 1) * stride]);
    }
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_rows_reverses_row_order() {
        // 2x2 image: rows [A A] [B B], one byte per channel.
        let a = [1u8, 2, 3, 4];
        let b = [5u8, 6, 7, 8];
        let mut pixels = Vec::new();
        pixels.extend_from_slice(&a);
        pixels.extend_from_slice(&a);
        pixels.extend_from_slice(&b);
        pixels.extend_from_slice(&b);

        let flipped = flip_rows(2, 2, &pixels);
        assert_eq!(&flipped[0..4], &b);
        assert_eq!(&flipped[4..8], &b);
        assert_eq!(&flipped[8..12], &a);
        assert_eq!(&flipped[12..16], &a);
    }

    #[test]
    fn flip_rows_is_identity_for_single_row() {
        let pixels = vec![9u8; 4 * 3];
        assert_eq!(flip_rows(3, 1, &pixels), pixels);
    }

    #[test]
    fn save_writes_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let pixels = vec![128u8; 4 * 4 * 4];
        let path = save_rgba(dir.path(), 4, 4, &pixels).unwrap();
        assert!(path.exists());

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf).unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 4);
        assert_eq!(&buf[..frame.buffer_size()], &pixels[..]);
    }
}
