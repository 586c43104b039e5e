// src/source/gst.rs

//! GStreamer-backed frame source.
//!
//! Decodes an MP4 file through a fixed pipeline ending in an `appsink`
//! producing I420, pulled with a bounded timeout. The appsink drops stale
//! buffers under backpressure. End of stream is handled on the bus by
//! flushing-seeking back to zero, so playback loops forever.

use std::path::Path;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use log::{debug, info, warn};

use crate::error::PlaybackError;
use crate::source::{Acquire, DecodedFrame, FrameSource};

/// Upper bound on buffers queued inside the appsink.
const APPSINK_MAX_BUFFERS: u32 = 10;

pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    /// Frame dimensions, learned from the first sample's caps.
    dimensions: Option<(u32, u32)>,
}

impl GstFrameSource {
    /// Builds and starts the decode pipeline for `media_path`.
    pub fn new(media_path: &Path) -> anyhow::Result<Self> {
        gst::init().map_err(|e| anyhow::anyhow!("GStreamer init failed: {}", e))?;

        let description = format!(
            "filesrc location=\"{}\" ! qtdemux name=demux demux.video_0 \
             ! queue ! h264parse ! avdec_h264 ! queue ! videoconvert \
             ! video/x-raw,format=I420 ! appsink name=sink sync=true",
            media_path.display()
        );
        debug!("Pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| anyhow::anyhow!("pipeline construction failed: {}", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("parsed element is not a pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| anyhow::anyhow!("appsink not found in pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("sink element is not an appsink"))?;

        // Pull model: no signals, bounded queue, drop the oldest when full.
        appsink.set_property("emit-signals", false);
        appsink.set_drop(true);
        appsink.set_max_buffers(APPSINK_MAX_BUFFERS);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| anyhow::anyhow!("failed to start pipeline: {}", e))?;
        info!("Playback pipeline started for {:?}", media_path);

        Ok(GstFrameSource {
            pipeline,
            appsink,
            dimensions: None,
        })
    }

    fn sample_dimensions(&mut self, sample: &gst::Sample) -> Result<(u32, u32), PlaybackError> {
        if let Some(dims) = self.dimensions {
            return Ok(dims);
        }
        let caps = sample
            .caps()
            .ok_or_else(|| PlaybackError::Stream("sample without caps".into()))?;
        let s = caps
            .structure(0)
            .ok_or_else(|| PlaybackError::Stream("caps without structure".into()))?;
        let width = s
            .get::<i32>("width")
            .map_err(|e| PlaybackError::Stream(format!("caps width: {}", e)))?;
        let height = s
            .get::<i32>("height")
            .map_err(|e| PlaybackError::Stream(format!("caps height: {}", e)))?;
        let dims = (width as u32, height as u32);
        info!("Decoded stream is {}x{}", dims.0, dims.1);
        self.dimensions = Some(dims);
        Ok(dims)
    }

    fn restart(&self) -> Result<(), PlaybackError> {
        info!("End of stream, seeking back to start");
        self.pipeline
            .seek(
                1.0,
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::SeekType::Set,
                gst::ClockTime::ZERO,
                gst::SeekType::None,
                gst::ClockTime::NONE,
            )
            .map_err(|e| PlaybackError::Stream(format!("loop seek failed: {}", e)))
    }
}

impl FrameSource for GstFrameSource {
    fn try_acquire(&mut self, timeout: Duration) -> Result<Acquire, PlaybackError> {
        let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let sample = match self.appsink.try_pull_sample(timeout) {
            Some(sample) => sample,
            None => {
                return Ok(if self.appsink.is_eos() {
                    Acquire::EndOfStream
                } else {
                    Acquire::Empty
                });
            }
        };

        let (width, height) = self.sample_dimensions(&sample)?;
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| PlaybackError::Stream("sample without buffer".into()))?;
        let map = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| PlaybackError::Stream("buffer not readable".into()))?;

        if map.as_ref().len() < DecodedFrame::i420_size(width, height) {
            return Err(PlaybackError::Stream(format!(
                "short I420 buffer: {} bytes for {}x{}",
                map.as_ref().len(),
                width,
                height
            )));
        }
        Ok(Acquire::Frame(DecodedFrame::new(Box::new(map), width, height)))
    }

    fn release(&mut self, frame: DecodedFrame) {
        // Dropping the frame unmaps the buffer and returns it to the pool.
        drop(frame);
    }

    fn pump_events(&mut self) -> Result<(), PlaybackError> {
        let bus = match self.pipeline.bus() {
            Some(bus) => bus,
            None => return Ok(()),
        };
        while let Some(msg) = bus.timed_pop_filtered(
            gst::ClockTime::ZERO,
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            match msg.view() {
                gst::MessageView::Eos(_) => self.restart()?,
                gst::MessageView::Error(err) => {
                    return Err(PlaybackError::Stream(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {}", e);
        }
    }
}
