//! GStreamer RTSP decode sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::camera::{redact_url, Transport};
use crate::capture::connection::{Backend, ReleaseHandle, Session};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::{Result, StreamError};

const STATE_WAIT: Duration = Duration::from_secs(5);
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(500);
/// Frame interval assumed before the caps announce a rate.
const FALLBACK_FPS: u64 = 15;

/// Opens one `rtspsrc ! decodebin` pipeline per session.
#[derive(Debug, Default)]
pub struct GstBackend {
    sequence: Arc<AtomicU64>,
}

impl GstBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn pipeline_description(transport: Transport) -> String {
        // Location is set as a property so credentials never pass through
        // the launch parser or its debug output.
        format!(
            "rtspsrc name=src latency=0 protocols={} ! \
             decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            transport.as_str()
        )
    }
}

impl Backend for GstBackend {
    fn open(&self, url: &str, transport: Transport) -> Result<Box<dyn Session>> {
        gst::init().map_err(|e| StreamError::open(format!("failed to initialize GStreamer: {e}")))?;

        let description = Self::pipeline_description(transport);
        debug!("Pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| StreamError::open(format!("failed to build pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| StreamError::open("launch description is not a pipeline"))?;

        let source = pipeline
            .by_name("src")
            .ok_or_else(|| StreamError::open("rtspsrc element missing from pipeline"))?;
        source.set_property("location", url);

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| StreamError::open("appsink element missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| StreamError::open("appsink element has unexpected type"))?;

        let session = GstSession {
            pipeline,
            appsink,
            sequence: self.sequence.clone(),
            read_timeout: read_timeout(FALLBACK_FPS),
            closed: false,
        };
        session.play(url)?;
        Ok(Box::new(session))
    }
}

/// Four frame intervals, never less than half a second.
fn read_timeout(fps: u64) -> Duration {
    let interval_ms = 1000 / fps.max(1);
    Duration::from_millis(interval_ms.saturating_mul(4)).max(MIN_READ_TIMEOUT)
}

struct GstSession {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    sequence: Arc<AtomicU64>,
    read_timeout: Duration,
    closed: bool,
}

impl GstSession {
    fn play(&self, url: &str) -> Result<()> {
        let redacted = redact_url(url);
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            let _ = self.pipeline.set_state(gst::State::Null);
            StreamError::open(format!("{redacted}: failed to start pipeline: {e:?}"))
        })?;

        let (result, _, _) = self
            .pipeline
            .state(Some(gst::ClockTime::from_mseconds(STATE_WAIT.as_millis() as u64)));
        match result {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!(url = %redacted, "Pipeline playing");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => {
                info!(url = %redacted, "Pipeline starting asynchronously");
                Ok(())
            }
            Err(e) => {
                let detail = self.bus_error().unwrap_or_else(|| format!("{e:?}"));
                let _ = self.pipeline.set_state(gst::State::Null);
                Err(StreamError::open(format!("{redacted}: {detail}")))
            }
        }
    }

    /// First pending error or end-of-stream on the bus.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gst::ClockTime::ZERO) {
            use gst::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("end of stream".to_string()),
                _ => {}
            }
        }
        None
    }

    fn sample_to_frame(&mut self, sample: &gst::Sample) -> Result<Frame> {
        let buffer = sample.buffer().ok_or_else(|| StreamError::read("sample contains no buffer"))?;
        let caps = sample.caps().ok_or_else(|| StreamError::read("sample has no caps"))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| StreamError::read("failed to parse video info from caps"))?;

        let fps = info.fps();
        if fps.numer() > 0 && fps.denom() > 0 {
            self.read_timeout = read_timeout((fps.numer() / fps.denom()).max(1) as u64);
        }

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * 3;
        let stride = info.stride()[0] as usize;

        let map = buffer
            .map_readable()
            .map_err(|_| StreamError::read("failed to map buffer"))?;
        let data = map.as_slice();

        let pixels = if stride == row_bytes {
            Bytes::copy_from_slice(data.get(..row_bytes * height as usize).unwrap_or(data))
        } else {
            let mut packed = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                let line = data
                    .get(start..start + row_bytes)
                    .ok_or_else(|| StreamError::read("buffer row is out of bounds"))?;
                packed.extend_from_slice(line);
            }
            Bytes::from(packed)
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Frame {
            data: pixels,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: row_bytes as u32,
                format: PixelFormat::Rgb24,
                device_timestamp: buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds())),
            }),
            timestamp: Instant::now(),
        })
    }
}

impl Session for GstSession {
    fn read_frame(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(StreamError::read("session is closed"));
        }
        if let Some(err) = self.bus_error() {
            return Err(StreamError::read(err));
        }

        let timeout = gst::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => self.sample_to_frame(&sample),
            None if self.appsink.is_eos() => Err(StreamError::read("end of stream")),
            None => Err(StreamError::read(format!("no frame within {:?}", self.read_timeout))),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }

    fn release_handle(&self) -> Option<ReleaseHandle> {
        let pipeline = self.pipeline.clone();
        Some(ReleaseHandle::new(move || {
            let _ = pipeline.set_state(gst::State::Null);
        }))
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        self.close();
    }
}
