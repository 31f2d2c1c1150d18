pub mod buffer;
pub mod capture_loop;
pub mod connection;
pub mod encoder;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod stream;
pub mod synthetic;

use std::sync::Arc;

use crate::SourceKind;

pub use buffer::{FrameBuffer, FrameWatch, SnapshotMode};
pub use capture_loop::CaptureState;
pub use connection::{Backend, Connection, ConnectionState, ReleaseHandle, Session};
pub use frame::{Frame, FrameMetadata, PixelFormat};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstBackend;
pub use stream::{CaptureOptions, CaptureStats, StreamHandle};
pub use synthetic::SyntheticBackend;

/// Backend for the configured source kind.
///
/// RTSP sources are decoded by GStreamer when the `gstreamer-pipeline`
/// feature is enabled; without it they fall back to the synthetic pattern.
pub fn backend_for(source: SourceKind) -> Arc<dyn Backend> {
    match source {
        SourceKind::Synthetic => Arc::new(SyntheticBackend::new()),
        #[cfg(feature = "gstreamer-pipeline")]
        SourceKind::Rtsp => Arc::new(GstBackend::new()),
        #[cfg(not(feature = "gstreamer-pipeline"))]
        SourceKind::Rtsp => {
            tracing::warn!("Built without gstreamer-pipeline; serving synthetic test pattern instead of RTSP");
            Arc::new(SyntheticBackend::new())
        }
    }
}
