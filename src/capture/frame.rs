use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded frame with zero-copy semantics
#[derive(Clone, Debug)]
pub struct Frame {
    /// Immutable pixel data - shared between the capture thread and readers
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Stream PTS if available
}

/// Pixel formats a backend may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
    /// Already-compressed JPEG payload
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for compressed payloads.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Build a tightly packed raw frame.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        let stride = width * format.bytes_per_pixel().unwrap_or(0);
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Deep copy of the pixel data; the result shares no storage with `self`.
    pub fn deep_copy(&self) -> Self {
        Self {
            data: Bytes::copy_from_slice(&self.data),
            meta: Arc::new((*self.meta).clone()),
            timestamp: self.timestamp,
        }
    }

    /// Take the pixels as an owned, mutable buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        Vec::from(self.data)
    }
}
