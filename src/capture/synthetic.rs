//! Synthetic test-pattern source for demos and builds without GStreamer

use std::time::{Duration, Instant};

use tracing::info;

use crate::camera::{redact_url, Transport};
use crate::capture::connection::{Backend, Session};
use crate::capture::{Frame, PixelFormat};
use crate::error::Result;

const DEFAULT_WIDTH: u32 = 384;
const DEFAULT_HEIGHT: u32 = 288;
const DEFAULT_FPS: f64 = 15.0;

/// Produces a moving gradient at a fixed rate. Never fails.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    width: u32,
    height: u32,
    fps: f64,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }

    pub fn with_geometry(mut self, width: u32, height: u32, fps: f64) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self.fps = if fps > 0.0 { fps } else { DEFAULT_FPS };
        self
    }
}

impl Backend for SyntheticBackend {
    fn open(&self, url: &str, _transport: Transport) -> Result<Box<dyn Session>> {
        info!(url = %redact_url(url), "Opening synthetic source");
        Ok(Box::new(SyntheticSession {
            width: self.width,
            height: self.height,
            interval: Duration::from_secs_f64(1.0 / self.fps),
            sequence: 0,
            next_at: Instant::now(),
        }))
    }
}

struct SyntheticSession {
    width: u32,
    height: u32,
    interval: Duration,
    sequence: u64,
    next_at: Instant,
}

impl SyntheticSession {
    fn pattern(&self) -> Vec<u8> {
        let shift = (self.sequence * 4) as u32;
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift / 2) % 256) as u8);
                pixels.push(((x ^ y) % 256) as u8);
            }
        }
        pixels
    }
}

impl Session for SyntheticSession {
    fn read_frame(&mut self) -> Result<Frame> {
        let now = Instant::now();
        if self.next_at > now {
            std::thread::sleep(self.next_at - now);
        }
        self.next_at = Instant::now() + self.interval;
        self.sequence += 1;
        Ok(Frame::new(
            self.pattern(),
            self.width,
            self.height,
            PixelFormat::Rgb24,
            self.sequence,
        ))
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_requested_geometry_and_advance() {
        let backend = SyntheticBackend::new().with_geometry(8, 4, 1000.0);
        let mut session = backend.open("rtsp://synthetic/rgb", Transport::Tcp).unwrap();
        let a = session.read_frame().unwrap();
        let b = session.read_frame().unwrap();
        assert_eq!((a.width(), a.height()), (8, 4));
        assert_eq!(a.data.len(), 8 * 4 * 3);
        assert_eq!(b.meta.sequence, a.meta.sequence + 1);
        assert_ne!(a.data, b.data);
    }
}
