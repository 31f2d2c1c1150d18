//! Scriptable capture backend for tests and local experiments
//!
//! Sessions produced here never touch the network. Each session shares the
//! backend's counters so tests can assert how many sessions were opened and
//! how many were alive at once.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::camera::Transport;
use crate::capture::connection::{Backend, ReleaseHandle, Session};
use crate::capture::{Frame, PixelFormat};
use crate::error::{Result, StreamError};

const GENERATED_INTERVAL: Duration = Duration::from_millis(2);
const HANG_POLL: Duration = Duration::from_millis(5);

/// Small RGB frame filled with `value`.
pub fn solid_frame(width: u32, height: u32, value: u8, sequence: u64) -> Frame {
    let len = (width * height * 3) as usize;
    Frame::new(vec![value; len], width, height, PixelFormat::Rgb24, sequence)
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    /// A fresh frame every interval.
    Generated(Duration),
    /// Only frames handed to [`ScriptedBackend::push_frame`]; a read that
    /// waits longer than the timeout fails.
    Injected(Duration),
    /// Reads block until the session is released.
    Hang,
    /// Reads block, ignoring release, until [`ScriptedBackend::resume_reads`].
    Stall,
}

#[derive(Debug)]
struct Script {
    failing_opens: u32,
    read_budget: Option<u32>,
    feed: Feed,
}

#[derive(Debug, Default)]
struct Counters {
    open_attempts: AtomicU32,
    open_sessions: AtomicUsize,
    max_concurrent: AtomicUsize,
    releases: AtomicU32,
    sequence: AtomicU64,
    stalled: AtomicBool,
}

/// Backend whose open and read outcomes are set by the test.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    counters: Arc<Counters>,
    frames_tx: flume::Sender<Frame>,
    frames_rx: flume::Receiver<Frame>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Every open succeeds and sessions produce frames continuously.
    pub fn new() -> Self {
        let (frames_tx, frames_rx) = flume::unbounded();
        Self {
            script: Mutex::new(Script {
                failing_opens: 0,
                read_budget: None,
                feed: Feed::Generated(GENERATED_INTERVAL),
            }),
            counters: Arc::new(Counters::default()),
            frames_tx,
            frames_rx,
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The next `n` opens fail. `u32::MAX` fails forever.
    pub fn fail_next_opens(&self, n: u32) {
        self.script().failing_opens = n;
    }

    /// Every session fails its read after delivering `n` frames.
    pub fn fail_read_after(&self, n: u32) {
        self.script().read_budget = Some(n);
    }

    /// Generated frames arrive every `interval`.
    pub fn generate_every(&self, interval: Duration) {
        self.script().feed = Feed::Generated(interval);
    }

    /// Switch to injected frames only. Reads fail after `read_timeout`
    /// without a frame, the way a stalled camera times out.
    pub fn use_injected_frames(&self, read_timeout: Duration) {
        self.script().feed = Feed::Injected(read_timeout);
    }

    /// Reads never return on their own; only a release unblocks them.
    pub fn hang_reads(&self) {
        self.script().feed = Feed::Hang;
    }

    /// Reads block and ignore release, like a driver call that cannot be
    /// interrupted.
    pub fn stall_reads(&self) {
        self.counters.stalled.store(true, Ordering::SeqCst);
        self.script().feed = Feed::Stall;
    }

    /// Unblock stalled reads, which then fail. Later sessions generate frames.
    pub fn resume_reads(&self) {
        self.script().feed = Feed::Generated(GENERATED_INTERVAL);
        self.counters.stalled.store(false, Ordering::SeqCst);
    }

    /// Queue a frame for the next read in injected mode.
    pub fn push_frame(&self, frame: Frame) {
        let _ = self.frames_tx.send(frame);
    }

    pub fn open_attempts(&self) -> u32 {
        self.counters.open_attempts.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.counters.open_sessions.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.counters.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of sessions torn down through their release handle.
    pub fn releases(&self) -> u32 {
        self.counters.releases.load(Ordering::SeqCst)
    }
}

impl Backend for ScriptedBackend {
    fn open(&self, url: &str, _transport: Transport) -> Result<Box<dyn Session>> {
        self.counters.open_attempts.fetch_add(1, Ordering::SeqCst);

        let (budget, feed) = {
            let mut script = self.script();
            if script.failing_opens > 0 {
                if script.failing_opens != u32::MAX {
                    script.failing_opens -= 1;
                }
                return Err(StreamError::open(format!("scripted open failure for {url}")));
            }
            (script.read_budget, script.feed)
        };

        let open = self.counters.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_concurrent.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            counters: self.counters.clone(),
            frames: self.frames_rx.clone(),
            feed,
            remaining: budget,
            closed: false,
            released: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct ScriptedSession {
    counters: Arc<Counters>,
    frames: flume::Receiver<Frame>,
    feed: Feed,
    remaining: Option<u32>,
    closed: bool,
    released: Arc<AtomicBool>,
}

impl Session for ScriptedSession {
    fn read_frame(&mut self) -> Result<Frame> {
        if self.closed || self.released.load(Ordering::Acquire) {
            return Err(StreamError::read("session released"));
        }
        match self.remaining.as_mut() {
            Some(0) => return Err(StreamError::read("scripted read failure")),
            Some(n) => *n -= 1,
            None => {}
        }

        match self.feed {
            Feed::Generated(interval) => {
                std::thread::sleep(interval);
                let seq = self.counters.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(solid_frame(4, 2, seq as u8, seq))
            }
            Feed::Injected(timeout) => self
                .frames
                .recv_timeout(timeout)
                .map_err(|_| StreamError::read("no frame before read timeout")),
            Feed::Hang => {
                while !self.released.load(Ordering::Acquire) {
                    std::thread::sleep(HANG_POLL);
                }
                Err(StreamError::read("session released"))
            }
            Feed::Stall => {
                while self.counters.stalled.load(Ordering::SeqCst) {
                    std::thread::sleep(HANG_POLL);
                }
                Err(StreamError::read("stalled read gave up"))
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn release_handle(&self) -> Option<ReleaseHandle> {
        let released = self.released.clone();
        let counters = self.counters.clone();
        Some(ReleaseHandle::new(move || {
            if !released.swap(true, Ordering::AcqRel) {
                counters.releases.fetch_add(1, Ordering::SeqCst);
            }
        }))
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.close();
    }
}
