//! Background capture state machine
//!
//! ```text
//! Disconnected --open ok------> Connected
//! Disconnected --open failed--> Disconnected  (after backoff)
//! Connected    --read ok------> Connected     (publish)
//! Connected    --read failed--> Disconnected  (close, then backoff)
//! any          --stop---------> Stopped
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::camera::{redact_url, Transport};
use crate::capture::connection::{Connection, ReleaseHandle};
use crate::capture::stream::CaptureStats;
use crate::capture::FrameBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Disconnected = 0,
    Connected = 1,
    Stopped = 2,
}

/// Lock-free cell so readers can observe the loop state.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> CaptureState {
        match self.0.load(Ordering::Acquire) {
            0 => CaptureState::Disconnected,
            1 => CaptureState::Connected,
            _ => CaptureState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Release handle of the session currently owned by the loop.
pub(crate) type ReleaseSlot = Arc<Mutex<Option<ReleaseHandle>>>;

pub(crate) struct CaptureLoop {
    pub name: String,
    pub url: String,
    pub transport: Transport,
    pub reconnect_delay: Duration,
    pub connection: Connection,
    pub buffer: FrameBuffer,
    pub generation: u64,
    pub running: Arc<AtomicBool>,
    pub state: Arc<StateCell>,
    pub release: ReleaseSlot,
    pub stats: Arc<CaptureStats>,
    /// Any message or disconnect interrupts the backoff sleep.
    pub wake: flume::Receiver<()>,
}

impl CaptureLoop {
    pub fn run(mut self) {
        info!(stream = %self.name, url = %redact_url(&self.url), "Capture loop started");
        self.state.set(CaptureState::Disconnected);

        while self.running.load(Ordering::Acquire) {
            match self.state.get() {
                CaptureState::Disconnected => self.try_connect(),
                CaptureState::Connected => self.pump_frame(),
                CaptureState::Stopped => break,
            }
        }

        self.state.set(CaptureState::Disconnected);
        self.disconnect();
        self.state.set(CaptureState::Stopped);
        info!(stream = %self.name, "Capture loop stopped");
    }

    fn try_connect(&mut self) {
        match self.connection.open(&self.url, self.transport) {
            Ok(()) => {
                self.set_release(self.connection.release_handle());
                self.state.set(CaptureState::Connected);
                self.stats.record_connect(&self.name);
                info!(stream = %self.name, transport = %self.transport, "Connected");
            }
            Err(e) => {
                self.stats.record_open_failure(&self.name);
                warn!(stream = %self.name, error = %e, "Open failed, retrying in {:?}", self.reconnect_delay);
                self.backoff();
            }
        }
    }

    fn pump_frame(&mut self) {
        match self.connection.read_frame() {
            Ok(frame) => {
                if self.buffer.publish_as(self.generation, frame) {
                    self.stats.record_frame(&self.name);
                }
            }
            Err(e) => {
                self.stats.record_read_failure(&self.name);
                warn!(stream = %self.name, error = %e, "Read failed, reconnecting in {:?}", self.reconnect_delay);
                self.state.set(CaptureState::Disconnected);
                self.disconnect();
                self.backoff();
            }
        }
    }

    fn disconnect(&mut self) {
        self.set_release(None);
        self.connection.close();
    }

    fn set_release(&self, handle: Option<ReleaseHandle>) {
        let mut slot = self.release.lock().unwrap_or_else(|p| p.into_inner());
        *slot = handle;
    }

    /// Fixed delay; returns early when `stop` wakes the loop.
    fn backoff(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        debug!(stream = %self.name, "Backing off for {:?}", self.reconnect_delay);
        match self.wake.recv_timeout(self.reconnect_delay) {
            Err(flume::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                debug!(stream = %self.name, "Backoff interrupted");
            }
        }
    }
}
