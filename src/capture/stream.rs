//! Public lifecycle object for one camera stream

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::camera::{Credentials, StreamProfile, Transport};
use crate::capture::capture_loop::{CaptureLoop, CaptureState, ReleaseSlot, StateCell};
use crate::capture::connection::{Backend, Connection};
use crate::capture::encoder::{encode_jpeg, multipart_chunk};
use crate::capture::{Frame, FrameBuffer, FrameWatch, SnapshotMode};
use crate::error::StreamError;
use crate::CaptureConfig;

/// Tunables for one stream's capture loop.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub reconnect_delay: Duration,
    pub shutdown_timeout: Duration,
    pub transport: Transport,
    pub jpeg_quality: u8,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureConfig::default().into()
    }
}

impl From<CaptureConfig> for CaptureOptions {
    fn from(config: CaptureConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            shutdown_timeout: config.shutdown_timeout,
            transport: config.transport,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Per-stream counters, mirrored to the `metrics` facade.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_published: AtomicU64,
    pub connects: AtomicU64,
    pub open_failures: AtomicU64,
    pub read_failures: AtomicU64,
    pub encode_failures: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_frame(&self, stream: &str) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geovision_frames_published_total", "stream" => stream.to_string()).increment(1);
    }

    pub(crate) fn record_connect(&self, stream: &str) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geovision_connects_total", "stream" => stream.to_string()).increment(1);
    }

    pub(crate) fn record_open_failure(&self, stream: &str) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geovision_open_failures_total", "stream" => stream.to_string()).increment(1);
    }

    pub(crate) fn record_read_failure(&self, stream: &str) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geovision_read_failures_total", "stream" => stream.to_string()).increment(1);
    }

    pub(crate) fn record_encode_failure(&self, stream: &str) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geovision_encode_failures_total", "stream" => stream.to_string()).increment(1);
    }
}

struct Worker {
    thread: JoinHandle<()>,
    running: Arc<AtomicBool>,
    state: Arc<StateCell>,
    wake: flume::Sender<()>,
    done: flume::Receiver<()>,
    release: ReleaseSlot,
}

impl Worker {
    fn signal(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.wake.try_send(());
    }

    /// Join the loop thread if it exits within `timeout`, else hand the
    /// worker back.
    fn join_within(self, timeout: Duration) -> Option<Worker> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                let _ = self.thread.join();
                None
            }
            Err(flume::RecvTimeoutError::Timeout) => Some(self),
        }
    }
}

#[derive(Default)]
struct Workers {
    active: Option<Worker>,
    /// Loop that outlived `stop` even after its session was released. It
    /// still owns a connection, so no new loop starts until it exits.
    lingering: Option<Worker>,
}

/// One logical camera stream: a capture loop plus its frame buffer.
///
/// Constructed once by the entry point and shared (behind an `Arc`) with
/// every consumer. `start` and `stop` may be called from any thread.
///
/// Dropping a handle only signals its loop to exit and never blocks; call
/// [`StreamHandle::stop`] for a bounded, joined shutdown.
pub struct StreamHandle {
    name: String,
    profile: StreamProfile,
    credentials: Credentials,
    options: CaptureOptions,
    backend: Arc<dyn Backend>,
    buffer: FrameBuffer,
    running: AtomicBool,
    /// State cell of the current loop; replaced on every start.
    state: ArcSwap<StateCell>,
    stats: Arc<CaptureStats>,
    workers: Mutex<Workers>,
}

impl StreamHandle {
    pub fn new(
        name: impl Into<String>,
        profile: StreamProfile,
        credentials: Credentials,
        options: CaptureOptions,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            name: name.into(),
            profile,
            credentials,
            options,
            backend,
            buffer: FrameBuffer::new(),
            running: AtomicBool::new(false),
            state: ArcSwap::from_pointee(StateCell::new(CaptureState::Stopped)),
            stats: Arc::new(CaptureStats::default()),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    pub fn rtsp_url(&self) -> String {
        self.credentials.rtsp_url(&self.profile)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// `Stopped` as soon as `stop` has begun, even if a detached loop is
    /// still winding down.
    pub fn state(&self) -> CaptureState {
        if !self.is_running() {
            return CaptureState::Stopped;
        }
        self.state.load().get()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Launch the capture loop. No-op while a loop is already running.
    ///
    /// Fails with `WouldBlock` if a loop detached by an earlier `stop` still
    /// holds its connection after another `shutdown_timeout`.
    #[instrument(skip(self), fields(stream = %self.name))]
    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        if workers.active.is_some() {
            return Ok(());
        }
        if let Some(lingering) = workers.lingering.take() {
            if let Some(lingering) = lingering.join_within(self.options.shutdown_timeout) {
                workers.lingering = Some(lingering);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    format!("previous capture loop for '{}' still holds its connection", self.name),
                ));
            }
            debug!("Previous capture loop exited");
        }

        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(StateCell::new(CaptureState::Disconnected));
        let (wake_tx, wake_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let release: ReleaseSlot = Arc::new(Mutex::new(None));
        let generation = self.buffer.open();

        let capture = CaptureLoop {
            name: self.name.clone(),
            url: self.rtsp_url(),
            transport: self.options.transport,
            reconnect_delay: self.options.reconnect_delay,
            connection: Connection::new(self.backend.clone()),
            buffer: self.buffer.clone(),
            generation,
            running: running.clone(),
            state: state.clone(),
            release: release.clone(),
            stats: self.stats.clone(),
            wake: wake_rx,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || {
                capture.run();
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.buffer.seal();
                return Err(e);
            }
        };

        self.state.store(state.clone());
        self.running.store(true, Ordering::Release);
        info!(profile = %self.profile.profile_id, "Stream started");
        workers.active = Some(Worker {
            thread,
            running,
            state,
            wake: wake_tx,
            done: done_rx,
            release,
        });
        Ok(())
    }

    /// Stop the capture loop and release its connection.
    ///
    /// Waits at most `shutdown_timeout` for the loop to exit; past that the
    /// session is torn down through its release handle and the loop gets
    /// another `shutdown_timeout` to close it. A loop still blocked after
    /// that is kept aside and `start` waits for it. No frame is published
    /// after this returns.
    #[instrument(skip(self), fields(stream = %self.name))]
    pub fn stop(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        self.running.store(false, Ordering::Release);
        self.buffer.seal();

        let Some(worker) = workers.active.take() else {
            return;
        };
        worker.signal();

        let timeout = self.options.shutdown_timeout;
        if let Some(worker) = worker.join_within(timeout) {
            let err = StreamError::ShutdownTimeout {
                stream: self.name.clone(),
                waited: timeout,
            };
            warn!(error = %err, "Forcing session release");
            let handle = worker.release.lock().unwrap_or_else(|p| p.into_inner()).take();
            if let Some(handle) = handle {
                handle.release();
            }
            // Its generation can no longer publish.
            worker.state.set(CaptureState::Stopped);

            if let Some(worker) = worker.join_within(timeout) {
                warn!("Capture loop still blocked after release, detaching");
                workers.lingering = Some(worker);
            }
        }
        info!("Stream stopped");
    }

    /// Most recently published frame, if any.
    pub fn latest_frame(&self, mode: SnapshotMode) -> Option<Frame> {
        self.buffer.snapshot(mode)
    }

    /// Every fresh frame until the stream stops. Each call gets its own
    /// independent sequence; slow consumers skip frames.
    pub fn frame_sequence(&self) -> impl Stream<Item = Frame> + Send + 'static {
        stream::unfold(self.buffer.watch(), |mut watch| async move {
            let frame = watch.next_fresh().await?;
            Some((frame, watch))
        })
    }

    /// Multipart JPEG parts for the HTTP video endpoint.
    ///
    /// With a frame-rate hint, parts are spaced at least `1/hint` apart;
    /// without one they follow the publish rate. Frames that fail to encode
    /// are skipped. Ends when the stream stops.
    pub fn encoded_sequence(&self, frame_rate_hint: Option<f64>) -> impl Stream<Item = Bytes> + Send + 'static {
        let pace = frame_rate_hint
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps));

        let state = EncodeState {
            watch: self.buffer.watch(),
            pace,
            next_due: None,
            quality: self.options.jpeg_quality,
            name: self.name.clone(),
            stats: self.stats.clone(),
        };

        stream::unfold(state, |mut state| async move {
            let part = state.next_part().await?;
            Some((part, state))
        })
    }
}

struct EncodeState {
    watch: FrameWatch,
    pace: Option<Duration>,
    next_due: Option<Instant>,
    quality: u8,
    name: String,
    stats: Arc<CaptureStats>,
}

impl EncodeState {
    async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            if let Some(due) = self.next_due {
                tokio::time::sleep_until(due).await;
            }
            let frame = self.watch.next_fresh().await?;

            let quality = self.quality;
            let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await;
            match encoded {
                Ok(Ok(jpeg)) => {
                    self.next_due = self.pace.map(|pace| Instant::now() + pace);
                    return Some(multipart_chunk(&jpeg));
                }
                Ok(Err(e)) => {
                    self.stats.record_encode_failure(&self.name);
                    debug!(stream = %self.name, error = %StreamError::from(e), "Skipping frame");
                }
                Err(e) => {
                    self.stats.record_encode_failure(&self.name);
                    debug!(stream = %self.name, error = %e, "Encoder task failed, skipping frame");
                }
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.buffer.seal();
        let workers = self.workers.get_mut().unwrap_or_else(|p| p.into_inner());
        for worker in workers.active.take().into_iter().chain(workers.lingering.take()) {
            worker.signal();
        }
    }
}
