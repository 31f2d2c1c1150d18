use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use geovision_streamer::capture::{CaptureOptions, CaptureState};
use geovision_streamer::testing::{solid_frame, ScriptedBackend};
use geovision_streamer::{Credentials, Frame, PixelFormat, SnapshotMode, StreamHandle, StreamProfile, Transport};

fn options(reconnect_ms: u64, shutdown_ms: u64) -> CaptureOptions {
    CaptureOptions {
        reconnect_delay: Duration::from_millis(reconnect_ms),
        shutdown_timeout: Duration::from_millis(shutdown_ms),
        transport: Transport::Tcp,
        jpeg_quality: 80,
    }
}

fn handle(backend: Arc<ScriptedBackend>, options: CaptureOptions) -> StreamHandle {
    StreamHandle::new(
        "thermal",
        StreamProfile::new("profile4", 2, Some(15.0)),
        Credentials::new("127.0.0.1", "admin", "secret"),
        options,
        backend,
    )
}

fn wait_for(mut cond: impl FnMut() -> bool, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn connects_after_three_failed_opens() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail_next_opens(3);
    let stream = handle(backend.clone(), options(60, 1000));

    let start = Instant::now();
    stream.start().unwrap();
    assert!(wait_for(|| stream.latest_frame(SnapshotMode::Shared).is_some(), Duration::from_secs(5)));

    assert!(start.elapsed() >= Duration::from_millis(180));
    assert_eq!(stream.state(), CaptureState::Connected);
    assert_eq!(backend.open_attempts(), 4);
    assert_eq!(stream.stats().open_failures.load(Ordering::Relaxed), 3);

    stream.stop();
    assert_eq!(stream.state(), CaptureState::Stopped);
    assert_eq!(backend.open_sessions(), 0);
}

#[test]
fn stop_keeps_last_frame_and_ignores_later_frames() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.use_injected_frames(Duration::from_millis(20));
    let stream = handle(backend.clone(), options(5, 1000));
    stream.start().unwrap();

    backend.push_frame(solid_frame(4, 2, 7, 1));
    assert!(wait_for(|| stream.latest_frame(SnapshotMode::Shared).is_some(), Duration::from_secs(5)));

    stream.stop();
    assert!(!stream.is_running());
    let version = stream.buffer().version();

    for seq in 2..6 {
        backend.push_frame(solid_frame(4, 2, 9, seq));
    }
    std::thread::sleep(Duration::from_millis(100));

    let last = stream.latest_frame(SnapshotMode::Copy).unwrap();
    assert!(last.data.iter().all(|&b| b == 7));
    assert_eq!(stream.buffer().version(), version);
    assert_eq!(backend.open_sessions(), 0);
}

#[test]
fn stop_and_start_are_idempotent() {
    let backend = Arc::new(ScriptedBackend::new());
    let stream = handle(backend.clone(), options(5, 1000));

    stream.stop();
    stream.start().unwrap();
    stream.start().unwrap();
    assert!(wait_for(|| stream.buffer().version() > 0, Duration::from_secs(5)));
    assert_eq!(backend.max_concurrent_sessions(), 1);

    stream.stop();
    stream.stop();
    assert_eq!(stream.state(), CaptureState::Stopped);

    // A restart resumes publishing into the same buffer.
    let before = stream.buffer().version();
    stream.start().unwrap();
    assert!(wait_for(|| stream.buffer().version() > before, Duration::from_secs(5)));
    stream.stop();
    assert_eq!(backend.open_sessions(), 0);
    assert_eq!(backend.max_concurrent_sessions(), 1);
}

#[test]
fn hung_read_is_released_after_shutdown_timeout() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.hang_reads();
    let stream = handle(backend.clone(), options(5, 100));
    stream.start().unwrap();
    assert!(wait_for(|| backend.open_sessions() == 1, Duration::from_secs(5)));

    let start = Instant::now();
    stream.stop();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(backend.releases(), 1);
    assert_eq!(stream.state(), CaptureState::Stopped);
    // The loop noticed the release and closed its session before stop returned.
    assert_eq!(backend.open_sessions(), 0);
}

#[test]
fn start_refuses_while_a_stalled_loop_holds_its_session() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.stall_reads();
    let stream = handle(backend.clone(), options(5, 50));
    stream.start().unwrap();
    assert!(wait_for(|| backend.open_sessions() == 1, Duration::from_secs(5)));

    stream.stop();
    assert_eq!(backend.releases(), 1);
    assert_eq!(stream.state(), CaptureState::Stopped);
    assert_eq!(backend.open_sessions(), 1);

    let err = stream.start().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    assert!(!stream.is_running());
    assert_eq!(backend.open_attempts(), 1);
    assert_eq!(backend.max_concurrent_sessions(), 1);

    backend.resume_reads();
    assert!(wait_for(|| backend.open_sessions() == 0, Duration::from_secs(5)));
    assert!(wait_for(|| stream.start().is_ok(), Duration::from_secs(5)));
    assert!(wait_for(|| stream.buffer().version() > 0, Duration::from_secs(5)));
    assert_eq!(backend.max_concurrent_sessions(), 1);

    stream.stop();
    assert_eq!(backend.open_sessions(), 0);
}

#[test]
fn drop_signals_the_loop_without_waiting() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.stall_reads();
    let stream = handle(backend.clone(), options(5, 2000));
    stream.start().unwrap();
    assert!(wait_for(|| backend.open_sessions() == 1, Duration::from_secs(5)));

    let start = Instant::now();
    drop(stream);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(backend.open_sessions(), 1);

    backend.resume_reads();
    assert!(wait_for(|| backend.open_sessions() == 0, Duration::from_secs(5)));
    assert_eq!(backend.open_attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_sequence_ends_when_stopped() {
    let backend = Arc::new(ScriptedBackend::new());
    let stream = Arc::new(handle(backend, options(5, 1000)));
    stream.start().unwrap();

    let mut frames = Box::pin(stream.frame_sequence());
    let first = tokio::time::timeout(Duration::from_secs(5), frames.next()).await.unwrap().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), frames.next()).await.unwrap().unwrap();
    assert!(second.meta.sequence > first.meta.sequence);

    let stopper = stream.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await.unwrap();

    let end = tokio::time::timeout(Duration::from_secs(5), frames.next()).await.unwrap();
    assert!(end.is_none());
}

async fn time_parts(stream: &StreamHandle, hint: Option<f64>, count: usize) -> Duration {
    let mut parts = Box::pin(stream.encoded_sequence(hint));
    let first = tokio::time::timeout(Duration::from_secs(5), parts.next()).await.unwrap().unwrap();
    assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    assert!(first.ends_with(b"\r\n"));

    let start = Instant::now();
    for _ in 1..count {
        tokio::time::timeout(Duration::from_secs(5), parts.next()).await.unwrap().unwrap();
    }
    start.elapsed()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encoded_sequence_is_paced_by_hint() {
    let backend = Arc::new(ScriptedBackend::new());
    let stream = Arc::new(handle(backend, options(5, 1000)));
    stream.start().unwrap();

    // Six parts at 30 fps: five intervals of ~33 ms after the first.
    let paced = time_parts(&stream, Some(30.0), 6).await;
    let unpaced = time_parts(&stream, None, 6).await;

    assert!(paced >= Duration::from_millis(160), "paced took {paced:?}");
    assert!(unpaced < paced, "unpaced {unpaced:?} vs paced {paced:?}");

    let stopper = stream.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unencodable_frame_is_skipped() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.use_injected_frames(Duration::from_millis(20));
    let stream = Arc::new(handle(backend.clone(), options(5, 1000)));
    stream.start().unwrap();

    let reader = stream.clone();
    let next = tokio::spawn(async move {
        let mut parts = Box::pin(reader.encoded_sequence(None));
        parts.next().await
    });

    // Claims 16x8 RGB but carries ten bytes.
    backend.push_frame(Frame::new(vec![0u8; 10], 16, 8, PixelFormat::Rgb24, 1));
    let failed = {
        let stream = stream.clone();
        tokio::task::spawn_blocking(move || {
            wait_for(|| stream.stats().encode_failures.load(Ordering::Relaxed) == 1, Duration::from_secs(5))
        })
        .await
        .unwrap()
    };
    assert!(failed);
    assert!(!next.is_finished());

    backend.push_frame(solid_frame(4, 2, 5, 2));
    let part = tokio::time::timeout(Duration::from_secs(5), next).await.unwrap().unwrap().unwrap();
    assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    assert_eq!(stream.stats().encode_failures.load(Ordering::Relaxed), 1);

    let stopper = stream.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await.unwrap();
}

#[test]
fn every_successful_open_counts_as_a_connect() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail_read_after(1);
    let stream = handle(backend.clone(), options(5, 1000));
    stream.start().unwrap();

    assert!(wait_for(|| stream.stats().connects.load(Ordering::Relaxed) >= 2, Duration::from_secs(5)));
    stream.stop();
    let connects = stream.stats().connects.load(Ordering::Relaxed);
    assert_eq!(u64::from(backend.open_attempts()), connects);
}
