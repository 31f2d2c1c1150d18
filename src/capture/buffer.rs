//! Single-slot, latest-committed-wins frame cell

use std::sync::Arc;

use tokio::sync::watch;

use crate::capture::Frame;

/// How [`FrameBuffer::snapshot`] hands out the stored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// Deep copy: the result shares no storage with the buffer.
    #[default]
    Copy,
    /// Reference-counted view of the committed pixels. Committed buffers are
    /// never written again, so this is safe, just not independent.
    Shared,
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Frame>,
    version: u64,
    /// Bumped by every `open`; writers from an older generation are rejected.
    generation: u64,
    /// Cleared by `seal`; publishes are rejected while false.
    live: bool,
}

/// Holds the most recently published frame.
///
/// The capture loop is the only writer. The slot lock is taken only to swap
/// or clone the `Frame` handle, never across decode or I/O, so neither side
/// can block the other for longer than a pointer swap.
#[derive(Clone)]
pub struct FrameBuffer {
    slot: Arc<watch::Sender<Slot>>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::default());
        Self { slot: Arc::new(tx) }
    }

    /// Replace the current frame. Returns `false` if the buffer is sealed.
    pub fn publish(&self, frame: Frame) -> bool {
        self.slot.send_if_modified(|slot| {
            if !slot.live {
                return false;
            }
            slot.frame = Some(frame);
            slot.version += 1;
            true
        })
    }

    /// Publish on behalf of the writer that opened `generation`.
    pub(crate) fn publish_as(&self, generation: u64, frame: Frame) -> bool {
        self.slot.send_if_modified(|slot| {
            if !slot.live || slot.generation != generation {
                return false;
            }
            slot.frame = Some(frame);
            slot.version += 1;
            true
        })
    }

    /// Most recently published frame, or `None` before the first publish.
    pub fn snapshot(&self, mode: SnapshotMode) -> Option<Frame> {
        let frame = self.slot.borrow().frame.clone()?;
        Some(match mode {
            SnapshotMode::Copy => frame.deep_copy(),
            SnapshotMode::Shared => frame,
        })
    }

    /// Number of publishes so far.
    pub fn version(&self) -> u64 {
        self.slot.borrow().version
    }

    pub fn is_live(&self) -> bool {
        self.slot.borrow().live
    }

    /// Accept publishes again, from a new writer generation.
    pub(crate) fn open(&self) -> u64 {
        let mut generation = 0;
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            slot.live = true;
            generation = slot.generation;
        });
        generation
    }

    /// Reject further publishes and wake every reader. The stored frame stays.
    pub(crate) fn seal(&self) {
        self.slot.send_if_modified(|slot| std::mem::replace(&mut slot.live, false));
    }

    /// Reader that is woken on every publish and on seal.
    pub fn watch(&self) -> FrameWatch {
        FrameWatch {
            rx: self.slot.subscribe(),
            seen: 0,
        }
    }
}

/// Change-notified reader over a [`FrameBuffer`].
pub struct FrameWatch {
    rx: watch::Receiver<Slot>,
    seen: u64,
}

impl FrameWatch {
    /// Wait for a frame newer than the last one returned.
    ///
    /// Returns `None` once the buffer is sealed. Frames published in between
    /// two calls are skipped; only the latest is returned.
    pub async fn next_fresh(&mut self) -> Option<Frame> {
        loop {
            {
                let slot = self.rx.borrow_and_update();
                if !slot.live {
                    return None;
                }
                if slot.version > self.seen {
                    if let Some(frame) = &slot.frame {
                        self.seen = slot.version;
                        return Some(frame.clone());
                    }
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}
