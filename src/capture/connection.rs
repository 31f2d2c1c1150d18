//! Decode-session ownership for one stream

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::camera::Transport;
use crate::capture::Frame;
use crate::error::Result;

/// Something that can open decode sessions for a URL.
///
/// Backends are shared between stream handles; sessions are not.
pub trait Backend: Send + Sync {
    fn open(&self, url: &str, transport: Transport) -> Result<Box<dyn Session>>;
}

/// One live decode session.
pub trait Session: Send {
    /// Pull the next decoded frame. Errors cover both end-of-stream and
    /// transient read failures; the caller reconnects in either case.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release every underlying resource. Must tolerate repeated calls.
    fn close(&mut self);

    /// Handle able to tear the session down from another thread, if the
    /// backend supports it.
    fn release_handle(&self) -> Option<ReleaseHandle> {
        None
    }
}

/// Cross-thread teardown for a session blocked in a read.
#[derive(Clone)]
pub struct ReleaseHandle(Arc<dyn Fn() + Send + Sync>);

impl ReleaseHandle {
    pub fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(release))
    }

    pub fn release(&self) {
        (self.0)()
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReleaseHandle")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// Exclusive owner of at most one [`Session`].
///
/// Only the capture loop holds a `Connection`; opening always closes any
/// lingering session first, so two sessions never coexist.
pub struct Connection {
    backend: Arc<dyn Backend>,
    session: Option<Box<dyn Session>>,
}

impl Connection {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn open(&mut self, url: &str, transport: Transport) -> Result<()> {
        self.close();
        let session = self.backend.open(url, transport)?;
        self.session = Some(session);
        Ok(())
    }

    /// Reading from a closed connection is a read failure, never a panic.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match self.session.as_mut() {
            Some(session) => session.read_frame(),
            None => Err(crate::StreamError::read("connection is closed")),
        }
    }

    pub fn release_handle(&self) -> Option<ReleaseHandle> {
        self.session.as_ref().and_then(|s| s.release_handle())
    }

    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing decode session");
            session.close();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn open_replaces_lingering_session() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut conn = Connection::new(backend.clone());

        conn.open("stub://a", Transport::Tcp).unwrap();
        conn.open("stub://a", Transport::Tcp).unwrap();

        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(backend.open_sessions(), 1);
        assert_eq!(backend.max_concurrent_sessions(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut conn = Connection::new(backend.clone());
        conn.close();
        conn.open("stub://a", Transport::Tcp).unwrap();
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(backend.open_sessions(), 0);
    }

    #[test]
    fn failed_open_leaves_connection_closed() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_next_opens(1);
        let mut conn = Connection::new(backend.clone());
        assert!(conn.open("stub://a", Transport::Tcp).is_err());
        assert!(!conn.is_open());
        assert!(conn.read_frame().is_err());
    }
}
