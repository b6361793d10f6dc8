//! Owned native capture session

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};
use wirecap_core::{Error, LinkLayerType, Result};

use crate::config::CaptureConfig;
use crate::engine::{Breaker, CaptureEngine, EngineResult, Session};

const RESOURCE: &str = "CaptureHandle";

/// A single native capture session.
///
/// Clones share the same session. The session is released exactly once, either by an explicit
/// [`release`](CaptureHandle::release) on any clone or when the last clone is dropped; after
/// that every clone reports itself invalid and rejects operations with [`Error::Disposed`].
pub struct CaptureHandle<S: Session> {
    inner: Arc<HandleInner<S>>,
}

struct HandleInner<S: Session> {
    session: Mutex<Option<S>>,
    released: AtomicBool,
    breaker: Arc<dyn Breaker>,
    link_type: LinkLayerType,
    read_timeout: Duration,
    source: String,
}

impl<S: Session> Clone for CaptureHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> CaptureHandle<S> {
    /// Open a live device
    pub fn open_live<E>(engine: &E, device: &str, config: &CaptureConfig) -> Result<Self>
    where
        E: CaptureEngine<Session = S>,
    {
        let session = engine.open_live(device, config)?;
        info!(
            device,
            snaplen = config.snaplen,
            timeout_ms = config.timeout_ms,
            promiscuous = config.promiscuous,
            "Opened live capture session"
        );
        Ok(Self::from_session(
            session,
            device.to_string(),
            config.read_timeout(),
        ))
    }

    /// Open a capture file for playback
    pub fn open_offline<E>(engine: &E, path: &Path) -> Result<Self>
    where
        E: CaptureEngine<Session = S>,
    {
        let session = engine.open_offline(path)?;
        info!(path = %path.display(), "Opened offline capture session");
        Ok(Self::from_session(
            session,
            path.display().to_string(),
            CaptureConfig::default().read_timeout(),
        ))
    }

    /// Take ownership of an already-open engine session
    pub fn from_session(mut session: S, source: String, read_timeout: Duration) -> Self {
        let breaker = session.breaker();
        let link_type = LinkLayerType::from_raw(session.datalink());
        Self {
            inner: Arc::new(HandleInner {
                session: Mutex::new(Some(session)),
                released: AtomicBool::new(false),
                breaker,
                link_type,
                read_timeout,
                source,
            }),
        }
    }

    /// Whether the session is still open
    pub fn is_valid(&self) -> bool {
        !self.inner.released.load(Ordering::Acquire)
    }

    /// Most recent error text of the session; empty once released
    pub fn last_error(&self) -> String {
        match self.inner.session.lock().as_ref() {
            Some(session) => session.last_error(),
            None => String::new(),
        }
    }

    /// Interrupt an in-progress blocking read. Does not take the session lock.
    pub fn break_loop(&self) {
        if self.is_valid() {
            self.inner.breaker.break_loop();
        }
    }

    /// Run one engine call against the session, holding its lock for the duration
    pub fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> EngineResult<T>,
    {
        let mut guard = self.inner.session.lock();
        let session = guard.as_mut().ok_or(Error::Disposed(RESOURCE))?;
        Ok(f(session)?)
    }

    /// Data-link type reported when the session was opened
    pub fn link_type(&self) -> LinkLayerType {
        self.inner.link_type
    }

    /// Bounded wait of one native read
    pub fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    /// Device name or file path the session was opened on
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Release the session. Idempotent and infallible; invalidates every clone.
    pub fn release(&self) {
        self.inner.release();
    }
}

impl<S: Session> HandleInner<S> {
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut session) = self.session.lock().take() {
            session.close();
            debug!(source = %self.source, "Released capture session");
        }
    }
}

impl<S: Session> Drop for HandleInner<S> {
    fn drop(&mut self) {
        self.release();
    }
}
