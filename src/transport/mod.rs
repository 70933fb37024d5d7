pub mod http;

pub use http::{ReqwestTransport, TransportConfig};

use crate::error::Result;
use crate::event::EventSink;
use crate::state::ByteRange;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Identifies one request issued by a session. Events carrying an id the
/// session no longer waits for are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Body received so far by one GET, shared between the transport that fills
/// it and the session that drains it.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer(Arc<RwLock<Vec<u8>>>);

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(RwLock::new(Vec::with_capacity(capacity))))
    }

    pub fn extend(&self, bytes: &[u8]) {
        let mut data = self.0.write().unwrap_or_else(|e| e.into_inner());
        data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl From<Vec<u8>> for ResponseBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::new(RwLock::new(bytes)))
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// `false` when the connection failed or the body was cut off.
    pub connected: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl Completion {
    pub fn ok(status_code: u16) -> Self {
        Self {
            connected: true,
            status_code: Some(status_code),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            connected: false,
            status_code,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.connected && self.status_code.is_some_and(is_success_status)
    }
}

pub(crate) fn is_success_status(code: u16) -> bool {
    (200..300).contains(&code)
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Response headers arrived.
    Headers {
        request: RequestId,
        status_code: u16,
        content_length: Option<u64>,
    },
    /// More body bytes are available in `buffer`.
    Progress {
        request: RequestId,
        buffer: ResponseBuffer,
    },
    Complete {
        request: RequestId,
        completion: Completion,
    },
}

impl TransportEvent {
    pub fn request(&self) -> RequestId {
        match self {
            TransportEvent::Headers { request, .. }
            | TransportEvent::Progress { request, .. }
            | TransportEvent::Complete { request, .. } => *request,
        }
    }
}

/// HTTP collaborator.
///
/// `head` and `get` only start the request; everything else arrives on
/// `sink` as [`TransportEvent`]s tagged with `request`. After `cancel` the
/// transport may still deliver events for that id, the session ignores them.
pub trait Transport {
    fn head(&mut self, request: RequestId, url: &str, sink: EventSink) -> Result<()>;
    fn get(&mut self, request: RequestId, url: &str, range: ByteRange, sink: EventSink) -> Result<()>;
    fn cancel(&mut self, request: RequestId);
}
