use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use reqwest::{header, Client, Response};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Completion, RequestId, ResponseBuffer, Transport, TransportEvent};
use crate::error::{Error, Result};
use crate::event::EventSink;
use crate::state::ByteRange;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upper bound on the body buffer reserved before any bytes arrive.
const MAX_RESERVE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Global limit in bytes per second.
    pub rate_limit: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("slicedl/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            rate_limit: None,
        }
    }
}

struct Tracked {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// [`Transport`] backed by reqwest. Every request runs as its own tokio task.
pub struct ReqwestTransport {
    client: Client,
    rate_limiter: Option<Arc<Limiter>>,
    requests: HashMap<RequestId, Tracked>,
}

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .build()?;

        let rate_limiter = config
            .rate_limit
            .and_then(NonZeroU32::new)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));

        Ok(Self {
            client,
            rate_limiter,
            requests: HashMap::new(),
        })
    }

    fn spawn<F>(&mut self, request: RequestId, work: impl FnOnce(CancellationToken) -> F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        self.requests.retain(|_, tracked| !tracked.task.is_finished());

        let token = CancellationToken::new();
        let task = runtime.spawn(work(token.clone()));
        self.requests.insert(request, Tracked { token, task });
        Ok(())
    }
}

impl Transport for ReqwestTransport {
    fn head(&mut self, request: RequestId, url: &str, sink: EventSink) -> Result<()> {
        let builder = self.client.head(url);
        self.spawn(request, move |token| async move {
            let sent = tokio::select! {
                _ = token.cancelled() => return,
                sent = builder.send() => sent,
            };
            match sent {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    post(&sink, headers_event(request, &response));
                    post(&sink, TransportEvent::Complete { request, completion: Completion::ok(status_code) });
                }
                Err(e) => {
                    post(&sink, TransportEvent::Complete { request, completion: Completion::failed(e.to_string(), None) });
                }
            }
        })
    }

    fn get(&mut self, request: RequestId, url: &str, range: ByteRange, sink: EventSink) -> Result<()> {
        let builder = self.client.get(url).header(header::RANGE, range.header_value());
        let rate_limiter = self.rate_limiter.clone();
        self.spawn(request, move |token| async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Request {} canceled", request),
                _ = stream_range(request, builder, range, rate_limiter, sink) => {}
            }
        })
    }

    fn cancel(&mut self, request: RequestId) {
        if let Some(tracked) = self.requests.remove(&request) {
            tracked.token.cancel();
        }
    }
}

impl Drop for ReqwestTransport {
    fn drop(&mut self) {
        for tracked in self.requests.values() {
            tracked.token.cancel();
        }
    }
}

async fn stream_range(
    request: RequestId,
    builder: reqwest::RequestBuilder,
    range: ByteRange,
    rate_limiter: Option<Arc<Limiter>>,
    sink: EventSink,
) {
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            post(&sink, TransportEvent::Complete { request, completion: Completion::failed(e.to_string(), None) });
            return;
        }
    };

    let status_code = response.status().as_u16();
    post(&sink, headers_event(request, &response));

    // the range size is whatever the server declared, so never reserve it whole
    let reserve = range.byte_count().min(MAX_RESERVE) as usize;
    let buffer = ResponseBuffer::with_capacity(reserve);
    let mut stream = response.bytes_stream();

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                post(&sink, TransportEvent::Complete {
                    request,
                    completion: Completion::failed(format!("Error while downloading chunk: {e}"), Some(status_code)),
                });
                return;
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if let Some(limiter) = &rate_limiter {
            throttle(limiter, chunk.len()).await;
        }
        buffer.extend(&chunk);
        post(&sink, TransportEvent::Progress { request, buffer: buffer.clone() });
    }

    post(&sink, TransportEvent::Complete { request, completion: Completion::ok(status_code) });
}

/// Waits for `len` bytes worth of quota, split into burst-sized pieces.
async fn throttle(limiter: &Limiter, len: usize) {
    let mut remaining = len as u64;
    while remaining > 0 {
        let want = remaining.min(u32::MAX as u64) as u32;
        let Some(mut n) = NonZeroU32::new(want) else { break };
        loop {
            match limiter.until_n_ready(n).await {
                Ok(()) => break,
                Err(e) => {
                    let capacity = e.0;
                    if capacity == 0 {
                        warn!("Rate limiter has no capacity, skipping throttle");
                        return;
                    }
                    n = NonZeroU32::new(capacity.min(n.get())).unwrap_or(NonZeroU32::MIN);
                }
            }
        }
        remaining -= n.get() as u64;
    }
}

fn headers_event(request: RequestId, response: &Response) -> TransportEvent {
    // HEAD bodies are empty, so read the declared length from the header itself
    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    TransportEvent::Headers {
        request,
        status_code: response.status().as_u16(),
        content_length,
    }
}

fn post(sink: &EventSink, event: TransportEvent) {
    if sink.send(event.into()).is_err() {
        debug!("Session inbox closed, dropping transport event");
    }
}
