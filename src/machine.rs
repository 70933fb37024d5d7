use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::event::{EventSink, Notification, SessionEvent, SessionId};
use crate::hashing::{HashAlgorithm, StreamingHasher};
use crate::ledger::TransferLedger;
use crate::planner::plan_range;
use crate::scheduler::{Scheduler, TickHandle};
use crate::state::{ByteRange, DownloadDescriptor, SliceContext, Status};
use crate::store::FileStore;
use crate::transport::{is_success_status, Completion, RequestId, ResponseBuffer, Transport, TransportEvent};

const NOTIFY_CAPACITY: usize = 64;

enum InFlight {
    Probe {
        request: RequestId,
        auto_download: bool,
    },
    Range {
        request: RequestId,
        range: ByteRange,
        buffer: Option<ResponseBuffer>,
    },
}

impl InFlight {
    fn request(&self) -> RequestId {
        match self {
            InFlight::Probe { request, .. } | InFlight::Range { request, .. } => *request,
        }
    }
}

/// Owns the status, the ledger and the hasher and is the only code that
/// mutates them. Transport and scheduler callbacks reach it as
/// [`SessionEvent`]s; at most one request is in flight and events tagged with
/// any other request id are dropped.
pub(crate) struct TransferMachine {
    session: SessionId,
    transport: Box<dyn Transport>,
    store: Box<dyn FileStore>,
    scheduler: Box<dyn Scheduler>,
    sink: EventSink,
    notifier: broadcast::Sender<Notification>,
    status: Status,
    /// Caller intent, reused by redownload.
    requested: Option<DownloadDescriptor>,
    working: Option<DownloadDescriptor>,
    ledger: TransferLedger,
    slice: SliceContext,
    hasher: StreamingHasher,
    in_flight: Option<InFlight>,
    ticker: Option<TickHandle>,
    last_delta: Duration,
    next_request: u64,
}

impl TransferMachine {
    pub(crate) fn new(
        session: SessionId,
        transport: Box<dyn Transport>,
        store: Box<dyn FileStore>,
        scheduler: Box<dyn Scheduler>,
        sink: EventSink,
        algorithm: HashAlgorithm,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            session,
            transport,
            store,
            scheduler,
            sink,
            notifier,
            status: Status::NotStarted,
            requested: None,
            working: None,
            ledger: TransferLedger::new(),
            slice: SliceContext::disabled(),
            hasher: StreamingHasher::new(algorithm),
            in_flight: None,
            ticker: None,
            last_delta: Duration::ZERO,
            next_request: 0,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub(crate) fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    pub(crate) fn slice(&self) -> SliceContext {
        self.slice
    }

    pub(crate) fn requested(&self) -> Option<&DownloadDescriptor> {
        self.requested.as_ref()
    }

    pub(crate) fn working(&self) -> Option<&DownloadDescriptor> {
        self.working.as_ref()
    }

    pub(crate) fn last_delta(&self) -> Duration {
        self.last_delta
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn size(&self) -> Option<u64> {
        self.working.as_ref().and_then(|w| w.size)
    }

    /// Starts a fresh run for `descriptor`. Anything still active is canceled
    /// first; subscribers are kept.
    pub(crate) fn start(&mut self, descriptor: DownloadDescriptor, slice: SliceContext, auto_download: bool) -> bool {
        if self.in_flight.is_some() || matches!(self.status, Status::Downloading | Status::Paused) {
            self.cancel();
        }
        self.clear();
        self.slice = slice;
        self.probe(descriptor, auto_download)
    }

    pub(crate) fn pause(&mut self) {
        let request = match &self.in_flight {
            Some(InFlight::Range { request, .. }) if self.status == Status::Downloading => *request,
            _ => {
                warn!("Pause ignored, download is {}", self.status);
                return;
            }
        };

        self.transport.cancel(request);
        self.in_flight = None;
        self.status = Status::Paused;
        self.ledger.pause();
        self.ensure_ticking();
        warn!("Download paused, {} bytes committed", self.ledger.total_committed());
        self.notify(Notification::Paused { session: self.session });
    }

    pub(crate) fn resume(&mut self) -> bool {
        if self.status != Status::Paused {
            error!("Resume rejected, download is {} rather than paused", self.status);
            return false;
        }

        // a pause can land right after the last byte was committed
        if self.size().is_some_and(|size| self.ledger.total_committed() >= size) {
            self.notify(Notification::Resumed { session: self.session });
            self.succeed();
            return true;
        }

        match self.issue_next_range() {
            Ok(range) => {
                info!("Resumed at {}", range);
                self.notify(Notification::Resumed { session: self.session });
                true
            }
            Err(e) => {
                error!("Resume failed: {}", e);
                false
            }
        }
    }

    pub(crate) fn cancel(&mut self) {
        if self.status == Status::Canceled {
            return;
        }
        let active = self.in_flight.is_some() || self.ticker.is_some() || self.working.is_some();
        self.teardown();
        if !active {
            return;
        }

        self.status = Status::Canceled;
        self.ledger.halt();
        warn!("Download canceled, {} bytes committed", self.ledger.total_committed());
        self.notify(Notification::Canceled { session: self.session });
    }

    /// Cancels, zeroes everything and closes existing subscriptions.
    pub(crate) fn reset(&mut self) {
        if self.status != Status::Canceled {
            self.cancel();
        }
        self.clear();
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        self.notifier = notifier;
    }

    /// Restarts from the caller's descriptor. Only accepted mid-transfer.
    pub(crate) fn redownload(&mut self) -> bool {
        if self.status != Status::Downloading {
            warn!("Redownload not accepted, download is {}", self.status);
            return false;
        }
        let Some(descriptor) = self.requested.clone() else {
            return false;
        };

        self.teardown();
        self.ledger.reset();
        self.hasher.reset();
        self.slice.slice_index = 0;
        self.status = Status::NotStarted;
        self.last_delta = Duration::ZERO;
        warn!("Redownload accepted for {}", descriptor.url);
        self.probe(descriptor, true)
    }

    pub(crate) fn hash_check(&self, expected: &str) -> bool {
        if self.status != Status::Succeeded {
            warn!("Hash check skipped, download is {}", self.status);
            return false;
        }
        let Some(working) = &self.working else {
            return false;
        };
        if !self.store.exists(&working.save_path) {
            warn!("Hash check failed, {} is missing", working.save_path.display());
            return false;
        }

        let matched = working
            .hash
            .as_deref()
            .is_some_and(|hash| hash.eq_ignore_ascii_case(expected.trim()));
        info!(
            "Expected hash {}, computed {}, match: {}",
            expected,
            working.hash.as_deref().unwrap_or("-"),
            matched
        );
        matched
    }

    pub(crate) fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Tick { handle, delta } => {
                if self.ticker == Some(handle) {
                    self.last_delta = delta;
                }
            }
            SessionEvent::Transport(event) => {
                let request = event.request();
                if self.in_flight.as_ref().map(InFlight::request) != Some(request) {
                    debug!("Ignoring event for stale request {}", request);
                    return;
                }
                match event {
                    TransportEvent::Headers {
                        status_code,
                        content_length,
                        ..
                    } => self.on_headers(status_code, content_length),
                    TransportEvent::Progress { buffer, .. } => self.on_progress(buffer),
                    TransportEvent::Complete { completion, .. } => self.on_complete(completion),
                }
            }
        }
    }

    fn on_headers(&mut self, status_code: u16, content_length: Option<u64>) {
        let range = match &self.in_flight {
            Some(InFlight::Probe { .. }) => {
                if is_success_status(status_code) {
                    if let (Some(working), Some(len)) = (self.working.as_mut(), content_length) {
                        working.size = Some(len);
                    }
                }
                return;
            }
            Some(InFlight::Range { range, .. }) => *range,
            None => return,
        };

        if !is_success_status(status_code) {
            self.fail(Error::TransferFailed(format!("GET {} answered {}", range, status_code)));
        } else if range.begin > 0 && status_code != 206 {
            self.fail(Error::TransferFailed(format!(
                "server ignored the range request for {} ({})",
                range, status_code
            )));
        } else if let Some(len) = content_length {
            if !self.accepts_length(len, range) {
                self.fail(Error::TransferFailed(format!(
                    "GET declared {} bytes for {}, object is {:?} bytes",
                    len,
                    range,
                    self.size()
                )));
            }
        }
    }

    /// The GET body must be the whole object, one slice, the rest of the
    /// current slice or the rest after a resume.
    fn accepts_length(&self, len: u64, range: ByteRange) -> bool {
        let Some(size) = self.size() else {
            return false;
        };
        let mut accepted = len == size
            || len == range.byte_count()
            || len == size.saturating_sub(self.ledger.total_committed());
        if self.slice.enabled {
            let sliced = self.slice.slice_byte_size.saturating_mul(self.slice.slice_index as u64);
            accepted |= len == self.slice.slice_byte_size || len == size.saturating_sub(sliced);
        }
        accepted
    }

    fn on_progress(&mut self, buffer: ResponseBuffer) {
        if self.status != Status::Downloading {
            return;
        }
        if let Some(InFlight::Range { buffer: latest, .. }) = self.in_flight.as_mut() {
            *latest = Some(buffer.clone());
        }
        self.absorb(&buffer);
    }

    fn absorb(&mut self, buffer: &ResponseBuffer) {
        let Some(working) = self.working.as_ref() else {
            return;
        };
        let Some(size) = working.size else {
            return;
        };

        // copy out so the transport can keep filling the buffer during the write
        let tail = {
            let data = buffer.read();
            data[self.ledger.pending(data.len(), size)].to_vec()
        };
        match self
            .ledger
            .commit(&tail, &working.save_path, self.store.as_mut(), &mut self.hasher)
        {
            Ok(0) => {}
            Ok(written) => debug!(
                "Committed {} bytes, {}/{} total, {} at request start",
                written,
                self.ledger.total_committed(),
                size,
                self.ledger.committed_at_request_start()
            ),
            Err(e) => warn!("{}; retrying on the next progress signal", e),
        }
    }

    fn on_complete(&mut self, completion: Completion) {
        match self.in_flight.take() {
            Some(InFlight::Probe { auto_download, .. }) => self.on_probe_complete(completion, auto_download),
            Some(InFlight::Range { range, buffer, .. }) => self.on_range_complete(completion, range, buffer),
            None => {}
        }
    }

    fn on_probe_complete(&mut self, completion: Completion, auto_download: bool) {
        let size = self.size();
        let url = self.working.as_ref().map(|w| w.url.clone()).unwrap_or_default();

        if !completion.is_success() || size.is_none() {
            let reason = match (&completion.error, completion.status_code) {
                (Some(e), _) => e.clone(),
                (None, Some(code)) if !is_success_status(code) => format!("HEAD {} answered {}", url, code),
                _ => format!("HEAD {} declared no Content-Length", url),
            };
            error!("{}", Error::ProbeFailed(reason));
            self.stop_ticking();
            self.notify(Notification::Completed { session: self.session, success: false });
            return;
        }

        info!("Probed {}: {} bytes", url, size.unwrap_or_default());
        if !auto_download {
            self.stop_ticking();
            return;
        }

        if let Some(path) = self.working.as_ref().map(|w| w.save_path.clone()) {
            if self.store.exists(&path) {
                if let Err(e) = self.store.remove(&path) {
                    error!("Failed to delete existing file {}: {}", path.display(), e);
                    self.stop_ticking();
                    self.notify(Notification::Completed { session: self.session, success: false });
                    return;
                }
                warn!("Deleted existing file {}", path.display());
            }
        }

        self.hasher.reset();
        if let Err(e) = self.issue_next_range() {
            error!("Download not started: {}", e);
            self.stop_ticking();
            self.notify(Notification::Completed { session: self.session, success: false });
        }
    }

    fn on_range_complete(&mut self, completion: Completion, range: ByteRange, buffer: Option<ResponseBuffer>) {
        if self.status != Status::Downloading {
            warn!("Completion for {} ignored, download is {}", range, self.status);
            return;
        }

        // last chance for a tail whose write failed on the final progress signal
        if completion.connected {
            if let Some(buffer) = buffer {
                self.absorb(&buffer);
            }
        }

        if !completion.is_success() {
            let reason = match (&completion.error, completion.status_code) {
                (Some(e), _) => format!("GET {}: {}", range, e),
                (None, Some(code)) => format!("GET {} answered {}", range, code),
                (None, None) => format!("GET {} ended without a status", range),
            };
            self.fail(Error::TransferFailed(reason));
            return;
        }

        let size = self.size().unwrap_or_default();
        let total = self.ledger.total_committed();
        if total >= size {
            self.succeed();
            return;
        }

        if !self.slice.enabled {
            self.fail(Error::TransferFailed(format!(
                "GET {} finished with {} of {} bytes committed",
                range, total, size
            )));
            return;
        }
        if self.ledger.committed_this_request() == 0 {
            self.fail(Error::TransferFailed(format!("slice {} committed no bytes", range)));
            return;
        }

        self.slice.slice_index += 1;
        match self.issue_next_range() {
            Ok(next) => info!("Slice {} requested: {}", self.slice.slice_index, next),
            Err(e) => self.fail(e),
        }
    }

    fn issue_next_range(&mut self) -> Result<ByteRange> {
        let (url, size) = match self.working.as_ref() {
            Some(working) => (working.url.clone(), working.size),
            None => return Err(Error::ProbeFailed("no download requested".to_string())),
        };
        let size = size.ok_or_else(|| Error::ProbeFailed(format!("size of {} unknown", url)))?;
        let range = plan_range(size, self.ledger.total_committed(), &self.slice)?;

        let request = self.next_request_id();
        self.transport.get(request, &url, range, self.sink.clone())?;

        self.ledger.begin_request();
        self.in_flight = Some(InFlight::Range {
            request,
            range,
            buffer: None,
        });
        self.status = Status::Downloading;
        self.ensure_ticking();
        info!("Requesting {} of {} ({})", range.header_value(), url, request);
        Ok(range)
    }

    fn probe(&mut self, descriptor: DownloadDescriptor, auto_download: bool) -> bool {
        let request = self.next_request_id();
        let url = descriptor.url.clone();
        self.requested = Some(descriptor.clone());
        self.working = Some(descriptor);

        match self.transport.head(request, &url, self.sink.clone()) {
            Ok(()) => {
                info!("Requesting head of {} ({})", url, request);
                self.in_flight = Some(InFlight::Probe { request, auto_download });
                self.ensure_ticking();
                true
            }
            Err(e) => {
                error!("{}", Error::ProbeFailed(e.to_string()));
                self.notify(Notification::Completed { session: self.session, success: false });
                false
            }
        }
    }

    fn succeed(&mut self) {
        self.stop_ticking();
        let digest = self.hasher.finalize();
        info!("Download succeeded, {:?} {}", self.hasher.algorithm(), digest);
        if let Some(working) = self.working.as_mut() {
            working.hash = Some(digest);
        }
        self.status = Status::Succeeded;
        self.ledger.halt();
        self.notify(Notification::Completed { session: self.session, success: true });
    }

    fn fail(&mut self, err: Error) {
        self.teardown();
        self.status = Status::Failed;
        self.ledger.halt();
        error!("Download failed: {}", err);
        self.notify(Notification::Completed { session: self.session, success: false });
    }

    fn teardown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            self.transport.cancel(in_flight.request());
        }
        self.stop_ticking();
    }

    fn clear(&mut self) {
        self.teardown();
        self.status = Status::NotStarted;
        self.requested = None;
        self.working = None;
        self.ledger.reset();
        self.slice = SliceContext::disabled();
        self.hasher.reset();
        self.last_delta = Duration::ZERO;
    }

    fn ensure_ticking(&mut self) {
        if self.ticker.is_none() {
            self.ticker = Some(self.scheduler.register(self.sink.clone()));
        }
    }

    fn stop_ticking(&mut self) {
        if let Some(handle) = self.ticker.take() {
            self.scheduler.unregister(handle);
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn notify(&self, notification: Notification) {
        // no subscribers is fine
        let _ = self.notifier.send(notification);
    }
}
