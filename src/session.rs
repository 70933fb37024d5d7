use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::event::{Notification, SessionEvent, SessionId};
use crate::hashing::HashAlgorithm;
use crate::ledger::TransferLedger;
use crate::machine::TransferMachine;
use crate::scheduler::{Scheduler, TokioTicker};
use crate::state::{DownloadDescriptor, SliceContext, Status, DEFAULT_SLICE_SIZE};
use crate::store::{FileStore, LocalFileStore};
use crate::transport::{ReqwestTransport, Transport, TransportConfig};
use crate::utils::{get_filename_from_url, sanitize_filename};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where downloads land when a request names no save path.
    pub download_dir: PathBuf,
    /// Used when slicing is requested with a zero slice size.
    pub default_slice_size: u64,
    pub hash: HashAlgorithm,
    /// Tick period of the scheduler created by [`DownloadSession::http`].
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            default_slice_size: DEFAULT_SLICE_SIZE,
            hash: HashAlgorithm::default(),
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// Arguments of [`DownloadSession::request_download`].
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub save_path: Option<PathBuf>,
    /// `Some(size)` enables slicing; zero picks the configured default.
    pub slice_size: Option<u64>,
    /// Tear down an active transfer instead of rejecting the request.
    pub force: bool,
    /// `false` stops after the probe.
    pub auto_download: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            save_path: None,
            slice_size: None,
            force: false,
            auto_download: true,
        }
    }

    pub fn save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    pub fn sliced(mut self, slice_size: u64) -> Self {
        self.slice_size = Some(slice_size);
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn probe_only(mut self) -> Self {
        self.auto_download = false;
        self
    }
}

/// One resumable download.
///
/// Operations return immediately; the transport and the scheduler report
/// back through the session inbox, which the host drains with
/// [`dispatch`](Self::dispatch), [`pump`](Self::pump),
/// [`next_event`](Self::next_event) or [`run`](Self::run).
pub struct DownloadSession {
    id: SessionId,
    config: SessionConfig,
    machine: TransferMachine,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
}

impl DownloadSession {
    pub fn new(
        config: SessionConfig,
        transport: impl Transport + 'static,
        store: impl FileStore + 'static,
        scheduler: impl Scheduler + 'static,
    ) -> Self {
        let id = SessionId::new();
        let (sink, inbox) = mpsc::unbounded_channel();
        let machine = TransferMachine::new(
            id,
            Box::new(transport),
            Box::new(store),
            Box::new(scheduler),
            sink,
            config.hash,
        );
        Self {
            id,
            config,
            machine,
            inbox,
        }
    }

    /// Session over reqwest, the local filesystem and a tokio ticker.
    pub fn http(config: SessionConfig, transport: TransportConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(transport)?;
        let ticker = TokioTicker::new(config.tick_interval);
        Ok(Self::new(config, transport, LocalFileStore, ticker))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receives completed/paused/resumed/canceled notifications until the next
    /// [`reset`](Self::reset).
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.machine.subscribe()
    }

    /// Probes `request.url` and, unless probe-only, downloads it.
    ///
    /// Rejected (returns `false`) while a transfer is active unless
    /// `request.force` is set.
    pub fn request_download(&mut self, request: DownloadRequest) -> bool {
        info!(
            "Download requested: {} save_path={:?} slice={:?} force={}",
            request.url, request.save_path, request.slice_size, request.force
        );
        if !request.force && (self.machine.status() == Status::Downloading || self.machine.is_busy()) {
            warn!("A download is active, cancel it or force the request");
            return false;
        }

        let name = match get_filename_from_url(&request.url) {
            Ok(name) => sanitize_filename(&name),
            Err(e) => {
                error!("{}", Error::ProbeFailed(e.to_string()));
                return false;
            }
        };
        let save_path = match request.save_path {
            Some(path) => path,
            None => {
                let path = self.config.download_dir.join(&name);
                warn!("No save path given, using {}", path.display());
                path
            }
        };
        let slice = match request.slice_size {
            Some(0) => SliceContext::sliced(self.config.default_slice_size),
            Some(size) => SliceContext::sliced(size),
            None => SliceContext::disabled(),
        };

        let descriptor = DownloadDescriptor::new(request.url, name, save_path);
        self.machine.start(descriptor, slice, request.auto_download)
    }

    pub fn pause(&mut self) {
        self.machine.pause();
    }

    /// Only succeeds from [`Status::Paused`].
    pub fn resume(&mut self) -> bool {
        self.machine.resume()
    }

    pub fn cancel(&mut self) {
        self.machine.cancel();
    }

    pub fn reset(&mut self) {
        self.machine.reset();
        while self.inbox.try_recv().is_ok() {}
    }

    /// Restarts the transfer from the descriptor the caller asked for. Only
    /// accepted while downloading.
    pub fn redownload(&mut self) -> bool {
        self.machine.redownload()
    }

    pub fn status(&self) -> Status {
        self.machine.status()
    }

    pub fn ledger(&self) -> TransferLedger {
        *self.machine.ledger()
    }

    pub fn slice(&self) -> SliceContext {
        self.machine.slice()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.machine.ledger().total_committed()
    }

    pub fn total_size(&self) -> Option<u64> {
        self.machine.working().and_then(|w| w.size)
    }

    /// Committed fraction of the object; zero unless downloading or paused.
    pub fn progress(&self) -> f64 {
        match (self.status(), self.total_size()) {
            (Status::Downloading | Status::Paused, Some(size)) if size > 0 => {
                self.downloaded_bytes() as f64 / size as f64
            }
            _ => 0.0,
        }
    }

    /// Bytes committed by the latest progress signal.
    pub fn speed(&self) -> u64 {
        self.machine.ledger().instantaneous_rate()
    }

    /// `speed() / 1024` scaled by the inverse of the last tick interval.
    ///
    /// This multiplies a per-signal byte count by a tick rate, so it is not a
    /// true throughput figure.
    pub fn speed_kbs(&self) -> f64 {
        let delta = self.machine.last_delta().as_secs_f64();
        if self.status() != Status::Downloading || delta <= 0.0 {
            return 0.0;
        }
        (self.speed() as f64 / 1024.0) * (1.0 / delta)
    }

    /// Compares `expected` (case-insensitive hex) with the digest of a
    /// succeeded download whose file is still on disk.
    pub fn hash_check(&self, expected: &str) -> bool {
        self.machine.hash_check(expected)
    }

    /// Working descriptor once succeeded, the requested one otherwise.
    pub fn downloaded_file_info(&self) -> Option<&DownloadDescriptor> {
        if self.status() == Status::Succeeded {
            self.machine.working()
        } else {
            self.machine.requested()
        }
    }

    /// `true` while a probe or range request is in flight.
    pub fn is_busy(&self) -> bool {
        self.machine.is_busy()
    }

    pub fn dispatch(&mut self, event: SessionEvent) {
        self.machine.handle(event);
    }

    /// Handles everything already queued without waiting. Returns the count.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.machine.handle(event);
            handled += 1;
        }
        handled
    }

    /// Waits for and handles one event.
    pub async fn next_event(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(event) => {
                self.machine.handle(event);
                true
            }
            None => false,
        }
    }

    /// Handles events until nothing is in flight: finished, failed, canceled
    /// or paused.
    pub async fn run(&mut self) -> Status {
        while self.is_busy() {
            if !self.next_event().await {
                break;
            }
        }
        self.status()
    }
}
