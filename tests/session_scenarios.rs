use sha2::{Digest, Sha256};
use slicedl::{
    ByteRange, Completion, DownloadRequest, DownloadSession, EventSink, FileStore, HashAlgorithm, ManualTicker,
    Notification, RequestId, ResponseBuffer, SessionConfig, Status, Transport, TransportEvent,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const URL: &str = "https://cdn.example.com/packs/level.pak";
const PATH: &str = "mem/level.pak";

#[derive(Debug, Clone)]
enum Call {
    Head { request: RequestId },
    Get { request: RequestId, range: ByteRange },
}

#[derive(Default)]
struct TransportLog {
    calls: Vec<Call>,
    canceled: Vec<RequestId>,
}

/// Records requests; the test plays the server by dispatching events.
#[derive(Clone, Default)]
struct ScriptedTransport(Arc<Mutex<TransportLog>>);

impl Transport for ScriptedTransport {
    fn head(&mut self, request: RequestId, _url: &str, _sink: EventSink) -> slicedl::Result<()> {
        self.0.lock().unwrap().calls.push(Call::Head { request });
        Ok(())
    }

    fn get(&mut self, request: RequestId, _url: &str, range: ByteRange, _sink: EventSink) -> slicedl::Result<()> {
        self.0.lock().unwrap().calls.push(Call::Get { request, range });
        Ok(())
    }

    fn cancel(&mut self, request: RequestId) {
        self.0.lock().unwrap().canceled.push(request);
    }
}

#[derive(Default)]
struct StoreState {
    files: HashMap<PathBuf, Vec<u8>>,
    failures: usize,
    refuse_remove: bool,
}

#[derive(Clone, Default)]
struct MemoryStore(Arc<Mutex<StoreState>>);

impl FileStore for MemoryStore {
    fn append(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        state.files.entry(path.to_path_buf()).or_default().extend_from_slice(bytes);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.lock().unwrap().files.contains_key(path)
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.refuse_remove {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
        }
        state.files.remove(path);
        Ok(())
    }
}

struct Harness {
    session: DownloadSession,
    transport: ScriptedTransport,
    store: MemoryStore,
    ticker: ManualTicker,
}

impl Harness {
    fn new() -> Self {
        Self::with_hash(HashAlgorithm::Md5)
    }

    fn with_hash(hash: HashAlgorithm) -> Self {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::default();
        let ticker = ManualTicker::new();
        let config = SessionConfig {
            download_dir: PathBuf::from("mem"),
            hash,
            ..SessionConfig::default()
        };
        let session = DownloadSession::new(config, transport.clone(), store.clone(), ticker.clone());
        Self {
            session,
            transport,
            store,
            ticker,
        }
    }

    fn heads(&self) -> Vec<RequestId> {
        let log = self.transport.0.lock().unwrap();
        log.calls
            .iter()
            .filter_map(|call| match call {
                Call::Head { request } => Some(*request),
                _ => None,
            })
            .collect()
    }

    fn gets(&self) -> Vec<(RequestId, ByteRange)> {
        let log = self.transport.0.lock().unwrap();
        log.calls
            .iter()
            .filter_map(|call| match call {
                Call::Get { request, range } => Some((*request, *range)),
                _ => None,
            })
            .collect()
    }

    fn last_get(&self) -> (RequestId, ByteRange) {
        *self.gets().last().expect("no GET issued")
    }

    fn canceled(&self) -> Vec<RequestId> {
        self.transport.0.lock().unwrap().canceled.clone()
    }

    fn file(&self) -> Option<Vec<u8>> {
        self.store.0.lock().unwrap().files.get(Path::new(PATH)).cloned()
    }

    fn send(&mut self, event: TransportEvent) {
        self.session.dispatch(event.into());
    }

    fn answer_probe(&mut self, status_code: u16, content_length: Option<u64>) {
        let request = *self.heads().last().expect("no HEAD issued");
        self.send(TransportEvent::Headers {
            request,
            status_code,
            content_length,
        });
        self.send(TransportEvent::Complete {
            request,
            completion: Completion::ok(status_code),
        });
    }

    /// Requests `PATH` and answers the probe with `size`.
    fn start(&mut self, size: u64, request: DownloadRequest) {
        assert!(self.session.request_download(request.save_path(PATH)));
        self.answer_probe(200, Some(size));
    }

    fn headers(&mut self, request: RequestId, status_code: u16, content_length: Option<u64>) {
        self.send(TransportEvent::Headers {
            request,
            status_code,
            content_length,
        });
    }

    fn progress(&mut self, request: RequestId, buffer: &ResponseBuffer) {
        self.send(TransportEvent::Progress {
            request,
            buffer: buffer.clone(),
        });
    }

    fn complete(&mut self, request: RequestId, completion: Completion) {
        self.send(TransportEvent::Complete { request, completion });
    }

    /// Serves the latest GET from `object` in `chunk`-sized progress signals.
    fn serve(&mut self, object: &[u8], chunk: usize) -> ByteRange {
        let (request, range) = self.last_get();
        let body = &object[range.begin as usize..=range.end as usize];
        self.headers(request, 206, Some(body.len() as u64));
        let buffer = ResponseBuffer::new();
        for piece in body.chunks(chunk) {
            buffer.extend(piece);
            self.progress(request, &buffer);
        }
        self.complete(request, Completion::ok(206));
        range
    }
}

fn object(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        seen.push(notification);
    }
    seen
}

#[test]
fn unsliced_download_uses_one_range() {
    let mut h = Harness::new();
    let data = object(1_000_000);
    h.start(1_000_000, DownloadRequest::new(URL));

    let range = h.serve(&data, 64 * 1024);

    assert_eq!(range, ByteRange { begin: 0, end: 999_999 });
    assert_eq!(h.gets().len(), 1);
    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.session.downloaded_bytes(), 1_000_000);
    assert_eq!(h.file().unwrap(), data);

    let info = h.session.downloaded_file_info().unwrap();
    assert_eq!(info.size, Some(1_000_000));
    assert_eq!(info.hash.as_deref(), Some(md5_hex(&data).as_str()));
    assert!(h.session.hash_check(&md5_hex(&data).to_uppercase()));
    assert!(!h.session.hash_check("00000000000000000000000000000000"));
}

#[test]
fn sliced_download_walks_three_ranges() {
    let mut h = Harness::new();
    let data = object(50_000_000);
    h.start(50_000_000, DownloadRequest::new(URL).sliced(20_000_000));

    let mut served = Vec::new();
    while h.session.status() == Status::Downloading {
        served.push(h.serve(&data, 5_000_000));
    }

    assert_eq!(
        served,
        vec![
            ByteRange { begin: 0, end: 19_999_999 },
            ByteRange { begin: 20_000_000, end: 39_999_999 },
            ByteRange { begin: 40_000_000, end: 49_999_999 },
        ]
    );
    assert_eq!(h.session.slice().slice_index, 2);
    assert_eq!(h.session.downloaded_bytes(), 50_000_000);
    assert_eq!(h.session.status(), Status::Succeeded);
    assert!(h.session.hash_check(&md5_hex(&data)));
}

#[test]
fn resume_requests_only_missing_bytes() {
    let mut h = Harness::new();
    let mut rx = h.session.subscribe();
    let data = object(100_000);
    h.start(100_000, DownloadRequest::new(URL));

    let (first, _) = h.last_get();
    h.headers(first, 206, Some(100_000));
    let buffer = ResponseBuffer::from(data[..10_000].to_vec());
    h.progress(first, &buffer);
    assert!((h.session.progress() - 0.1).abs() < f64::EPSILON);

    h.session.pause();
    assert_eq!(h.session.status(), Status::Paused);
    assert!(h.canceled().contains(&first));
    assert_eq!(h.session.ledger().committed_at_request_start(), 10_000);
    assert_eq!(h.session.speed(), 0);
    assert!((h.session.progress() - 0.1).abs() < f64::EPSILON);

    assert!(h.session.resume());
    let (second, range) = h.last_get();
    assert_ne!(first, second);
    assert_eq!(range, ByteRange { begin: 10_000, end: 99_999 });
    assert_eq!(h.session.ledger().committed_at_request_start(), 10_000);

    h.serve(&data, 30_000);
    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), data);
    assert!(h.session.hash_check(&md5_hex(&data)));

    let session = h.session.id();
    assert_eq!(
        drain(&mut rx),
        vec![
            Notification::Paused { session },
            Notification::Resumed { session },
            Notification::Completed { session, success: true },
        ]
    );
}

#[test]
fn resume_inside_a_slice_stays_slice_bounded() {
    let mut h = Harness::new();
    let data = object(100_000);
    h.start(100_000, DownloadRequest::new(URL).sliced(30_000));

    let (first, range) = h.last_get();
    assert_eq!(range, ByteRange { begin: 0, end: 29_999 });
    h.headers(first, 206, Some(30_000));
    h.progress(first, &ResponseBuffer::from(data[..10_000].to_vec()));
    h.session.pause();

    assert!(h.session.resume());
    assert_eq!(h.last_get().1, ByteRange { begin: 10_000, end: 39_999 });

    while h.session.status() == Status::Downloading {
        h.serve(&data, 7_000);
    }
    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), data);
}

#[test]
fn non_success_get_fails_and_blocks_resume() {
    let mut h = Harness::new();
    let mut rx = h.session.subscribe();
    h.start(1_000, DownloadRequest::new(URL));

    let (request, _) = h.last_get();
    h.headers(request, 503, None);

    assert_eq!(h.session.status(), Status::Failed);
    assert_eq!(h.session.downloaded_bytes(), 0);
    assert!(!h.session.resume());
    assert!(!h.session.redownload());
    assert_eq!(h.ticker.registered(), 0);
    assert_eq!(
        drain(&mut rx),
        vec![Notification::Completed {
            session: h.session.id(),
            success: false
        }]
    );
}

#[test]
fn broken_connection_keeps_committed_bytes() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL));

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    h.progress(request, &ResponseBuffer::from(data[..200].to_vec()));
    h.complete(request, Completion::failed("connection reset", Some(206)));

    assert_eq!(h.session.status(), Status::Failed);
    assert_eq!(h.session.downloaded_bytes(), 200);
    assert!(!h.session.resume());
}

#[test]
fn failed_write_is_retried_on_next_signal() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL));
    h.store.0.lock().unwrap().failures = 1;

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    let buffer = ResponseBuffer::from(data[..400].to_vec());

    h.progress(request, &buffer);
    assert_eq!(h.session.downloaded_bytes(), 0);
    assert!(h.file().is_none());

    h.progress(request, &buffer);
    assert_eq!(h.session.downloaded_bytes(), 400);
    assert_eq!(h.file().unwrap(), &data[..400]);

    buffer.extend(&data[400..]);
    h.progress(request, &buffer);
    h.complete(request, Completion::ok(206));

    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), data);
    assert!(h.session.hash_check(&md5_hex(&data)));
}

#[test]
fn tail_lost_on_last_signal_is_written_at_completion() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL));

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    h.progress(request, &ResponseBuffer::from(data[..600].to_vec()));
    h.store.0.lock().unwrap().failures = 1;
    h.progress(request, &ResponseBuffer::from(data.clone()));
    assert_eq!(h.session.downloaded_bytes(), 600);

    h.complete(request, Completion::ok(206));
    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), data);
}

#[test]
fn committed_total_never_passes_size() {
    let mut h = Harness::new();
    let data = object(1_200);
    h.start(1_000, DownloadRequest::new(URL));

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    h.progress(request, &ResponseBuffer::from(data.clone()));
    assert_eq!(h.session.downloaded_bytes(), 1_000);

    h.complete(request, Completion::ok(206));
    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), &data[..1_000]);
}

#[test]
fn reset_twice_zeroes_everything() {
    let mut h = Harness::new();
    let mut rx = h.session.subscribe();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL).sliced(300));
    let (request, _) = h.last_get();
    h.headers(request, 206, Some(300));
    h.progress(request, &ResponseBuffer::from(data[..100].to_vec()));

    h.session.reset();
    h.session.reset();

    assert_eq!(h.session.status(), Status::NotStarted);
    assert_eq!(h.session.downloaded_bytes(), 0);
    assert_eq!(h.session.ledger(), Default::default());
    assert_eq!(h.session.slice(), Default::default());
    assert_eq!(h.session.total_size(), None);
    assert_eq!(h.session.progress(), 0.0);
    assert!(h.session.downloaded_file_info().is_none());
    assert!(!h.session.is_busy());
    assert_eq!(h.ticker.registered(), 0);
    assert!(h.canceled().contains(&request));

    assert_eq!(
        rx.try_recv(),
        Ok(Notification::Canceled {
            session: h.session.id()
        })
    );
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
}

#[test]
fn new_request_needs_force_while_downloading() {
    let mut h = Harness::new();
    let mut rx = h.session.subscribe();
    h.start(1_000, DownloadRequest::new(URL));
    let (request, _) = h.last_get();

    assert!(!h.session.request_download(DownloadRequest::new(URL)));
    assert_eq!(h.session.status(), Status::Downloading);
    assert_eq!(h.heads().len(), 1);

    assert!(h.session.request_download(DownloadRequest::new(URL).save_path(PATH).force()));
    assert!(h.canceled().contains(&request));
    assert_eq!(h.session.status(), Status::NotStarted);
    assert_eq!(h.heads().len(), 2);
    assert_eq!(
        drain(&mut rx),
        vec![Notification::Canceled {
            session: h.session.id()
        }]
    );

    // the replaced GET can still deliver, it must not count
    h.progress(request, &ResponseBuffer::from(object(500)));
    assert_eq!(h.session.downloaded_bytes(), 0);
}

#[test]
fn request_is_rejected_while_probing() {
    let mut h = Harness::new();
    assert!(h.session.request_download(DownloadRequest::new(URL)));
    assert!(h.session.is_busy());
    assert!(!h.session.request_download(DownloadRequest::new(URL)));
}

#[test]
fn redownload_restarts_mid_transfer_only() {
    let mut h = Harness::new();
    let data = object(1_000);
    assert!(!h.session.redownload());

    h.start(1_000, DownloadRequest::new(URL));
    let (first, _) = h.last_get();
    h.headers(first, 206, Some(1_000));
    h.progress(first, &ResponseBuffer::from(data[..300].to_vec()));

    assert!(h.session.redownload());
    assert!(h.canceled().contains(&first));
    assert_eq!(h.session.status(), Status::NotStarted);
    assert_eq!(h.session.downloaded_bytes(), 0);
    assert_eq!(h.heads().len(), 2);

    // probe deletes the partial file before starting over
    h.answer_probe(200, Some(1_000));
    assert_eq!(h.last_get().1, ByteRange { begin: 0, end: 999 });
    h.serve(&data, 256);

    assert_eq!(h.session.status(), Status::Succeeded);
    assert_eq!(h.file().unwrap(), data);
    assert!(h.session.hash_check(&md5_hex(&data)));
    assert!(!h.session.redownload());
}

#[test]
fn events_after_cancel_are_ignored() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL));
    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    let buffer = ResponseBuffer::from(data[..100].to_vec());
    h.progress(request, &buffer);

    h.session.cancel();
    assert_eq!(h.session.status(), Status::Canceled);
    assert_eq!(h.ticker.registered(), 0);

    buffer.extend(&data[100..]);
    h.progress(request, &buffer);
    h.complete(request, Completion::ok(206));
    assert_eq!(h.session.status(), Status::Canceled);
    assert_eq!(h.session.downloaded_bytes(), 100);
    assert!(!h.session.resume());
}

#[test]
fn failed_probe_never_starts_transfer() {
    let mut h = Harness::new();
    let mut rx = h.session.subscribe();

    assert!(h.session.request_download(DownloadRequest::new(URL)));
    h.answer_probe(404, Some(0));
    assert_eq!(h.session.status(), Status::NotStarted);
    assert!(h.gets().is_empty());

    assert!(h.session.request_download(DownloadRequest::new(URL)));
    h.answer_probe(200, None);
    assert!(h.gets().is_empty());

    assert!(h.session.request_download(DownloadRequest::new(URL)));
    let request = h.heads()[2];
    h.complete(request, Completion::failed("dns error", None));
    assert!(h.gets().is_empty());
    assert_eq!(h.session.downloaded_bytes(), 0);

    let failures = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n, Notification::Completed { success: false, .. }))
        .count();
    assert_eq!(failures, 3);
}

#[test]
fn invalid_url_is_rejected_up_front() {
    let mut h = Harness::new();
    assert!(!h.session.request_download(DownloadRequest::new("not a url")));
    assert!(h.heads().is_empty());
}

#[test]
fn probe_only_learns_size_without_downloading() {
    let mut h = Harness::new();
    assert!(h.session.request_download(DownloadRequest::new(URL).probe_only()));
    h.answer_probe(200, Some(4_096));

    assert_eq!(h.session.total_size(), Some(4_096));
    assert_eq!(h.session.status(), Status::NotStarted);
    assert!(!h.session.is_busy());
    assert!(h.gets().is_empty());
}

#[test]
fn unexpected_content_length_fails_transfer() {
    let mut h = Harness::new();
    h.start(1_000, DownloadRequest::new(URL));
    let (request, _) = h.last_get();

    h.headers(request, 206, Some(777));
    assert_eq!(h.session.status(), Status::Failed);
    assert!(h.canceled().contains(&request));
}

#[test]
fn ignored_range_on_resume_fails_transfer() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL));
    let (request, _) = h.last_get();
    h.headers(request, 206, Some(1_000));
    h.progress(request, &ResponseBuffer::from(data[..100].to_vec()));
    h.session.pause();
    assert!(h.session.resume());

    let (resumed, _) = h.last_get();
    h.headers(resumed, 200, Some(1_000));
    assert_eq!(h.session.status(), Status::Failed);
    assert_eq!(h.file().unwrap(), &data[..100]);
}

#[test]
fn existing_destination_is_replaced() {
    let mut h = Harness::new();
    h.store
        .0
        .lock()
        .unwrap()
        .files
        .insert(PathBuf::from(PATH), b"stale bytes".to_vec());
    let data = object(2_000);

    h.start(2_000, DownloadRequest::new(URL));
    h.serve(&data, 512);
    assert_eq!(h.file().unwrap(), data);
}

#[test]
fn undeletable_destination_aborts_start() {
    let mut h = Harness::new();
    {
        let mut state = h.store.0.lock().unwrap();
        state.files.insert(PathBuf::from(PATH), b"stale".to_vec());
        state.refuse_remove = true;
    }

    h.start(2_000, DownloadRequest::new(URL));
    assert!(h.gets().is_empty());
    assert_eq!(h.session.status(), Status::NotStarted);
}

#[test]
fn default_save_path_uses_download_dir() {
    let mut h = Harness::new();
    assert!(h.session.request_download(DownloadRequest::new(URL)));
    let info = h.session.downloaded_file_info().unwrap();
    assert_eq!(info.name, "level.pak");
    assert_eq!(info.save_path, PathBuf::from(PATH));
}

#[test]
fn ticks_scale_speed_while_downloading() {
    let mut h = Harness::new();
    h.start(4_096, DownloadRequest::new(URL));
    assert_eq!(h.ticker.registered(), 1);

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(4_096));
    h.progress(request, &ResponseBuffer::from(vec![7u8; 512]));
    h.ticker.tick(Duration::from_millis(500));
    assert_eq!(h.session.pump(), 1);

    assert_eq!(h.session.speed(), 512);
    assert!((h.session.speed_kbs() - 1.0).abs() < 1e-9);

    h.session.pause();
    assert_eq!(h.ticker.registered(), 1);
    assert_eq!(h.session.speed_kbs(), 0.0);

    h.session.cancel();
    assert_eq!(h.ticker.registered(), 0);
}

#[test]
fn ticks_run_while_the_head_request_is_pending() {
    let mut h = Harness::new();
    assert!(h.session.request_download(DownloadRequest::new(URL).save_path(PATH)));
    assert_eq!(h.ticker.registered(), 1);
    h.ticker.tick(Duration::from_millis(250));
    assert_eq!(h.session.pump(), 1);

    h.answer_probe(404, None);
    assert_eq!(h.ticker.registered(), 0);

    assert!(h.session.request_download(DownloadRequest::new(URL).save_path(PATH).probe_only()));
    assert_eq!(h.ticker.registered(), 1);
    h.answer_probe(200, Some(2_048));
    assert_eq!(h.session.total_size(), Some(2_048));
    assert_eq!(h.ticker.registered(), 0);
}

#[test]
fn hash_check_needs_file_on_disk() {
    let mut h = Harness::new();
    let data = object(1_000);
    assert!(!h.session.hash_check(&md5_hex(&data)));

    h.start(1_000, DownloadRequest::new(URL));
    h.serve(&data, 1_000);
    assert!(h.session.hash_check(&md5_hex(&data)));

    h.store.0.lock().unwrap().files.clear();
    assert!(!h.session.hash_check(&md5_hex(&data)));
}

#[test]
fn sha256_can_replace_md5() {
    let mut h = Harness::with_hash(HashAlgorithm::Sha256);
    let data = object(10_000);
    h.start(10_000, DownloadRequest::new(URL).sliced(4_000));
    while h.session.status() == Status::Downloading {
        h.serve(&data, 1_500);
    }

    let expected = hex::encode(Sha256::digest(&data));
    assert_eq!(h.session.status(), Status::Succeeded);
    assert!(h.session.hash_check(&expected));
}

#[test]
fn zero_slice_size_uses_configured_default() {
    let mut h = Harness::new();
    h.start(100, DownloadRequest::new(URL).sliced(0));
    assert_eq!(h.session.slice().slice_byte_size, slicedl::DEFAULT_SLICE_SIZE);
    assert_eq!(h.last_get().1, ByteRange { begin: 0, end: 99 });
}

#[test]
fn writes_failing_for_a_whole_slice_end_the_transfer() {
    let mut h = Harness::new();
    let data = object(1_000);
    h.start(1_000, DownloadRequest::new(URL).sliced(400));
    h.store.0.lock().unwrap().failures = usize::MAX;

    let (request, _) = h.last_get();
    h.headers(request, 206, Some(400));
    h.progress(request, &ResponseBuffer::from(data[..400].to_vec()));
    h.complete(request, Completion::ok(206));

    assert_eq!(h.session.status(), Status::Failed);
    assert_eq!(h.gets().len(), 1);
}

/// Store that extends the live response buffer from another thread while an
/// append is in progress and records whether that got through.
#[derive(Clone, Default)]
struct ContendedStore {
    buffer: Arc<Mutex<Option<ResponseBuffer>>>,
    extended: Arc<Mutex<Vec<bool>>>,
}

impl FileStore for ContendedStore {
    fn append(&mut self, _path: &Path, _bytes: &[u8]) -> io::Result<()> {
        let buffer = self.buffer.lock().unwrap().clone();
        if let Some(buffer) = buffer {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                buffer.extend(&[]);
                let _ = tx.send(());
            });
            let done = rx.recv_timeout(Duration::from_secs(2)).is_ok();
            self.extended.lock().unwrap().push(done);
        }
        Ok(())
    }

    fn exists(&self, _path: &Path) -> bool {
        false
    }

    fn remove(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn response_buffer_stays_writable_during_appends() {
    let transport = ScriptedTransport::default();
    let store = ContendedStore::default();
    let mut session = DownloadSession::new(SessionConfig::default(), transport.clone(), store.clone(), ManualTicker::new());
    assert!(session.request_download(DownloadRequest::new(URL).save_path(PATH)));

    let calls = || transport.0.lock().unwrap().calls.clone();
    let Some(Call::Head { request: head }) = calls().last().cloned() else {
        panic!("no HEAD issued");
    };
    session.dispatch(TransportEvent::Headers { request: head, status_code: 200, content_length: Some(64) }.into());
    session.dispatch(TransportEvent::Complete { request: head, completion: Completion::ok(200) }.into());

    let Some(Call::Get { request, .. }) = calls().last().cloned() else {
        panic!("no GET issued");
    };
    let buffer = ResponseBuffer::from(object(64));
    *store.buffer.lock().unwrap() = Some(buffer.clone());
    session.dispatch(TransportEvent::Progress { request, buffer }.into());

    assert_eq!(session.downloaded_bytes(), 64);
    assert_eq!(*store.extended.lock().unwrap(), vec![true]);
}
