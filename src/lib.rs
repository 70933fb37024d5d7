//! # slicedl
//!
//! Resumable HTTP download sessions with optional range slicing.
//!
//! ## Features
//!
//! - **Probe then fetch**: a HEAD request learns the object size before any GET
//! - **Slicing**: fetch the object as consecutive fixed-size `Range` requests
//! - **Pause/resume**: resuming requests only the bytes not yet on disk
//! - **Streaming hash**: MD5 (default) or SHA-256 computed while bytes are written
//! - **Pluggable collaborators**: transport, file store and tick scheduler are traits
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use slicedl::{DownloadRequest, DownloadSession, SessionConfig, Status, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = DownloadSession::http(SessionConfig::default(), TransportConfig::default())?;
//!     session.request_download(
//!         DownloadRequest::new("https://example.com/assets/pack.bin")
//!             .save_path("downloads/pack.bin")
//!             .sliced(4 * 1024 * 1024),
//!     );
//!
//!     if session.run().await == Status::Succeeded {
//!         println!("done: {:?}", session.downloaded_file_info());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod hashing;
pub mod ledger;
mod machine;
pub mod planner;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod utils;

pub use error::{Error, Result};
pub use event::{EventSink, Notification, SessionEvent, SessionId};
pub use hashing::{calculate_hash, HashAlgorithm, StreamingHasher};
pub use ledger::TransferLedger;
pub use planner::plan_range;
pub use scheduler::{ManualTicker, Scheduler, TickHandle, TokioTicker};
pub use session::{DownloadRequest, DownloadSession, SessionConfig};
pub use state::{ByteRange, DownloadDescriptor, SliceContext, Status, DEFAULT_SLICE_SIZE};
pub use store::{FileStore, LocalFileStore};
pub use transport::{
    Completion, ReqwestTransport, RequestId, ResponseBuffer, Transport, TransportConfig, TransportEvent,
};
