use std::path::PathBuf;
use thiserror::Error;

/// Session errors. None are fatal to the host: the session turns them into a
/// status change or a `false` return and logs them.
#[derive(Debug, Error)]
pub enum Error {
    /// Metadata request failed, returned a non-2xx status or had no usable size
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    /// Planner produced `end <= begin`; the object is already fully downloaded
    #[error("invalid range: end {end} is not past begin {begin}")]
    InvalidRange { begin: u64, end: u64 },

    /// Appending to the destination failed; the same bytes are offered again
    /// on the next progress signal
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// GET failed at the transport level or answered outside 2xx
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("hasher already finalized")]
    HasherFinalized,

    /// A collaborator needing an async runtime was used outside of one
    #[error("no async runtime available: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
