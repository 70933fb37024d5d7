use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Slice size used when slicing is requested without an explicit size (20 MiB).
pub const DEFAULT_SLICE_SIZE: u64 = 20 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub name: String,
    pub url: String,
    pub save_path: PathBuf,
    /// Declared object size, `None` until the probe answers.
    pub size: Option<u64>,
    /// Lowercase hex digest, only set once the transfer succeeded.
    pub hash: Option<String>,
}

impl DownloadDescriptor {
    pub fn new(url: impl Into<String>, name: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            save_path: save_path.into(),
            size: None,
            hash: None,
        }
    }
}

/// Inclusive byte interval for one range request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range asks for.
    pub fn byte_count(&self) -> u64 {
        self.end - self.begin + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.begin, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceContext {
    pub enabled: bool,
    pub slice_byte_size: u64,
    pub slice_index: u32,
}

impl SliceContext {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A zero size falls back to [`DEFAULT_SLICE_SIZE`].
    pub fn sliced(slice_byte_size: u64) -> Self {
        Self {
            enabled: true,
            slice_byte_size: if slice_byte_size > 0 { slice_byte_size } else { DEFAULT_SLICE_SIZE },
            slice_index: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NotStarted,
    Downloading,
    Paused,
    Canceled,
    Failed,
    Succeeded,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Canceled | Status::Failed | Status::Succeeded)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotStarted => "not started",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Canceled => "canceled",
            Status::Failed => "failed",
            Status::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}
