use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Storage primitives the ledger and the probe rely on.
///
/// `append` must create the file when it is missing. The session is the only
/// writer while a transfer is active.
pub trait FileStore {
    fn append(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn remove(&mut self, path: &Path) -> io::Result<()>;
}

/// [`FileStore`] over the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn append(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(bytes)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
