use crate::error::{Error, Result};
use crate::hashing::StreamingHasher;
use crate::store::FileStore;
use log::warn;
use std::ops::Range;
use std::path::Path;

/// Byte accounting for the destination file.
///
/// A response buffer always holds everything the current request has
/// received so far. `committed_at_request_start` tells how much of the
/// committed total came from earlier requests, so the unconsumed tail of the
/// buffer starts at `total_committed - committed_at_request_start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferLedger {
    total_committed: u64,
    committed_at_request_start: u64,
    instantaneous_rate: u64,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_committed(&self) -> u64 {
        self.total_committed
    }

    pub fn committed_at_request_start(&self) -> u64 {
        self.committed_at_request_start
    }

    /// Bytes committed by the most recent progress signal.
    pub fn instantaneous_rate(&self) -> u64 {
        self.instantaneous_rate
    }

    /// Bytes committed since the current request was issued.
    pub fn committed_this_request(&self) -> u64 {
        self.total_committed - self.committed_at_request_start
    }

    pub(crate) fn begin_request(&mut self) {
        self.committed_at_request_start = self.total_committed;
    }

    pub(crate) fn pause(&mut self) {
        self.committed_at_request_start = self.total_committed;
        self.instantaneous_rate = 0;
    }

    pub(crate) fn halt(&mut self) {
        self.instantaneous_rate = 0;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Bytes of `buffer_len` not yet written.
    pub fn padding_for(&self, buffer_len: u64) -> u64 {
        buffer_len.saturating_sub(self.committed_this_request())
    }

    /// Span of a response buffer of `buffer_len` bytes that has not been
    /// written yet, capped so the total never passes `size`.
    pub(crate) fn pending(&self, buffer_len: usize, size: u64) -> Range<usize> {
        let padding = self
            .padding_for(buffer_len as u64)
            .min(size.saturating_sub(self.total_committed));
        if padding == 0 {
            return 0..0;
        }
        let offset = self.committed_this_request() as usize;
        offset..offset + padding as usize
    }

    /// Appends `tail`, the span returned by [`pending`](Self::pending), to
    /// `path` and hashes it.
    ///
    /// Nothing is committed when the append fails; the same span is pending
    /// again on the next signal. Returns the number of bytes committed.
    pub(crate) fn commit(
        &mut self,
        tail: &[u8],
        path: &Path,
        store: &mut dyn FileStore,
        hasher: &mut StreamingHasher,
    ) -> Result<u64> {
        if tail.is_empty() {
            return Ok(0);
        }
        store.append(path, tail).map_err(|source| Error::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let written = tail.len() as u64;
        if let Err(e) = hasher.update(tail) {
            warn!("Committed {} bytes that could not be hashed: {}", written, e);
        }
        self.instantaneous_rate = written;
        self.total_committed += written;
        Ok(written)
    }
}
