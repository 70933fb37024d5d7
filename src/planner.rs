use crate::error::{Error, Result};
use crate::state::{ByteRange, SliceContext};

/// Plans the next range request starting at `committed`.
///
/// Returns [`Error::InvalidRange`] when the computed end does not lie past the
/// beginning. Callers check for completion before asking for a range. Slicing
/// only changes how the object is chunked; the last range always ends at
/// `size - 1`.
pub fn plan_range(size: u64, committed: u64, slice: &SliceContext) -> Result<ByteRange> {
    let begin = committed;
    let end_exclusive = if slice.enabled {
        begin.saturating_add(slice.slice_byte_size).min(size)
    } else {
        size
    };

    match end_exclusive.checked_sub(1) {
        Some(end) if end > begin => Ok(ByteRange { begin, end }),
        Some(end) => Err(Error::InvalidRange { begin, end }),
        None => Err(Error::InvalidRange { begin, end: 0 }),
    }
}
