//! Splits `[1, n]` into contiguous sub-ranges.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest number of chunks a single job may be split into.
pub const MAX_CHUNKS: usize = 128;

/// One inclusive sub-range of a partition.
///
/// When the bound is smaller than the chunk count, leading ranges are empty
/// and encoded with `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Number of integers covered by this range.
    pub const fn len(&self) -> u64 {
        (self.end + 1).saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Partitions `[1, n]` into exactly `chunks` ordered, non-overlapping ranges.
///
/// Each range holds `n / chunks` integers and the final range additionally
/// absorbs the remainder, so the sizes always sum to `n`. The output depends
/// only on `(n, chunks)`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `n` is zero or `chunks` is outside
/// `[1, MAX_CHUNKS]`.
///
/// # Example
///
/// ```
/// let ranges = primecount::partition(100, 4).unwrap();
/// let bounds: Vec<_> = ranges.iter().map(|r| (r.start, r.end)).collect();
/// assert_eq!(bounds, [(1, 25), (26, 50), (51, 75), (76, 100)]);
/// ```
pub fn partition(n: u64, chunks: usize) -> Result<Vec<ChunkRange>> {
    if n == 0 {
        return Err(Error::invalid("n must be greater than 0"));
    }
    if chunks == 0 || chunks > MAX_CHUNKS {
        return Err(Error::invalid(format!(
            "chunks must be between 1 and {MAX_CHUNKS}, got {chunks}"
        )));
    }

    let count = chunks as u64;
    let size = n / count;

    Ok((0..count)
        .map(|i| ChunkRange {
            index: i as usize,
            start: i * size + 1,
            end: if i == count - 1 { n } else { (i + 1) * size },
        })
        .collect())
}
