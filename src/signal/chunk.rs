/// Overlapping fixed-size windows over a (sub-)read's signal
use std::ops::Range;
use std::sync::Arc;

use crate::signal::read::SubRead;

/// One scoring window of a sub-read.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Owning sub-read
    pub sub_read: Arc<SubRead>,
    /// Position of this window within the sub-read
    pub index: usize,
    /// Number of windows the sub-read produced
    pub total: usize,
    /// Window start, relative to the sub-read
    pub start: usize,
    /// Window end (exclusive), relative to the sub-read
    pub end: usize,
}

impl Chunk {
    /// Samples covered by this window.
    pub fn signal(&self) -> &[f32] {
        &self.sub_read.signal()[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Window ranges for a signal of `len` samples.
///
/// Windows start every `chunksize - overlap` samples; the last one is clipped
/// to the end of the signal rather than padded. An empty signal produces no
/// windows and anything up to `chunksize` produces exactly one.
pub fn chunk_ranges(len: usize, chunksize: usize, overlap: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let step = chunksize - overlap;
    let count = if len <= chunksize {
        1
    } else {
        (len - overlap).div_ceil(step)
    };
    (0..count)
        .map(|i| {
            let start = i * step;
            start..(start + chunksize).min(len)
        })
        .collect()
}

/// Split a sub-read into scoring windows.
pub fn chunk_read(sub_read: &Arc<SubRead>, chunksize: usize, overlap: usize) -> Vec<Chunk> {
    let ranges = chunk_ranges(sub_read.len(), chunksize, overlap);
    let total = ranges.len();
    ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| Chunk {
            sub_read: Arc::clone(sub_read),
            index,
            total,
            start: range.start,
            end: range.end,
        })
        .collect()
}
