/// Reads, sub-reads and the read-size admission policy
use std::sync::Arc;

use log::warn;

/// One raw-signal read as handed over by the ingestion layer.
#[derive(Debug, Clone, Default)]
pub struct Read {
    /// Read identifier
    pub read_id: String,
    /// Sequencing run identifier
    pub run_id: String,
    /// Source file the read came from
    pub filename: String,
    /// Pore channel
    pub channel: u32,
    /// Mux setting
    pub mux: u32,
    /// Acquisition start time (seconds)
    pub start: f64,
    /// Acquisition duration (seconds)
    pub duration: f64,
    /// Template start time (seconds)
    pub template_start: f64,
    /// Template duration (seconds)
    pub template_duration: f64,
    /// Raw signal samples (scaled picoampere values)
    pub signal: Vec<f32>,
}

impl Read {
    /// Minimal read with only an identifier and a signal.
    pub fn new(read_id: impl Into<String>, signal: Vec<f32>) -> Self {
        Self {
            read_id: read_id.into(),
            signal,
            ..Default::default()
        }
    }

    /// Number of raw samples.
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }
}

/// Position of a sub-read within its parent read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubReadTag {
    /// Admission sequence number of the parent read
    pub parent: u64,
    /// Position of this sub-read in signal order
    pub index: usize,
    /// Number of sub-reads the parent was split into
    pub total: usize,
}

/// A `[start, end)` sample range of a parent read, chunked and decoded on its own.
#[derive(Debug, Clone)]
pub struct SubRead {
    pub read: Arc<Read>,
    pub start: usize,
    pub end: usize,
    pub tag: SubReadTag,
}

impl SubRead {
    /// Signal samples covered by this sub-read.
    pub fn signal(&self) -> &[f32] {
        &self.read.signal[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split a read into consecutive sub-reads of at most `max_read_size` samples.
///
/// Sub-reads do not overlap. A read at or below the threshold (including an
/// empty read) yields exactly one sub-read covering the whole signal. With
/// `reverse` set the sub-reads are returned last-to-first, matching the signal
/// direction of reverse-complement decoding; tags still record signal order.
pub fn split_read(
    read: &Arc<Read>,
    parent: u64,
    max_read_size: usize,
    reverse: bool,
) -> Vec<SubRead> {
    let len = read.len();
    let max_read_size = max_read_size.max(1);
    let total = if len <= max_read_size {
        1
    } else {
        len.div_ceil(max_read_size)
    };

    let mut parts: Vec<SubRead> = (0..total)
        .map(|index| {
            let start = (index * max_read_size).min(len);
            let end = if total == 1 {
                len
            } else {
                ((index + 1) * max_read_size).min(len)
            };
            SubRead {
                read: Arc::clone(read),
                start,
                end,
                tag: SubReadTag {
                    parent,
                    index,
                    total,
                },
            }
        })
        .collect();

    if reverse {
        parts.reverse();
    }
    parts
}

/// Admission policy applied before a read enters the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ReadGate {
    /// Reads with more samples than this are skipped
    pub skip_read_size: usize,
}

impl ReadGate {
    pub fn new(skip_read_size: usize) -> Self {
        Self { skip_read_size }
    }

    /// Returns `false` (and logs the read) when the read is too long to basecall.
    pub fn admit(&self, read: &Read) -> bool {
        if read.len() > self.skip_read_size {
            warn!("> skipping {}: {} samples too long", read.read_id, read.len());
            return false;
        }
        true
    }
}
