/// Batching of chunks for the scoring model and the inverse per-chunk split
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::score::quantize::QuantizedBatch;
use crate::score::ScoreBundle;
use crate::signal::{Chunk, SubRead, SubReadTag};

/// Chunks submitted to the scoring model together.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Submission order
    pub index: u64,
    pub chunks: Vec<Chunk>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Groups a stream of chunks into batches of `batchsize`.
#[derive(Debug)]
pub struct Batcher {
    batchsize: usize,
    pending: Vec<Chunk>,
    next_index: u64,
}

impl Batcher {
    pub fn new(batchsize: usize) -> Self {
        Self {
            batchsize,
            pending: Vec::with_capacity(batchsize),
            next_index: 0,
        }
    }

    /// Add a chunk, returning a full batch once `batchsize` chunks are pending.
    pub fn push(&mut self, chunk: Chunk) -> Option<Batch> {
        self.pending.push(chunk);
        if self.pending.len() >= self.batchsize {
            self.take()
        } else {
            None
        }
    }

    /// Emit the final, possibly short, batch.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            self.take()
        }
    }

    fn take(&mut self) -> Option<Batch> {
        let chunks = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batchsize));
        let index = self.next_index;
        self.next_index += 1;
        Some(Batch { index, chunks })
    }
}

/// Split a scored batch back into per-chunk bundles.
///
/// Each chunk keeps `ceil(len / stride)` time steps: the leading ones for
/// forward scores, the trailing ones for reverse scores (the window padding
/// sits at the front once time is reversed).
pub fn unbatch(
    batch: Batch,
    scored: &QuantizedBatch,
    stride: usize,
    reverse: bool,
) -> Result<Vec<(Chunk, ScoreBundle<i8>)>, Error> {
    if scored.batch.n_batch != batch.len() {
        return Err(Error::Pipeline(format!(
            "batch {} holds {} chunks but {} score slots",
            batch.index,
            batch.len(),
            scored.batch.n_batch
        )));
    }
    Ok(batch
        .chunks
        .into_iter()
        .enumerate()
        .map(|(slot, chunk)| {
            let steps = chunk.len().div_ceil(stride);
            let bundle = if reverse {
                scored.batch.slot_bundle_tail(slot, steps)
            } else {
                scored.batch.slot_bundle(slot, steps)
            };
            (chunk, bundle)
        })
        .collect())
}

struct Pending {
    sub_read: Arc<SubRead>,
    bundles: Vec<Option<ScoreBundle<i8>>>,
    received: usize,
}

/// Collects the chunk bundles of each sub-read until all have been scored.
#[derive(Default)]
pub struct ChunkCollector {
    pending: HashMap<SubReadTag, Pending>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk's bundle; returns the sub-read and its bundles in
    /// chunk order once the last one arrives.
    pub fn add(
        &mut self,
        chunk: Chunk,
        bundle: ScoreBundle<i8>,
    ) -> Option<(Arc<SubRead>, Vec<ScoreBundle<i8>>)> {
        let tag = chunk.sub_read.tag;
        let entry = self.pending.entry(tag).or_insert_with(|| Pending {
            sub_read: Arc::clone(&chunk.sub_read),
            bundles: vec![None; chunk.total],
            received: 0,
        });
        if entry.bundles[chunk.index].replace(bundle).is_none() {
            entry.received += 1;
        }
        if entry.received < entry.bundles.len() {
            return None;
        }
        let done = self.pending.remove(&tag)?;
        let bundles = done.bundles.into_iter().flatten().collect();
        Some((done.sub_read, bundles))
    }

    /// Sub-reads still waiting for chunks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::quantize::Quantizer;
    use crate::score::{ScoreBatch, ScoreMatrix};
    use crate::signal::{chunk_read, split_read, Read};

    fn chunks(len: usize, chunksize: usize, overlap: usize) -> Vec<Chunk> {
        let read = Arc::new(Read::new("r", (0..len).map(|i| i as f32).collect()));
        let sub = Arc::new(split_read(&read, 0, usize::MAX, false).remove(0));
        chunk_read(&sub, chunksize, overlap)
    }

    #[test]
    fn test_batcher_sizes() {
        let mut batcher = Batcher::new(4);
        let mut sizes = Vec::new();
        for chunk in chunks(100, 10, 2) {
            if let Some(batch) = batcher.push(chunk) {
                sizes.push(batch.len());
            }
        }
        if let Some(batch) = batcher.flush() {
            sizes.push(batch.len());
        }
        // 13 chunks
        assert_eq!(sizes, vec![4, 4, 4, 1]);
        assert!(batcher.flush().is_none());
    }

    #[test]
    fn test_batcher_short_tail_and_indices() {
        let mut batcher = Batcher::new(5);
        let mut batches = Vec::new();
        for chunk in chunks(100, 10, 2) {
            batches.extend(batcher.push(chunk));
        }
        batches.extend(batcher.flush());
        let sizes: Vec<_> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![5, 5, 3]);
        let indices: Vec<_> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    /// Batch whose scores encode (time step, slot) so slices can be checked.
    fn scored(n_time: usize, n_batch: usize) -> QuantizedBatch {
        let mut scores = Vec::new();
        for t in 0..n_time {
            for b in 0..n_batch {
                scores.push((t * 10 + b) as i8);
            }
        }
        let betas = vec![0i8; (n_time + 1) * n_batch];
        QuantizedBatch {
            batch: ScoreBatch::new(scores, betas, n_time, n_batch, 1, 1).unwrap(),
            scale: 1.0,
        }
    }

    #[test]
    fn test_unbatch_truncates_clipped_chunk() {
        // chunks of 10 samples, stride 2: 5 steps each; last chunk 7 samples -> 4 steps
        let cs = chunks(23, 10, 2);
        assert_eq!(cs.len(), 3);
        let batch = Batch { index: 0, chunks: cs };
        let parts = unbatch(batch, &scored(5, 3), 2, false).unwrap();
        let steps: Vec<_> = parts.iter().map(|(_, b)| b.len()).collect();
        assert_eq!(steps, vec![5, 5, 4]);
        assert_eq!(parts[2].1.scores.as_slice(), &[2, 12, 22, 32]);
        assert_eq!(parts[2].1.betas.rows(), 5);
    }

    #[test]
    fn test_unbatch_reverse_keeps_tail() {
        let cs = chunks(23, 10, 2);
        let batch = Batch { index: 0, chunks: cs };
        let parts = unbatch(batch, &scored(5, 3), 2, true).unwrap();
        assert_eq!(parts[2].1.scores.as_slice(), &[12, 22, 32, 42]);
    }

    #[test]
    fn test_unbatch_slot_mismatch() {
        let batch = Batch {
            index: 3,
            chunks: chunks(23, 10, 2),
        };
        assert!(unbatch(batch, &scored(5, 2), 2, false).is_err());
    }

    #[test]
    fn test_collector_waits_for_all_chunks() {
        let cs = chunks(23, 10, 2);
        let q = Quantizer::new(1.0);
        let mut collector = ChunkCollector::new();
        let bundle = |v: f32| {
            q.quantize_bundle(&ScoreBundle {
                scores: ScoreMatrix::from_vec(vec![v], 1),
                betas: ScoreMatrix::from_vec(vec![0.0, 0.0], 1),
            })
            .bundle
        };
        // arrive out of order
        assert!(collector.add(cs[2].clone(), bundle(3.0)).is_none());
        assert!(collector.add(cs[0].clone(), bundle(1.0)).is_none());
        assert_eq!(collector.len(), 1);
        let (sub, bundles) = collector.add(cs[1].clone(), bundle(2.0)).unwrap();
        assert_eq!(sub.len(), 23);
        let firsts: Vec<i8> = bundles.iter().map(|b| b.scores.as_slice()[0]).collect();
        assert_eq!(firsts, vec![1, 2, 3]);
        assert!(collector.is_empty());
    }
}
