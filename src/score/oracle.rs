/// Scoring oracle contract: batched raw-signal windows in, CRF emission scores out
use crate::error::Error;
use crate::score::crf::CrfGraph;
use crate::score::{ScoreBundle, ScoreMatrix};
use crate::signal::Chunk;

/// A `(n_batch, 1, samples)` tensor of raw-signal windows.
///
/// Windows shorter than `samples` (clipped final chunks) are zero-padded at
/// the end; the padding only exists on the oracle side of the contract.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    data: Vec<f32>,
    n_batch: usize,
    samples: usize,
}

impl SignalBatch {
    /// Pack chunks into a padded batch tensor.
    pub fn from_chunks(chunks: &[Chunk], samples: usize) -> Self {
        let mut data = vec![0.0f32; chunks.len() * samples];
        for (slot, chunk) in data.chunks_mut(samples).zip(chunks) {
            let signal = chunk.signal();
            slot[..signal.len()].copy_from_slice(signal);
        }
        Self {
            data,
            n_batch: chunks.len(),
            samples,
        }
    }

    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    /// Samples per window (the channel dimension is always 1).
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Window in batch slot `slot`.
    pub fn window(&self, slot: usize) -> &[f32] {
        &self.data[slot * self.samples..(slot + 1) * self.samples]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Oracle output for one batch.
///
/// `scores` is laid out `(n_time, n_batch, n_scores)` and `betas`
/// `(n_time + 1, n_batch, n_states)`, both row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBatch<T> {
    pub scores: Vec<T>,
    pub betas: Vec<T>,
    pub n_time: usize,
    pub n_batch: usize,
    pub n_scores: usize,
    pub n_states: usize,
}

impl<T: Copy> ScoreBatch<T> {
    /// Build a batch, checking the buffers against the declared shape.
    pub fn new(
        scores: Vec<T>,
        betas: Vec<T>,
        n_time: usize,
        n_batch: usize,
        n_scores: usize,
        n_states: usize,
    ) -> Result<Self, Error> {
        if scores.len() != n_time * n_batch * n_scores {
            return Err(Error::Oracle(format!(
                "scores buffer holds {} values, expected {} x {} x {}",
                scores.len(),
                n_time,
                n_batch,
                n_scores
            )));
        }
        if betas.len() != (n_time + 1) * n_batch * n_states {
            return Err(Error::Oracle(format!(
                "betas buffer holds {} values, expected {} x {} x {}",
                betas.len(),
                n_time + 1,
                n_batch,
                n_states
            )));
        }
        Ok(Self {
            scores,
            betas,
            n_time,
            n_batch,
            n_scores,
            n_states,
        })
    }

    /// Build a batch from per-slot bundles that all share the same length.
    pub fn from_bundles(bundles: &[ScoreBundle<T>]) -> Result<Self, Error> {
        let first = bundles
            .first()
            .ok_or_else(|| Error::Oracle("cannot batch zero score bundles".into()))?;
        let n_time = first.scores.rows();
        let n_scores = first.scores.width();
        let n_states = first.betas.width();
        let n_batch = bundles.len();

        let mut scores = Vec::with_capacity(n_time * n_batch * n_scores);
        for t in 0..n_time {
            for bundle in bundles {
                if bundle.scores.rows() != n_time || bundle.betas.rows() != n_time + 1 {
                    return Err(Error::Oracle("ragged score bundles in one batch".into()));
                }
                scores.extend_from_slice(bundle.scores.row(t));
            }
        }
        let mut betas = Vec::with_capacity((n_time + 1) * n_batch * n_states);
        for t in 0..=n_time {
            for bundle in bundles {
                betas.extend_from_slice(bundle.betas.row(t));
            }
        }
        Self::new(scores, betas, n_time, n_batch, n_scores, n_states)
    }

    /// Extract batch slot `slot`, keeping its first `steps` time steps.
    pub fn slot_bundle(&self, slot: usize, steps: usize) -> ScoreBundle<T> {
        self.slot_rows(slot, 0, steps.min(self.n_time))
    }

    /// Extract batch slot `slot`, keeping its last `steps` time steps.
    ///
    /// Reverse-strand scores of a zero-padded window carry the padding at the
    /// front, so the valid rows are the trailing ones.
    pub fn slot_bundle_tail(&self, slot: usize, steps: usize) -> ScoreBundle<T> {
        let steps = steps.min(self.n_time);
        self.slot_rows(slot, self.n_time - steps, steps)
    }

    fn slot_rows(&self, slot: usize, first: usize, steps: usize) -> ScoreBundle<T> {
        let mut scores = Vec::with_capacity(steps * self.n_scores);
        for t in first..first + steps {
            let at = (t * self.n_batch + slot) * self.n_scores;
            scores.extend_from_slice(&self.scores[at..at + self.n_scores]);
        }
        let mut betas = Vec::with_capacity((steps + 1) * self.n_states);
        for t in first..=first + steps {
            let at = (t * self.n_batch + slot) * self.n_states;
            betas.extend_from_slice(&self.betas[at..at + self.n_states]);
        }
        ScoreBundle {
            scores: ScoreMatrix::from_vec(scores, self.n_scores),
            betas: ScoreMatrix::from_vec(betas, self.n_states),
        }
    }
}

/// External scoring model.
///
/// Exactly one thread owns the oracle for the whole run, so implementations
/// may assume calls to `score` never overlap.
pub trait ScoringOracle: Send {
    /// Raw samples per output time step.
    fn stride(&self) -> usize;

    /// State graph describing the output score layout.
    fn graph(&self) -> CrfGraph;

    /// Score a batch of windows.
    ///
    /// Returns natural-log emission scores shaped
    /// `(samples / stride, n_batch, graph.n_scores())` and guide scores with one
    /// extra time step. With `reverse` set the scores describe the
    /// reverse-complement strand (time-reversed).
    fn score(&mut self, batch: &SignalBatch, reverse: bool) -> Result<ScoreBatch<f32>, Error>;
}

impl<O: ScoringOracle + ?Sized> ScoringOracle for Box<O> {
    fn stride(&self) -> usize {
        (**self).stride()
    }

    fn graph(&self) -> CrfGraph {
        (**self).graph()
    }

    fn score(&mut self, batch: &SignalBatch, reverse: bool) -> Result<ScoreBatch<f32>, Error> {
        (**self).score(batch, reverse)
    }
}
