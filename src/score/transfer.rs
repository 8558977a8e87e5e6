/// Staging buffer for moving quantized batches off the scoring device
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::error::Error;
use crate::score::oracle::ScoreBatch;
use crate::score::quantize::QuantizedBatch;

/// Reusable host-side staging area.
///
/// Every batch is copied through one contiguous `i8` buffer: scores first,
/// then guide scores. A transfer completes (the fence advances) before the
/// batch is handed on, so downstream stages never observe a partial copy.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    staging: Mutex<Vec<i8>>,
    fence: AtomicU64,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a quantized batch through the staging buffer.
    pub fn transfer(&self, quantized: QuantizedBatch) -> Result<QuantizedBatch, Error> {
        let QuantizedBatch { batch, scale } = quantized;
        let mut staging = self
            .staging
            .lock()
            .map_err(|_| Error::Transfer("staging buffer lock poisoned".into()))?;

        let n_scores = batch.scores.len();
        staging.clear();
        staging.reserve(n_scores + batch.betas.len());
        staging.extend_from_slice(&batch.scores);
        staging.extend_from_slice(&batch.betas);

        let (scores, betas) = staging.split_at(n_scores);
        let out = ScoreBatch::new(
            scores.to_vec(),
            betas.to_vec(),
            batch.n_time,
            batch.n_batch,
            batch.n_scores,
            batch.n_states,
        )
        .map_err(|e| Error::Transfer(e.to_string()))?;

        let fence = self.fence.fetch_add(1, Ordering::Release) + 1;
        debug!("transfer {} complete: {} bytes", fence, staging.len());
        Ok(QuantizedBatch { batch: out, scale })
    }

    /// Number of completed transfers.
    pub fn completed(&self) -> u64 {
        self.fence.load(Ordering::Acquire)
    }
}
