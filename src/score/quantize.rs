/// Fixed-point int8 quantization of emission and guide scores
use crate::score::oracle::ScoreBatch;
use crate::score::{QuantizedBundle, ScoreBundle, ScoreMatrix};

/// Guide scores are shifted so each time step's maximum sits here.
pub const GUIDE_CEILING: f32 = 5.0;
/// Lower clamp applied to scaled guide scores.
pub const GUIDE_MIN: f32 = -127.0;
/// Upper clamp applied to scaled guide scores.
pub const GUIDE_MAX: f32 = 128.0;

/// A quantized batch and the scale it was produced with.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedBatch {
    pub batch: ScoreBatch<i8>,
    pub scale: f32,
}

/// int8 quantizer.
///
/// Emission scores are scaled and rounded. Guide scores are first re-centred
/// per time step (and batch slot) so their maximum equals `GUIDE_CEILING`,
/// then scaled, clamped to `[GUIDE_MIN, GUIDE_MAX]` and rounded. Casts to `i8`
/// saturate, so 128 lands on 127.
#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    pub scale: f32,
}

impl Quantizer {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }

    /// Quantize one emission score.
    pub fn score(&self, x: f32) -> i8 {
        (x * self.scale).round() as i8
    }

    /// Quantize a row of guide scores in place of a fresh buffer.
    fn guides_into(&self, row: &[f32], out: &mut Vec<i8>) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let shift = if max.is_finite() { max - GUIDE_CEILING } else { 0.0 };
        out.extend(
            row.iter()
                .map(|&b| ((b - shift) * self.scale).clamp(GUIDE_MIN, GUIDE_MAX).round() as i8),
        );
    }

    /// Quantize a whole oracle batch.
    pub fn quantize_batch(&self, batch: &ScoreBatch<f32>) -> QuantizedBatch {
        let scores = batch.scores.iter().map(|&x| self.score(x)).collect();
        let mut betas = Vec::with_capacity(batch.betas.len());
        for row in batch.betas.chunks(batch.n_states.max(1)) {
            self.guides_into(row, &mut betas);
        }
        QuantizedBatch {
            batch: ScoreBatch {
                scores,
                betas,
                n_time: batch.n_time,
                n_batch: batch.n_batch,
                n_scores: batch.n_scores,
                n_states: batch.n_states,
            },
            scale: self.scale,
        }
    }

    /// Quantize a single bundle.
    pub fn quantize_bundle(&self, bundle: &ScoreBundle<f32>) -> QuantizedBundle {
        let scores = bundle.scores.map(|x| self.score(x));
        let mut betas = Vec::with_capacity(bundle.betas.as_slice().len());
        for t in 0..bundle.betas.rows() {
            self.guides_into(bundle.betas.row(t), &mut betas);
        }
        QuantizedBundle {
            bundle: ScoreBundle {
                scores,
                betas: ScoreMatrix::from_vec(betas, bundle.betas.width()),
            },
            scale: self.scale,
        }
    }
}

/// Recover floating-point scores from a quantized bundle.
pub fn dequantize(quantized: &QuantizedBundle) -> ScoreBundle<f32> {
    let scale = quantized.scale;
    ScoreBundle {
        scores: quantized.bundle.scores.map(|q| q as f32 / scale),
        betas: quantized.bundle.betas.map(|q| q as f32 / scale),
    }
}
