/// CTC Viterbi alignment of signal time steps to target positions, and trim sites
use log::debug;

use crate::mapping::Mapping;
use crate::score::crf::CrfGraph;
use crate::score::ScoreMatrix;

/// Trim pair reported when no mapping is available.
pub const UNSET_TRIM: (i64, i64) = (-1, -1);

/// Encode an `ACGT` sequence as base indices `0..4`.
///
/// Returns `None` if the sequence contains any other character.
pub fn encode_targets(sequence: &str) -> Option<Vec<u8>> {
    sequence
        .bytes()
        .map(|b| match b {
            b'A' => Some(0),
            b'C' => Some(1),
            b'G' => Some(2),
            b'T' => Some(3),
            _ => None,
        })
        .collect()
}

/// Advance one row of the recurrence, optionally recording which positions
/// were entered by a move.
fn step(
    row: &[f32],
    stay: &[usize],
    moves: &[usize],
    alpha: &[f32],
    next: &mut [f32],
    moved: Option<&mut [bool]>,
) {
    let mut bits = moved;
    for p in 0..alpha.len() {
        let hold = alpha[p] + row[stay[p]];
        let enter = if p > 0 {
            alpha[p - 1] + row[moves[p - 1]]
        } else {
            f32::NEG_INFINITY
        };
        // ties stay put
        let is_move = enter > hold;
        next[p] = if is_move { enter } else { hold };
        if let Some(bits) = bits.as_deref_mut() {
            bits[p] = is_move;
        }
    }
}

/// Maximum-likelihood monotonic alignment of `scores` to `targets`.
///
/// Returns, for every time step, the target k-mer position occupied before
/// that step's transition. The path starts at position 0 and must end at the
/// last position; `None` when the target is shorter than one k-mer or the
/// signal has too few steps to reach the end.
///
/// Alpha rows are checkpointed every `ceil(sqrt(T))` steps and the move bits
/// of each segment recomputed during the backtrack, so memory stays
/// `O(sqrt(T) * n)` rather than `O(T * n)`.
pub fn viterbi_alignment(
    graph: &CrfGraph,
    scores: &ScoreMatrix<f32>,
    targets: &[u8],
) -> Option<Vec<usize>> {
    let (stay, moves) = graph.ctc_columns(targets)?;
    let positions = stay.len();
    let steps = scores.rows();
    if steps + 1 < positions {
        return None;
    }

    let interval = ((steps as f64).sqrt().ceil() as usize).max(1);
    let mut checkpoints: Vec<Vec<f32>> = Vec::with_capacity(steps / interval + 1);
    let mut alpha = vec![f32::NEG_INFINITY; positions];
    alpha[0] = 0.0;
    let mut next = vec![f32::NEG_INFINITY; positions];
    for t in 0..steps {
        if t % interval == 0 {
            checkpoints.push(alpha.clone());
        }
        step(scores.row(t), &stay, &moves, &alpha, &mut next, None);
        std::mem::swap(&mut alpha, &mut next);
    }
    if !alpha[positions - 1].is_finite() {
        debug!(
            "no alignment of {} steps to {} positions",
            steps, positions
        );
        return None;
    }

    let mut aligned = vec![0usize; steps];
    let mut position = positions - 1;
    let mut bits = vec![false; interval * positions];
    for (segment, checkpoint) in checkpoints.iter().enumerate().rev() {
        let first = segment * interval;
        let last = (first + interval).min(steps);
        alpha.copy_from_slice(checkpoint);
        for t in first..last {
            let offset = (t - first) * positions;
            step(
                scores.row(t),
                &stay,
                &moves,
                &alpha,
                &mut next,
                Some(&mut bits[offset..offset + positions]),
            );
            std::mem::swap(&mut alpha, &mut next);
        }
        for t in (first..last).rev() {
            if bits[(t - first) * positions + position] {
                position -= 1;
            }
            aligned[t] = position;
        }
    }
    Some(aligned)
}

/// Sample-domain trim sites from an alignment and the read's mapping.
///
/// The start is the first step aligned to `q_st` (0 if none), the end the last
/// step aligned to `q_en` (the alignment length if none); both are scaled by
/// `stride`. Without a mapping the unset pair is returned.
pub fn trim_positions(aligned: &[usize], mapping: Option<&Mapping>, stride: usize) -> (i64, i64) {
    let Some(mapping) = mapping else {
        return UNSET_TRIM;
    };
    let start = aligned
        .iter()
        .position(|&p| p == mapping.q_st)
        .unwrap_or(0);
    let end = aligned
        .iter()
        .rposition(|&p| p == mapping.q_en)
        .unwrap_or(aligned.len());
    ((start * stride) as i64, (end * stride) as i64)
}

/// Map trim sites found on time-reversed scores back to forward sample
/// coordinates over a read spanning `span` samples. The unset pair is kept.
pub fn mirror_trim(trim: (i64, i64), span: i64) -> (i64, i64) {
    if trim == UNSET_TRIM {
        return trim;
    }
    (span - trim.1, span - trim.0)
}

/// Aligns a read's stitched scores to its basecall and derives trim sites.
#[derive(Debug, Clone, Copy)]
pub struct SignalAligner {
    pub graph: CrfGraph,
    pub stride: usize,
}

impl SignalAligner {
    pub fn new(graph: CrfGraph, stride: usize) -> Self {
        Self { graph, stride }
    }

    /// Trim sites for `sequence`, or `None` when no alignment exists.
    pub fn trim(
        &self,
        scores: &ScoreMatrix<f32>,
        sequence: &str,
        mapping: Option<&Mapping>,
    ) -> Option<(i64, i64)> {
        if mapping.is_none() {
            return Some(UNSET_TRIM);
        }
        let targets = encode_targets(sequence)?;
        let aligned = viterbi_alignment(&self.graph, scores, &targets)?;
        Some(trim_positions(&aligned, mapping, self.stride))
    }
}
