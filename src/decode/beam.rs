/// Guided beam search over CRF emission scores
use std::cmp::Ordering;
use std::collections::HashMap;

use log::debug;

use crate::score::crf::CrfGraph;
use crate::score::quantize::dequantize;
use crate::score::{QuantizedBundle, ScoreBundle};

const HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;
const HASH_MUL: u64 = 0x517c_c1b7_2722_0a95;

/// Identity of the emitted base sequence after appending `base`.
fn extend_hash(hash: u64, base: usize) -> u64 {
    (hash.rotate_left(5) ^ (base as u64 + 1)).wrapping_mul(HASH_MUL)
}

/// Best path found by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPath {
    /// One entry per time step: 0 for a stay, `state + 1` for a move into `state`
    pub path: Vec<u32>,
    /// Forward score of the path
    pub score: f32,
}

/// Back-pointer node for a move.
#[derive(Debug, Clone, Copy)]
struct Node {
    t: usize,
    state: usize,
    parent: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Hypothesis {
    hash: u64,
    state: usize,
    score: f32,
    node: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    hash: u64,
    state: usize,
    score: f32,
    key: f32,
    /// Node of the hypothesis this candidate extends
    parent: Option<usize>,
    moved: bool,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.key
        .total_cmp(&a.key)
        .then(a.state.cmp(&b.state))
        .then(a.hash.cmp(&b.hash))
}

/// Beam search decoder.
///
/// Hypotheses are keyed by (emitted sequence, current state). Every step each
/// hypothesis is extended by one stay and `n_base` moves; duplicates keep the
/// higher score. Candidates are ranked by forward score plus the guide score of
/// their state at the next step, those trailing the best by more than `beamcut`
/// are dropped, and at most `beamsize` survive.
#[derive(Debug, Clone, Copy)]
pub struct BeamSearch {
    pub graph: CrfGraph,
    pub beamsize: usize,
    pub beamcut: f32,
}

impl BeamSearch {
    pub fn new(graph: CrfGraph, beamsize: usize, beamcut: f32) -> Self {
        Self {
            graph,
            beamsize,
            beamcut,
        }
    }

    /// Decode a quantized bundle, interpreting it with its own scale.
    pub fn decode_quantized(&self, quantized: &QuantizedBundle) -> DecodedPath {
        self.decode(&dequantize(quantized))
    }

    /// Decode a floating-point bundle.
    pub fn decode(&self, bundle: &ScoreBundle<f32>) -> DecodedPath {
        let steps = bundle.len();
        if steps == 0 {
            return DecodedPath {
                path: Vec::new(),
                score: 0.0,
            };
        }
        let graph = &self.graph;
        let guide = |t: usize, state: usize| -> f32 {
            if t < bundle.betas.rows() {
                bundle.betas.row(t)[state]
            } else {
                0.0
            }
        };

        let mut nodes: Vec<Node> = Vec::new();
        let mut candidates: Vec<Candidate> = (0..graph.n_states())
            .map(|state| Candidate {
                hash: HASH_SEED,
                state,
                score: 0.0,
                key: guide(0, state),
                parent: None,
                moved: false,
            })
            .collect();
        let mut beam = self.prune(&mut candidates, &mut nodes, None);

        let mut index: HashMap<(u64, usize), usize> = HashMap::new();
        for t in 0..steps {
            let row = bundle.scores.row(t);
            candidates.clear();
            index.clear();
            for hyp in &beam {
                let lead = graph.lead_base(hyp.state);
                let stay = (hyp.hash, hyp.state, row[graph.stay_column(hyp.state)], false);
                let moves = (0..graph.n_base).map(|base| {
                    let succ = graph.successor(hyp.state, base);
                    (
                        extend_hash(hyp.hash, base),
                        succ,
                        row[graph.move_column(succ, lead)],
                        true,
                    )
                });
                for (hash, state, emission, moved) in std::iter::once(stay).chain(moves) {
                    let score = hyp.score + emission;
                    let candidate = Candidate {
                        hash,
                        state,
                        score,
                        key: score + guide(t + 1, state),
                        parent: hyp.node,
                        moved,
                    };
                    match index.get(&(hash, state)) {
                        Some(&at) => {
                            if score > candidates[at].score {
                                candidates[at] = candidate;
                            }
                        }
                        None => {
                            index.insert((hash, state), candidates.len());
                            candidates.push(candidate);
                        }
                    }
                }
            }
            beam = self.prune(&mut candidates, &mut nodes, Some(t));
        }

        let best = beam
            .iter()
            .copied()
            .max_by(|a, b| a.score.total_cmp(&b.score).then(b.state.cmp(&a.state)));
        let mut path = vec![0u32; steps];
        let mut score = 0.0;
        if let Some(best) = best {
            score = best.score;
            let mut cursor = best.node;
            while let Some(at) = cursor {
                let node = nodes[at];
                path[node.t] = node.state as u32 + 1;
                cursor = node.parent;
            }
        }
        debug!(
            "beam search: {} steps, {} nodes, score {:.3}",
            steps,
            nodes.len(),
            score
        );
        DecodedPath { path, score }
    }

    /// Apply the beam cut and width to the step's candidates, recording a node
    /// for every surviving move.
    fn prune(
        &self,
        candidates: &mut Vec<Candidate>,
        nodes: &mut Vec<Node>,
        t: Option<usize>,
    ) -> Vec<Hypothesis> {
        let best = candidates
            .iter()
            .map(|c| c.key)
            .fold(f32::NEG_INFINITY, f32::max);
        candidates.retain(|c| c.key >= best - self.beamcut);
        candidates.sort_by(rank);
        candidates.truncate(self.beamsize);

        candidates
            .iter()
            .map(|c| {
                let node = match (c.moved, t) {
                    (true, Some(t)) => {
                        nodes.push(Node {
                            t,
                            state: c.state,
                            parent: c.parent,
                        });
                        Some(nodes.len() - 1)
                    }
                    _ => c.parent,
                };
                Hypothesis {
                    hash: c.hash,
                    state: c.state,
                    score: c.score,
                    node,
                }
            })
            .collect()
    }
}

/// Project a decoded path onto bases.
///
/// Every move emits `alphabet[(p - 1) % n_base + 1]`. A projection outside the
/// alphabet yields an empty sequence, which callers treat as "no call".
pub fn path_to_sequence(path: &[u32], n_base: usize, alphabet: &[u8]) -> String {
    let mut seq = Vec::with_capacity(path.len() / 2);
    for &p in path.iter().filter(|&&p| p > 0) {
        let idx = (p as usize - 1) % n_base + 1;
        match alphabet.get(idx) {
            Some(&base) => seq.push(base),
            None => {
                debug!("path entry {} projects outside the alphabet", p);
                return String::new();
            }
        }
    }
    String::from_utf8(seq).unwrap_or_default()
}
