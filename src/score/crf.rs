/// K-mer CRF state graph shared by the oracle contract, beam search and signal alignment
use crate::score::ScoreMatrix;

/// Output alphabet; index 0 is the blank/stay symbol.
pub const ALPHABET: &[u8] = b"NACGT";

/// State graph of a CRF scoring model.
///
/// Each state is a k-mer of `state_len` bases. Per time step the model emits
/// `n_states * (n_base + 1)` scores laid out state-major: column
/// `s * (n_base + 1)` is the stay score of state `s`, and column
/// `s * (n_base + 1) + 1 + j` scores the move into `s` from the predecessor
/// whose leading base is `j`. A move into `s` emits base `s % n_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrfGraph {
    pub n_base: usize,
    pub state_len: usize,
}

impl CrfGraph {
    pub fn new(n_base: usize, state_len: usize) -> Self {
        assert!(n_base > 0 && state_len > 0, "empty CRF state graph");
        Self { n_base, state_len }
    }

    /// Number of k-mer states (`n_base ^ state_len`).
    pub fn n_states(&self) -> usize {
        self.n_base.pow(self.state_len as u32)
    }

    /// Emission scores per time step.
    pub fn n_scores(&self) -> usize {
        self.n_states() * (self.n_base + 1)
    }

    /// Weight of the leading base of a k-mer (`n_base ^ (state_len - 1)`).
    fn lead_weight(&self) -> usize {
        self.n_base.pow(self.state_len as u32 - 1)
    }

    pub fn stay_column(&self, state: usize) -> usize {
        state * (self.n_base + 1)
    }

    /// Column scoring the move into `state` from the predecessor with leading base `lead`.
    pub fn move_column(&self, state: usize, lead: usize) -> usize {
        state * (self.n_base + 1) + 1 + lead
    }

    /// Leading (oldest) base of a k-mer.
    pub fn lead_base(&self, state: usize) -> usize {
        state / self.lead_weight()
    }

    /// Base emitted when moving into `state`.
    pub fn emitted_base(&self, state: usize) -> usize {
        state % self.n_base
    }

    /// Predecessor of `state` whose leading base is `lead`.
    pub fn predecessor(&self, state: usize, lead: usize) -> usize {
        lead * self.lead_weight() + state / self.n_base
    }

    /// State reached from `state` by appending `base`.
    pub fn successor(&self, state: usize, base: usize) -> usize {
        (state * self.n_base) % self.n_states() + base
    }

    /// K-mer index of `bases` (first base most significant).
    pub fn kmer_index(&self, bases: &[u8]) -> usize {
        bases
            .iter()
            .fold(0, |acc, &b| acc * self.n_base + b as usize)
    }

    /// Log-semiring backward pass over a `(T, n_scores)` emission matrix.
    ///
    /// Returns `T + 1` rows of `n_states` guide scores with the terminal row at
    /// zero. Oracles without a device-side backward pass can use this to fill
    /// `ScoreBatch::betas`.
    pub fn backward_scores(&self, scores: &ScoreMatrix<f32>) -> ScoreMatrix<f32> {
        let n_states = self.n_states();
        let steps = scores.rows();
        let mut betas = vec![0.0f32; (steps + 1) * n_states];
        let mut terms = Vec::with_capacity(self.n_base + 1);

        for t in (0..steps).rev() {
            let row = scores.row(t);
            let (head, tail) = betas.split_at_mut((t + 1) * n_states);
            let next = &tail[..n_states];
            let current = &mut head[t * n_states..];
            for state in 0..n_states {
                terms.clear();
                terms.push(row[self.stay_column(state)] + next[state]);
                let lead = self.lead_base(state);
                for base in 0..self.n_base {
                    let succ = self.successor(state, base);
                    terms.push(row[self.move_column(succ, lead)] + next[succ]);
                }
                current[state] = log_sum_exp(&terms);
            }
        }

        ScoreMatrix::from_vec(betas, n_states)
    }

    /// Stay and move columns for CTC alignment against `targets` (bases `0..n_base`).
    ///
    /// Position `p` covers the k-mer `targets[p..p + state_len]`; `stay[p]` is
    /// its stay column and `moves[p - 1]` the column entering it from `p - 1`.
    /// Returns `None` when the target is shorter than one k-mer.
    pub fn ctc_columns(&self, targets: &[u8]) -> Option<(Vec<usize>, Vec<usize>)> {
        if targets.len() < self.state_len {
            return None;
        }
        let positions = targets.len() - self.state_len + 1;
        let kmers: Vec<usize> = (0..positions)
            .map(|p| self.kmer_index(&targets[p..p + self.state_len]))
            .collect();
        let stay = kmers.iter().map(|&k| self.stay_column(k)).collect();
        let moves = (1..positions)
            .map(|p| self.move_column(kmers[p], targets[p - 1] as usize))
            .collect();
        Some((stay, moves))
    }
}

/// Numerically stable `log(sum(exp(x)))`.
pub fn log_sum_exp(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|&v| (v - max).exp()).sum::<f32>().ln()
}
