pub mod beam;
pub mod qscore;
pub mod viterbi;

// Re-export commonly used types
pub use beam::{path_to_sequence, BeamSearch, DecodedPath};
pub use qscore::placeholder_qstring;
pub use viterbi::{
    encode_targets, mirror_trim, trim_positions, viterbi_alignment, SignalAligner,
};

use crate::mapping::{Mapper, Mapping};
use crate::score::ScoreMatrix;
use crate::signal::SubReadTag;

/// Final call for one read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasecallResult {
    pub sequence: String,
    pub qstring: Option<String>,
    pub mean_qscore: f32,
    pub mapping: Option<Mapping>,
    /// Sample-domain (start, end) of the informative region
    pub trim_positions: Option<(i64, i64)>,
}

impl BasecallResult {
    /// "No call" result.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Decoded sequence of one sub-read, waiting for its siblings.
#[derive(Debug, Clone)]
pub struct DecodedSubRead {
    pub tag: SubReadTag,
    pub sequence: String,
    /// Stitched scores, kept only when trim sites are requested
    pub scores: Option<ScoreMatrix<f32>>,
}

/// Joins a read's decoded sub-reads and attaches qualities, mapping and trim sites.
pub struct ReadFinisher<'a> {
    pub qscores: bool,
    pub trim_sites: bool,
    pub reverse: bool,
    pub mapper: Option<&'a dyn Mapper>,
    pub aligner: SignalAligner,
}

impl<'a> ReadFinisher<'a> {
    /// Build the result of one read from all of its sub-reads.
    ///
    /// Sub-reads are concatenated in processing order: signal order, or
    /// reverse signal order when decoding the reverse strand.
    pub fn finish(&self, mut parts: Vec<DecodedSubRead>) -> BasecallResult {
        parts.sort_by_key(|p| p.tag.index);
        if self.reverse {
            parts.reverse();
        }

        let sequence: String = parts.iter().map(|p| p.sequence.as_str()).collect();
        if sequence.is_empty() {
            return BasecallResult::empty();
        }

        // The placeholder carries no estimate, so the mean stays unset
        let qstring = self.qscores.then(|| placeholder_qstring(sequence.len()));
        let mean_qscore = 0.0;

        let mapping = self
            .mapper
            .and_then(|mapper| mapper.map(&sequence).into_iter().next());

        let trim_positions = match (self.trim_sites, self.mapper) {
            (true, Some(_)) => self.trim(&parts, &sequence, mapping.as_ref()),
            _ => None,
        };

        BasecallResult {
            sequence,
            qstring,
            mean_qscore,
            mapping,
            trim_positions,
        }
    }

    fn trim(
        &self,
        parts: &[DecodedSubRead],
        sequence: &str,
        mapping: Option<&Mapping>,
    ) -> Option<(i64, i64)> {
        let mut joined: Option<ScoreMatrix<f32>> = None;
        for part in parts {
            let scores = part.scores.as_ref()?;
            match joined.as_mut() {
                Some(acc) => acc.extend_rows(scores, 0, scores.rows()),
                None => joined = Some(scores.clone()),
            }
        }
        let joined = joined?;
        let trim = self.aligner.trim(&joined, sequence, mapping)?;
        if self.reverse {
            // reverse-strand scores run backwards in time
            let span = (joined.rows() * self.aligner.stride) as i64;
            Some(mirror_trim(trim, span))
        } else {
            Some(trim)
        }
    }
}
