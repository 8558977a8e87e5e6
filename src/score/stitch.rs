/// Overlap resolution of per-chunk score bundles into one bundle per sub-read
use std::ops::Range;

use crate::error::Error;
use crate::score::{ScoreBundle, ScoreMatrix};

/// Stitches chunk bundles using the chunker's geometry.
///
/// Each interior boundary splits the overlap: the earlier chunk gives up its
/// trailing `overlap_t - overlap_t / 2` steps, the later one its leading
/// `overlap_t / 2` steps. With `reverse` set the bundles hold time-reversed
/// scores, so the chunks are visited last-to-first and every kept range is
/// mirrored inside its chunk.
#[derive(Debug, Clone, Copy)]
pub struct Stitcher {
    pub chunksize: usize,
    pub overlap: usize,
    pub stride: usize,
    pub reverse: bool,
}

impl Stitcher {
    pub fn new(chunksize: usize, overlap: usize, stride: usize, reverse: bool) -> Self {
        Self {
            chunksize,
            overlap,
            stride,
            reverse,
        }
    }

    /// Time steps a signal of `samples` samples occupies after scoring.
    pub fn steps(&self, samples: usize) -> usize {
        samples.div_ceil(self.stride)
    }

    fn overlap_steps(&self) -> (usize, usize) {
        let overlap_t = self.overlap / self.stride;
        let lead = overlap_t / 2;
        (lead, overlap_t - lead)
    }

    /// Kept forward range of chunk `index` out of `total` with `steps` rows.
    fn kept_range(&self, index: usize, total: usize, steps: usize) -> Range<usize> {
        let (lead, trail) = self.overlap_steps();
        let start = if index == 0 { 0 } else { lead.min(steps) };
        let end = if index + 1 == total {
            steps
        } else {
            steps.saturating_sub(trail)
        };
        start..end.max(start)
    }

    /// Stitch the bundles of one sub-read, given in chunk (signal) order.
    pub fn stitch<T: Copy>(&self, chunks: &[ScoreBundle<T>]) -> Result<ScoreBundle<T>, Error> {
        let first = chunks
            .first()
            .ok_or_else(|| Error::Pipeline("no chunk scores to stitch".into()))?;
        if chunks.len() == 1 {
            return Ok(first.clone());
        }

        let total = chunks.len();
        let mut scores = ScoreMatrix::empty(first.scores.width());
        let mut betas = ScoreMatrix::empty(first.betas.width());

        let order: Box<dyn Iterator<Item = usize>> = if self.reverse {
            Box::new((0..total).rev())
        } else {
            Box::new(0..total)
        };

        let mut terminal = None;
        for index in order {
            let chunk = &chunks[index];
            let steps = chunk.len();
            if chunk.betas.rows() != steps + 1 {
                return Err(Error::Pipeline(format!(
                    "chunk {} has {} guide rows for {} score rows",
                    index,
                    chunk.betas.rows(),
                    steps
                )));
            }
            let kept = self.kept_range(index, total, steps);
            let range = if self.reverse {
                steps - kept.end..steps - kept.start
            } else {
                kept
            };
            scores.extend_rows(&chunk.scores, range.start, range.end);
            betas.extend_rows(&chunk.betas, range.start, range.end);
            terminal = Some((index, range.end));
        }

        if let Some((index, row)) = terminal {
            betas.extend_rows(&chunks[index].betas, row, row + 1);
        }
        Ok(ScoreBundle { scores, betas })
    }
}
