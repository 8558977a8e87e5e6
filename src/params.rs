use clap::Parser;

use crate::error::Error;

/// Default int8 quantization scale (127 / 5).
pub const DEFAULT_SCALE: f32 = 127.0 / 5.0;

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// Basecalling parameters consumed by the pipeline core.
///
/// The struct derives `Parser` so a front end can either parse it directly or
/// embed it with `#[command(flatten)]` next to its own model/input options.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rucall",
    about = "Nanopore raw-signal basecalling pipeline",
    version
)]
pub struct Parameters {
    // ── Chunking ────────────────────────────────────────────────────────
    /// Samples per scoring window
    #[arg(long = "chunksize", default_value_t = 4000)]
    pub chunksize: usize,

    /// Samples shared between consecutive windows
    #[arg(long = "overlap", default_value_t = 500)]
    pub overlap: usize,

    /// Reads longer than this are split into independent sub-reads
    #[arg(long = "max-read-size", default_value_t = 400_000)]
    pub max_read_size: usize,

    /// Reads longer than this are skipped entirely
    #[arg(long = "skip-read-size", default_value_t = 1_000_000_000)]
    pub skip_read_size: usize,

    // ── Scoring ─────────────────────────────────────────────────────────
    /// Windows per scoring batch
    #[arg(long = "batchsize", default_value_t = 32)]
    pub batchsize: usize,

    /// Fixed-point scale applied to emission and guide scores
    #[arg(long = "scale", default_value_t = DEFAULT_SCALE)]
    pub scale: f32,

    /// Decode the reverse-complement strand
    #[arg(long = "reverse", default_value_t = false)]
    pub reverse: bool,

    // ── Decoding ────────────────────────────────────────────────────────
    /// Beam width
    #[arg(long = "beamsize", default_value_t = 40)]
    pub beamsize: usize,

    /// Prune candidates trailing the best by more than this
    #[arg(long = "beamcut", default_value_t = 100.0, allow_hyphen_values = true)]
    pub beamcut: f32,

    /// Emit per-base quality strings
    #[arg(long = "qscores", default_value_t = false)]
    pub qscores: bool,

    /// Compute adapter trim sites from a signal alignment (needs a mapper)
    #[arg(long = "trim-sites", default_value_t = false)]
    pub trim_sites: bool,

    // ── Threading ───────────────────────────────────────────────────────
    /// Number of concurrent decode workers
    #[arg(long = "decode-threads", default_value_t = 8)]
    pub decode_threads: usize,

    /// Capacity of every inter-stage queue
    #[arg(long = "queue-capacity", default_value_t = 4)]
    pub queue_capacity: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::parse_from(["rucall"])
    }
}

impl Parameters {
    /// Samples between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.chunksize - self.overlap
    }

    /// Validate parameter combinations that clap alone cannot enforce.
    ///
    /// `stride` is the scoring model's samples-per-time-step; window geometry
    /// must be expressible in whole time steps.
    pub fn validate(&self, stride: usize) -> Result<(), Error> {
        if stride == 0 {
            return Err(Error::Parameter("model stride must be >= 1".into()));
        }

        if self.chunksize == 0 {
            return Err(Error::Parameter("--chunksize must be >= 1".into()));
        }

        if self.overlap >= self.chunksize {
            return Err(Error::Parameter(format!(
                "--overlap ({}) must be smaller than --chunksize ({})",
                self.overlap, self.chunksize
            )));
        }

        if self.chunksize % stride != 0 || self.overlap % stride != 0 {
            return Err(Error::Parameter(format!(
                "--chunksize ({}) and --overlap ({}) must be multiples of the model stride ({})",
                self.chunksize, self.overlap, stride
            )));
        }

        if self.batchsize == 0 {
            return Err(Error::Parameter("--batchsize must be >= 1".into()));
        }

        if self.beamsize == 0 {
            return Err(Error::Parameter("--beamsize must be >= 1".into()));
        }

        if !(self.beamcut >= 0.0) {
            return Err(Error::Parameter("--beamcut must be >= 0".into()));
        }

        if !(self.scale > 0.0) {
            return Err(Error::Parameter("--scale must be > 0".into()));
        }

        if self.max_read_size == 0 {
            return Err(Error::Parameter("--max-read-size must be >= 1".into()));
        }

        // Thread count must be at least 1
        if self.decode_threads == 0 {
            return Err(Error::Parameter("--decode-threads must be >= 1".into()));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Parameter("--queue-capacity must be >= 1".into()));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
