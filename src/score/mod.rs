/// Score tensors exchanged between the oracle, quantizer, stitcher and decoders
pub mod crf;
pub mod oracle;
pub mod quantize;
pub mod stitch;
pub mod transfer;

pub use crf::CrfGraph;
pub use oracle::{ScoreBatch, ScoringOracle, SignalBatch};
pub use quantize::{dequantize, Quantizer};
pub use stitch::Stitcher;
pub use transfer::TransferBuffer;

/// Time-major 2-D buffer: one row of `width` values per time step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix<T> {
    data: Vec<T>,
    width: usize,
}

impl<T: Copy> ScoreMatrix<T> {
    /// Wrap a flat buffer of `rows * width` values.
    ///
    /// # Panics
    /// Panics if `data.len()` is not a multiple of `width`.
    pub fn from_vec(data: Vec<T>, width: usize) -> Self {
        assert!(width > 0, "score matrix width must be non-zero");
        assert_eq!(
            data.len() % width,
            0,
            "buffer of {} values is not a multiple of width {}",
            data.len(),
            width
        );
        Self { data, width }
    }

    /// Empty matrix with the given row width.
    pub fn empty(width: usize) -> Self {
        Self::from_vec(Vec::new(), width)
    }

    /// Number of time steps.
    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, t: usize) -> &[T] {
        &self.data[t * self.width..(t + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Copy of rows `[start, end)`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        Self {
            data: self.data[start * self.width..end * self.width].to_vec(),
            width: self.width,
        }
    }

    /// Append rows `[start, end)` of `other`.
    pub fn extend_rows(&mut self, other: &Self, start: usize, end: usize) {
        debug_assert_eq!(self.width, other.width);
        self.data
            .extend_from_slice(&other.data[start * other.width..end * other.width]);
    }

    /// Apply `f` element-wise into a new matrix.
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> ScoreMatrix<U> {
        ScoreMatrix {
            data: self.data.iter().map(|&x| f(x)).collect(),
            width: self.width,
        }
    }
}

/// Emission scores and backward/guide scores of one chunk or one stitched read.
///
/// `betas` carries one more row than `scores` (the terminal boundary row).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBundle<T> {
    pub scores: ScoreMatrix<T>,
    pub betas: ScoreMatrix<T>,
}

impl<T: Copy> ScoreBundle<T> {
    /// Number of emission time steps.
    pub fn len(&self) -> usize {
        self.scores.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Quantized bundle together with the scale it was produced with.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedBundle {
    pub bundle: ScoreBundle<i8>,
    pub scale: f32,
}

impl QuantizedBundle {
    pub fn len(&self) -> usize {
        self.bundle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.is_empty()
    }
}
