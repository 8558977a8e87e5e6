/// Reference mapper contract consumed by the decode stage
use std::fmt;

/// Strand of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn is_reverse(self) -> bool {
        self == Strand::Reverse
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

/// One alignment of a basecalled sequence against a reference contig.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    /// Contig name
    pub ctg: String,
    /// Reference start (0-based, inclusive)
    pub r_st: usize,
    /// Reference end (exclusive)
    pub r_en: usize,
    /// Query start within the basecall (0-based, inclusive)
    pub q_st: usize,
    /// Query end within the basecall (exclusive)
    pub q_en: usize,
    pub strand: Strand,
    /// CIGAR of the aligned query span (no clips)
    pub cigar: String,
    /// Edit distance
    pub nm: u32,
    /// Mapping quality
    pub mapq: u8,
}

/// External reference aligner.
///
/// Shared by every decode worker, so it must be callable concurrently.
pub trait Mapper: Send + Sync {
    /// Mappings of `sequence`, best first. Only the first one is used.
    fn map(&self, sequence: &str) -> Vec<Mapping>;

    /// Reference contigs (name, length) in index order.
    fn reference_sequences(&self) -> Vec<(String, usize)>;
}
