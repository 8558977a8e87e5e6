/// Basecalling run statistics tracking and reporting
use log::info;

/// Counters for one basecalling run
#[derive(Default, Debug, Clone, PartialEq)]
pub struct BasecallStats {
    /// Reads admitted into the pipeline
    pub reads: u64,
    /// Raw samples of admitted reads
    pub samples: u64,
    /// Sub-reads produced by splitting
    pub sub_reads: u64,
    /// Chunks scored
    pub chunks: u64,
    /// Batches submitted to the scoring model
    pub batches: u64,
    /// Results handed to the writer
    pub written: u64,
    /// Reads that decoded to an empty sequence
    pub empty: u64,
    /// Reads skipped for exceeding the size limit
    pub too_long: u64,
    /// Written results carrying a mapping
    pub mapped: u64,
    /// Bases written
    pub bases: u64,
}

impl BasecallStats {
    /// Create new statistics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read admitted into the pipeline
    pub fn record_read(&mut self, samples: usize, sub_reads: usize) {
        self.reads += 1;
        self.samples += samples as u64;
        self.sub_reads += sub_reads as u64;
    }

    /// Record a result handed to the writer
    pub fn record_written(&mut self, bases: usize, mapped: bool) {
        self.written += 1;
        self.bases += bases as u64;
        if mapped {
            self.mapped += 1;
        }
    }

    /// Fold counters gathered by another pipeline stage into these.
    pub fn merge(&mut self, other: &BasecallStats) {
        self.reads += other.reads;
        self.samples += other.samples;
        self.sub_reads += other.sub_reads;
        self.chunks += other.chunks;
        self.batches += other.batches;
        self.written += other.written;
        self.empty += other.empty;
        self.too_long += other.too_long;
        self.mapped += other.mapped;
        self.bases += other.bases;
    }

    /// Percentage of written reads that mapped
    pub fn mapped_percent(&self) -> f64 {
        if self.written == 0 {
            0.0
        } else {
            100.0 * self.mapped as f64 / self.written as f64
        }
    }

    /// Mean bases per written read
    pub fn mean_length(&self) -> f64 {
        if self.written == 0 {
            0.0
        } else {
            self.bases as f64 / self.written as f64
        }
    }

    /// Print summary statistics to log
    pub fn print_summary(&self) {
        if self.reads == 0 {
            info!("No reads processed");
            if self.too_long > 0 {
                info!("Reads skipped as too long: {}", self.too_long);
            }
            return;
        }

        info!("=== Basecall Summary ===");
        info!("Number of input reads: {}", self.reads);
        info!("Samples: {}", self.samples);
        info!("Sub-reads: {}", self.sub_reads);
        info!("Chunks: {} in {} batches", self.chunks, self.batches);
        info!(
            "Reads written: {} (mean length {:.1})",
            self.written,
            self.mean_length()
        );
        if self.empty > 0 {
            info!("Empty sequences skipped: {}", self.empty);
        }
        if self.too_long > 0 {
            info!("Reads skipped as too long: {}", self.too_long);
        }
        if self.mapped > 0 {
            info!(
                "Mapped reads: {} ({:.2}%)",
                self.mapped,
                self.mapped_percent()
            );
        }
    }
}
