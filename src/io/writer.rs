/// Writer interface for completed basecalls, plus FASTA/FASTQ output
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use noodles::{fasta, fastq};

use crate::decode::BasecallResult;
use crate::error::Error;
use crate::signal::Read;

/// Sink for completed reads.
///
/// The pipeline calls `write` once per non-empty result, in admission order,
/// and `finish` exactly once at the end of the run, also when a stage failed.
pub trait ResultWriter {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error>;

    fn finish(&mut self) -> Result<(), Error>;
}

impl<W: ResultWriter + ?Sized> ResultWriter for &mut W {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        (**self).write(read, result)
    }

    fn finish(&mut self) -> Result<(), Error> {
        (**self).finish()
    }
}

impl<W: ResultWriter + ?Sized> ResultWriter for Box<W> {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        (**self).write(read, result)
    }

    fn finish(&mut self) -> Result<(), Error> {
        (**self).finish()
    }
}

/// FASTA writer, switching to FASTQ records for results with a quality string.
pub struct SequenceWriter<W: Write> {
    inner: W,
    path: PathBuf,
}

impl SequenceWriter<BufWriter<File>> {
    /// Create a sequence file at `path`.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::io(e, path))?;
        Ok(Self {
            inner: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }
}

impl<W: Write> SequenceWriter<W> {
    /// Wrap an arbitrary byte sink (stdout, an in-memory buffer).
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            path: PathBuf::from("<stream>"),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    fn write_record(&mut self, read: &Read, result: &BasecallResult) -> std::io::Result<()> {
        let name = read.read_id.as_bytes().to_vec();
        let sequence = result.sequence.as_bytes().to_vec();

        match &result.qstring {
            Some(qstring) => {
                let definition = fastq::record::Definition::new(name, Vec::new());
                let quality_scores = qstring.as_bytes().to_vec();
                let record = fastq::Record::new(definition, sequence, quality_scores);
                fastq::io::Writer::new(&mut self.inner).write_record(&record)
            }
            None => {
                // One sequence line per record, no wrapping
                let line_base_count = sequence.len().max(1);
                let definition = fasta::record::Definition::new(name, None);
                let record =
                    fasta::Record::new(definition, fasta::record::Sequence::from(sequence));
                fasta::io::writer::Builder::default()
                    .set_line_base_count(line_base_count)
                    .build_from_writer(&mut self.inner)
                    .write_record(&record)
            }
        }
    }
}

impl<W: Write> ResultWriter for SequenceWriter<W> {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        self.write_record(read, result)
            .map_err(|e| Error::io(e, &self.path))
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.inner.flush().map_err(|e| Error::io(e, &self.path))
    }
}

/// Record writer with an optional per-read summary alongside.
pub struct MultiWriter<R, S> {
    pub records: R,
    pub summary: Option<S>,
}

impl<R: ResultWriter, S: ResultWriter> MultiWriter<R, S> {
    pub fn new(records: R, summary: Option<S>) -> Self {
        Self { records, summary }
    }
}

impl<R: ResultWriter, S: ResultWriter> ResultWriter for MultiWriter<R, S> {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        self.records.write(read, result)?;
        if let Some(summary) = self.summary.as_mut() {
            summary.write(read, result)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        let records = self.records.finish();
        let summary = match self.summary.as_mut() {
            Some(summary) => summary.finish(),
            None => Ok(()),
        };
        records.and(summary)
    }
}
