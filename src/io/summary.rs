/// Per-read summary table (tab-separated, one row per written read)
///
/// Columns:
/// 1. filename
/// 2. read_id
/// 3. run_id
/// 4. channel
/// 5. mux
/// 6. start_time
/// 7. duration
/// 8. template_start
/// 9. template_duration
/// 10. sequence_length_template
/// 11. mean_qscore_template
use crate::decode::BasecallResult;
use crate::error::Error;
use crate::io::writer::ResultWriter;
use crate::signal::Read;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Summary column names in output order
pub const SUMMARY_COLUMNS: [&str; 11] = [
    "filename",
    "read_id",
    "run_id",
    "channel",
    "mux",
    "start_time",
    "duration",
    "template_start",
    "template_duration",
    "sequence_length_template",
    "mean_qscore_template",
];

/// Summary TSV writer
pub struct SummaryWriter<W: Write> {
    inner: W,
    path: PathBuf,
    rows: u64,
}

impl SummaryWriter<BufWriter<File>> {
    /// Create the summary file and write its header line
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::io(e, path))?;
        let mut writer = Self {
            inner: BufWriter::new(file),
            path: path.to_path_buf(),
            rows: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }
}

impl<W: Write> SummaryWriter<W> {
    /// Wrap a byte sink and write the header line
    pub fn new(inner: W) -> Result<Self, Error> {
        let mut writer = Self {
            inner,
            path: PathBuf::from("<stream>"),
            rows: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> Result<(), Error> {
        writeln!(self.inner, "{}", SUMMARY_COLUMNS.join("\t")).map_err(|e| Error::io(e, &self.path))
    }

    /// Data rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> ResultWriter for SummaryWriter<W> {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        writeln!(
            self.inner,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.6}",
            read.filename,
            read.read_id,
            read.run_id,
            read.channel,
            read.mux,
            read.start,
            read.duration,
            read.template_start,
            read.template_duration,
            result.sequence.len(),
            result.mean_qscore
        )
        .map_err(|e| Error::io(e, &self.path))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.inner.flush().map_err(|e| Error::io(e, &self.path))
    }
}
