pub mod error;
pub mod params;
pub mod stats;

pub mod decode;
pub mod io;
pub mod mapping;
pub mod pipeline;
pub mod score;
pub mod signal;

use log::info;

use crate::io::writer::ResultWriter;
use crate::mapping::Mapper;
use crate::params::Parameters;
use crate::pipeline::Basecaller;
use crate::score::ScoringOracle;
use crate::signal::Read;
use crate::stats::BasecallStats;

/// Top-level entry point for a front end that has parsed `Parameters`,
/// loaded a scoring model and opened its reads and output.
pub fn run<O, I, W>(
    params: &Parameters,
    oracle: O,
    reads: I,
    mapper: Option<&dyn Mapper>,
    writer: &mut W,
) -> anyhow::Result<BasecallStats>
where
    O: ScoringOracle,
    I: IntoIterator<Item = Read>,
    I::IntoIter: Send,
    W: ResultWriter + ?Sized,
{
    info!("rucall v{}", env!("CARGO_PKG_VERSION"));
    info!("chunksize: {}, overlap: {}", params.chunksize, params.overlap);
    info!("batchsize: {}, scale: {}", params.batchsize, params.scale);
    info!("beamsize: {}, beamcut: {}", params.beamsize, params.beamcut);
    info!(
        "maxReadSize: {}, skipReadSize: {}",
        params.max_read_size, params.skip_read_size
    );
    info!(
        "reverse: {}, qscores: {}, trimSites: {}",
        params.reverse, params.qscores, params.trim_sites
    );
    info!("decodeThreads: {}", params.decode_threads);

    let mut basecaller = Basecaller::new(params.clone());
    if let Some(mapper) = mapper {
        basecaller = basecaller.with_mapper(mapper);
    }
    let stats = basecaller.run(oracle, reads, writer)?;

    stats.print_summary();
    Ok(stats)
}
