/// Threaded basecalling pipeline: chunk, score, stitch, decode, regroup, write
pub mod dispatch;
pub mod regroup;

pub use dispatch::{unbatch, Batch, Batcher, ChunkCollector};
pub use regroup::{OrderedEmitter, SubReadAssembler};

use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::decode::{
    path_to_sequence, BasecallResult, BeamSearch, DecodedSubRead, ReadFinisher, SignalAligner,
};
use crate::error::Error;
use crate::io::writer::ResultWriter;
use crate::mapping::Mapper;
use crate::params::Parameters;
use crate::score::crf::ALPHABET;
use crate::score::quantize::QuantizedBatch;
use crate::score::{
    dequantize, CrfGraph, QuantizedBundle, Quantizer, ScoreBatch, ScoreBundle, ScoreMatrix,
    ScoringOracle, SignalBatch, Stitcher, TransferBuffer,
};
use crate::signal::{chunk_read, split_read, Read, ReadGate, SubRead};
use crate::stats::BasecallStats;

/// Producer -> scorer
enum DispatchMsg {
    Batch(Batch),
    /// Sub-read without samples; bypasses the oracle
    Empty(Arc<SubRead>),
}

/// Scorer -> stitcher
enum HostMsg {
    Scored { batch: Batch, scores: QuantizedBatch },
    Empty(Arc<SubRead>),
}

/// Stitcher -> decoders
struct StitchedSubRead {
    sub_read: Arc<SubRead>,
    scores: QuantizedBundle,
}

/// Decoders -> consumer
struct CompletedRead {
    parent: u64,
    read: Arc<Read>,
    result: BasecallResult,
}

/// Pipeline orchestrator
pub struct Basecaller<'a> {
    params: Parameters,
    mapper: Option<&'a dyn Mapper>,
}

impl<'a> Basecaller<'a> {
    pub fn new(params: Parameters) -> Self {
        Self { params, mapper: None }
    }

    /// Map every basecall with `mapper` (needed for SAM output and trim sites)
    pub fn with_mapper(mut self, mapper: &'a dyn Mapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Basecall `reads` with `oracle`, handing results to `writer` in input order.
    ///
    /// The oracle is moved into a dedicated scoring thread. Reads that decode to
    /// an empty sequence are logged and not written. `writer.finish()` is called
    /// exactly once, also when a stage fails; results completed before the
    /// failure are written first.
    pub fn run<O, I, W>(&self, oracle: O, reads: I, writer: &mut W) -> Result<BasecallStats, Error>
    where
        O: ScoringOracle,
        I: IntoIterator<Item = Read>,
        I::IntoIter: Send,
        W: ResultWriter + ?Sized,
    {
        let stride = oracle.stride();
        if let Err(e) = self.params.validate(stride) {
            // nothing was written, but the writer still gets closed
            writer.finish()?;
            return Err(e);
        }
        let graph = oracle.graph();
        let params = &self.params;
        let reads = reads.into_iter();

        let keep_scores = params.trim_sites && self.mapper.is_some();
        if params.trim_sites && self.mapper.is_none() {
            warn!("trim sites need a reference mapper; trim positions will not be reported");
        }
        let beam = BeamSearch::new(graph, params.beamsize, params.beamcut);
        let finisher = ReadFinisher {
            qscores: params.qscores,
            trim_sites: params.trim_sites,
            reverse: params.reverse,
            mapper: self.mapper,
            aligner: SignalAligner::new(graph, stride),
        };
        let assembler = SubReadAssembler::new();

        let capacity = params.queue_capacity;
        let (batch_tx, batch_rx) = bounded::<DispatchMsg>(capacity);
        let (host_tx, host_rx) = bounded::<HostMsg>(capacity);
        let (stitched_tx, stitched_rx) = bounded::<StitchedSubRead>(capacity);
        let (done_tx, done_rx) = bounded::<CompletedRead>(capacity);

        let outcome = thread::scope(|scope| {
            let producer = scope.spawn(move || produce_batches(params, reads, batch_tx));
            let scorer = scope.spawn(move || {
                score_batches(oracle, params, graph, stride, batch_rx, host_tx)
            });
            let stitcher = scope.spawn(move || {
                stitch_chunks(params, graph, stride, host_rx, stitched_tx)
            });

            let decoders: Vec<_> = (0..params.decode_threads)
                .map(|_| {
                    let rx = stitched_rx.clone();
                    let tx = done_tx.clone();
                    let (beam, finisher, assembler) = (&beam, &finisher, &assembler);
                    scope.spawn(move || {
                        decode_sub_reads(beam, finisher, assembler, keep_scores, rx, tx)
                    })
                })
                .collect();
            drop(stitched_rx);
            drop(done_tx);

            let mut consumer_stats = BasecallStats::new();
            let written = consume(&mut *writer, &done_rx, &mut consumer_stats);
            drop(done_rx);

            let produced = join(producer, "producer");
            let scored = join(scorer, "scorer").and_then(|r| r);
            let stitched = join(stitcher, "stitcher").and_then(|r| r);
            let decoded = decoders
                .into_iter()
                .map(|h| join(h, "decoder"))
                .collect::<Result<Vec<()>, Error>>();

            scored.and_then(|scorer_stats| {
                let mut stats = produced?;
                stitched?;
                decoded?;
                written?;
                stats.merge(&scorer_stats);
                stats.merge(&consumer_stats);
                Ok(stats)
            })
        });

        let finished = writer.finish();
        let stats = outcome?;
        finished?;

        if stats.reads != stats.written + stats.empty {
            return Err(Error::Pipeline(format!(
                "{} reads admitted but {} written and {} empty",
                stats.reads, stats.written, stats.empty
            )));
        }
        info!(
            "Basecalled {} reads ({} sub-reads, {} batches)",
            stats.reads, stats.sub_reads, stats.batches
        );
        Ok(stats)
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>, stage: &str) -> Result<T, Error> {
    handle
        .join()
        .map_err(|_| Error::Pipeline(format!("{} thread panicked", stage)))
}

/// Gate, split and chunk reads, grouping chunks into batches.
fn produce_batches<I: Iterator<Item = Read>>(
    params: &Parameters,
    reads: I,
    tx: Sender<DispatchMsg>,
) -> BasecallStats {
    let gate = ReadGate::new(params.skip_read_size);
    let mut batcher = Batcher::new(params.batchsize);
    let mut stats = BasecallStats::new();
    let mut parent = 0u64;

    for read in reads {
        if !gate.admit(&read) {
            stats.too_long += 1;
            continue;
        }
        let read = Arc::new(read);
        let sub_reads = split_read(&read, parent, params.max_read_size, params.reverse);
        stats.record_read(read.len(), sub_reads.len());
        parent += 1;

        for sub_read in sub_reads {
            let sub_read = Arc::new(sub_read);
            let chunks = chunk_read(&sub_read, params.chunksize, params.overlap);
            if chunks.is_empty() {
                if tx.send(DispatchMsg::Empty(sub_read)).is_err() {
                    return stats;
                }
                continue;
            }
            for chunk in chunks {
                if let Some(batch) = batcher.push(chunk) {
                    if tx.send(DispatchMsg::Batch(batch)).is_err() {
                        return stats;
                    }
                }
            }
        }
    }

    if let Some(batch) = batcher.flush() {
        let _ = tx.send(DispatchMsg::Batch(batch));
    }
    debug!("producer admitted {} reads", stats.reads);
    stats
}

/// Run the oracle on each batch, quantize and copy the scores to the host.
fn score_batches<O: ScoringOracle>(
    mut oracle: O,
    params: &Parameters,
    graph: CrfGraph,
    stride: usize,
    rx: Receiver<DispatchMsg>,
    tx: Sender<HostMsg>,
) -> Result<BasecallStats, Error> {
    let quantizer = Quantizer::new(params.scale);
    let staging = TransferBuffer::new();
    let n_time = params.chunksize / stride;
    let mut stats = BasecallStats::new();

    for msg in rx {
        let out = match msg {
            DispatchMsg::Empty(sub_read) => HostMsg::Empty(sub_read),
            DispatchMsg::Batch(batch) => {
                let signal = SignalBatch::from_chunks(&batch.chunks, params.chunksize);
                let raw = oracle.score(&signal, params.reverse)?;
                check_shape(&raw, batch.len(), n_time, &graph)?;
                let scores = staging.transfer(quantizer.quantize_batch(&raw))?;
                stats.batches += 1;
                stats.chunks += batch.len() as u64;
                HostMsg::Scored { batch, scores }
            }
        };
        if tx.send(out).is_err() {
            break;
        }
    }
    debug!("scorer finished after {} batches", staging.completed());
    Ok(stats)
}

fn check_shape(
    scores: &ScoreBatch<f32>,
    n_batch: usize,
    n_time: usize,
    graph: &CrfGraph,
) -> Result<(), Error> {
    if scores.n_batch != n_batch
        || scores.n_time != n_time
        || scores.n_scores != graph.n_scores()
        || scores.n_states != graph.n_states()
    {
        return Err(Error::Oracle(format!(
            "oracle returned shape (T={}, N={}, C={}, S={}), expected (T={}, N={}, C={}, S={})",
            scores.n_time,
            scores.n_batch,
            scores.n_scores,
            scores.n_states,
            n_time,
            n_batch,
            graph.n_scores(),
            graph.n_states()
        )));
    }
    Ok(())
}

/// Split batches back into chunks and stitch each sub-read once complete.
fn stitch_chunks(
    params: &Parameters,
    graph: CrfGraph,
    stride: usize,
    rx: Receiver<HostMsg>,
    tx: Sender<StitchedSubRead>,
) -> Result<(), Error> {
    let stitcher = Stitcher::new(params.chunksize, params.overlap, stride, params.reverse);
    let mut collector = ChunkCollector::new();

    for msg in rx {
        match msg {
            HostMsg::Empty(sub_read) => {
                let scores = QuantizedBundle {
                    bundle: ScoreBundle {
                        scores: ScoreMatrix::empty(graph.n_scores()),
                        betas: ScoreMatrix::from_vec(vec![0; graph.n_states()], graph.n_states()),
                    },
                    scale: params.scale,
                };
                if tx.send(StitchedSubRead { sub_read, scores }).is_err() {
                    return Ok(());
                }
            }
            HostMsg::Scored { batch, scores } => {
                let scale = scores.scale;
                for (chunk, bundle) in unbatch(batch, &scores, stride, params.reverse)? {
                    let Some((sub_read, bundles)) = collector.add(chunk, bundle) else {
                        continue;
                    };
                    let stitched = stitcher.stitch(&bundles)?;
                    let expected = stitcher.steps(sub_read.len());
                    if stitched.len() != expected {
                        return Err(Error::Pipeline(format!(
                            "sub-read {} of {} stitched to {} steps, expected {}",
                            sub_read.tag.index,
                            sub_read.read.read_id,
                            stitched.len(),
                            expected
                        )));
                    }
                    let scores = QuantizedBundle {
                        bundle: stitched,
                        scale,
                    };
                    if tx.send(StitchedSubRead { sub_read, scores }).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    if !collector.is_empty() {
        return Err(Error::Pipeline(format!(
            "{} sub-reads still waiting for chunks at end of input",
            collector.len()
        )));
    }
    Ok(())
}

/// Decode worker: beam search per sub-read, then finish reads whose parts are all in.
fn decode_sub_reads(
    beam: &BeamSearch,
    finisher: &ReadFinisher<'_>,
    assembler: &SubReadAssembler,
    keep_scores: bool,
    rx: Receiver<StitchedSubRead>,
    tx: Sender<CompletedRead>,
) {
    for StitchedSubRead { sub_read, scores } in rx {
        let scores = dequantize(&scores);
        let path = beam.decode(&scores);
        let sequence = path_to_sequence(&path.path, beam.graph.n_base, ALPHABET);
        let part = DecodedSubRead {
            tag: sub_read.tag,
            sequence,
            scores: keep_scores.then_some(scores.scores),
        };

        let Some(parts) = assembler.add(part) else {
            continue;
        };
        let done = CompletedRead {
            parent: sub_read.tag.parent,
            read: Arc::clone(&sub_read.read),
            result: finisher.finish(parts),
        };
        if tx.send(done).is_err() {
            return;
        }
    }
}

/// Restore admission order and hand results to the writer.
///
/// Keeps receiving until every decoder is done; on a write error stops and
/// returns it, dropping whatever is still in flight.
fn consume<W: ResultWriter + ?Sized>(
    writer: &mut W,
    rx: &Receiver<CompletedRead>,
    stats: &mut BasecallStats,
) -> Result<(), Error> {
    let mut emitter = OrderedEmitter::new();
    for done in rx {
        let ready = emitter.push(done.parent, done);
        emit(writer, ready, stats)?;
    }
    // gaps left by a failed stage
    emit(writer, emitter.drain(), stats)
}

fn emit<W: ResultWriter + ?Sized>(
    writer: &mut W,
    ready: Vec<CompletedRead>,
    stats: &mut BasecallStats,
) -> Result<(), Error> {
    for done in ready {
        if done.result.is_empty() {
            warn!("> skipping empty sequence {}", done.read.read_id);
            stats.empty += 1;
            continue;
        }
        writer.write(&done.read, &done.result)?;
        stats.record_written(done.result.sequence.len(), done.result.mapping.is_some());
    }
    Ok(())
}
