/// End-to-end pipeline tests driven by a deterministic scoring model
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};

use rucall::decode::BasecallResult;
use rucall::error::Error;
use rucall::io::{MultiWriter, ResultWriter, SamWriter, SequenceWriter, SummaryWriter};
use rucall::mapping::{Mapper, Mapping, Strand};
use rucall::params::Parameters;
use rucall::pipeline::Basecaller;
use rucall::score::{CrfGraph, ScoreBatch, ScoreBundle, ScoreMatrix, ScoringOracle, SignalBatch};
use rucall::signal::Read;
use tempfile::TempDir;

const STRIDE: usize = 2;

/// Model whose signal spells out the call: one step at level 1..=4 moves
/// into A/C/G/T, level 0 stays.
struct LevelOracle {
    graph: CrfGraph,
    calls: usize,
    fail_on: Option<usize>,
}

impl LevelOracle {
    fn new() -> Self {
        Self {
            graph: CrfGraph::new(4, 1),
            calls: 0,
            fail_on: None,
        }
    }

    fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::new()
        }
    }

    fn emissions(&self, window: &[f32], reverse: bool) -> ScoreMatrix<f32> {
        let n_time = window.len() / STRIDE;
        let n_base = self.graph.n_base;
        let n_scores = self.graph.n_scores();
        let mut data = Vec::with_capacity(n_time * n_scores);
        for t in 0..n_time {
            let src = if reverse { n_time - 1 - t } else { t };
            let level = window[src * STRIDE].round() as usize;
            let base = match level {
                0 => None,
                l if reverse => Some(n_base - l),
                l => Some(l - 1),
            };
            for column in 0..n_scores {
                let state = column / (n_base + 1);
                let stay = column % (n_base + 1) == 0;
                data.push(match base {
                    None if stay => 2.0,
                    Some(b) if !stay && state == b => 4.0,
                    _ => -4.0,
                });
            }
        }
        ScoreMatrix::from_vec(data, n_scores)
    }
}

impl ScoringOracle for LevelOracle {
    fn stride(&self) -> usize {
        STRIDE
    }

    fn graph(&self) -> CrfGraph {
        self.graph
    }

    fn score(&mut self, batch: &SignalBatch, reverse: bool) -> Result<ScoreBatch<f32>, Error> {
        self.calls += 1;
        if self.fail_on == Some(self.calls) {
            return Err(Error::Oracle("device lost".into()));
        }
        let bundles: Vec<ScoreBundle<f32>> = (0..batch.n_batch())
            .map(|slot| {
                let scores = self.emissions(batch.window(slot), reverse);
                let betas = self.graph.backward_scores(&scores);
                ScoreBundle { scores, betas }
            })
            .collect();
        ScoreBatch::from_bundles(&bundles)
    }
}

/// Scores through `LevelOracle`, counting calls where the test can see them.
struct CountingOracle {
    inner: LevelOracle,
    calls: Arc<AtomicUsize>,
}

impl ScoringOracle for CountingOracle {
    fn stride(&self) -> usize {
        self.inner.stride()
    }

    fn graph(&self) -> CrfGraph {
        self.inner.graph()
    }

    fn score(&mut self, batch: &SignalBatch, reverse: bool) -> Result<ScoreBatch<f32>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.score(batch, reverse)
    }
}

/// Signal for `sequence`: a move step then two stay steps per base.
fn encode(sequence: &str) -> Vec<f32> {
    let mut signal = Vec::with_capacity(sequence.len() * 3 * STRIDE);
    for b in sequence.bytes() {
        let level = match b {
            b'A' => 1.0,
            b'C' => 2.0,
            b'G' => 3.0,
            b'T' => 4.0,
            _ => panic!("unexpected base {}", b as char),
        };
        signal.extend(std::iter::repeat(level).take(STRIDE));
        signal.extend(std::iter::repeat(0.0).take(2 * STRIDE));
    }
    signal
}

fn reverse_complement(sequence: &str) -> String {
    sequence
        .bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            _ => 'A',
        })
        .collect()
}

const SEQUENCES: [&str; 6] = [
    "ACGTTGCAAC",
    "GATTACA",
    "TTGCACGTAGGCTAACGTTAGC",
    "CAGT",
    "AGCTTAGGCATCGATCGGATCCTAGCTAGCATCGA",
    "GGGCCCAAATTT",
];

fn reads() -> Vec<Read> {
    SEQUENCES
        .iter()
        .enumerate()
        .map(|(i, s)| Read::new(format!("read{}", i), encode(s)))
        .collect()
}

fn params() -> Parameters {
    Parameters {
        chunksize: 24,
        overlap: 8,
        batchsize: 3,
        decode_threads: 3,
        queue_capacity: 2,
        ..Parameters::default()
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory writer recording every call.
#[derive(Default)]
struct Collect {
    results: Vec<(String, BasecallResult)>,
    finished: usize,
    fail_on_write: Option<usize>,
}

impl ResultWriter for Collect {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        if self.fail_on_write == Some(self.results.len()) {
            return Err(Error::Output("disk full".into()));
        }
        self.results.push((read.read_id.clone(), result.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.finished += 1;
        Ok(())
    }
}

/// Holds its first write until the gate opens.
struct GatedWriter {
    gate: Receiver<()>,
    opened: bool,
    inner: Collect,
}

impl ResultWriter for GatedWriter {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        if !self.opened {
            let _ = self.gate.recv();
            self.opened = true;
        }
        self.inner.write(read, result)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.inner.finish()
    }
}

impl Collect {
    fn sequences(&self) -> Vec<&str> {
        self.results.iter().map(|(_, r)| r.sequence.as_str()).collect()
    }

    fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// Reports every read found in `reference` with two bases clipped at each end.
struct ClipMapper {
    reference: String,
}

impl Mapper for ClipMapper {
    fn map(&self, sequence: &str) -> Vec<Mapping> {
        let Some(pos) = self.reference.find(sequence) else {
            return Vec::new();
        };
        let len = sequence.len();
        vec![Mapping {
            ctg: "chr1".into(),
            r_st: pos + 2,
            r_en: pos + len - 2,
            q_st: 2,
            q_en: len - 2,
            strand: Strand::Forward,
            cigar: format!("{}M", len - 4),
            nm: 0,
            mapq: 60,
        }]
    }

    fn reference_sequences(&self) -> Vec<(String, usize)> {
        vec![("chr1".into(), self.reference.len())]
    }
}

/// Maps every call with a fixed query range.
struct RangeMapper {
    q_st: usize,
    q_en: usize,
}

impl Mapper for RangeMapper {
    fn map(&self, sequence: &str) -> Vec<Mapping> {
        vec![Mapping {
            ctg: "chr1".into(),
            r_st: 0,
            r_en: sequence.len(),
            q_st: self.q_st,
            q_en: self.q_en,
            strand: Strand::Forward,
            cigar: format!("{}M", sequence.len()),
            nm: 0,
            mapq: 60,
        }]
    }

    fn reference_sequences(&self) -> Vec<(String, usize)> {
        vec![("chr1".into(), 1000)]
    }
}

#[test]
fn test_calls_follow_signal_in_input_order() {
    init_logger();
    let mut writer = Collect::default();
    let stats = Basecaller::new(params())
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap();

    assert_eq!(writer.sequences(), SEQUENCES.to_vec());
    assert_eq!(
        writer.ids(),
        vec!["read0", "read1", "read2", "read3", "read4", "read5"]
    );
    assert_eq!(writer.finished, 1);
    assert_eq!(stats.reads, 6);
    assert_eq!(stats.written, 6);
    assert_eq!(stats.empty, 0);
    let bases: usize = SEQUENCES.iter().map(|s| s.len()).sum();
    assert_eq!(stats.bases, bases as u64);
    assert_eq!(stats.sub_reads, 6);
    assert!(stats.chunks >= 6);
}

#[test]
fn test_single_worker_small_queues() {
    init_logger();
    let p = Parameters {
        decode_threads: 1,
        queue_capacity: 1,
        batchsize: 1,
        ..params()
    };
    let mut writer = Collect::default();
    Basecaller::new(p)
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap();
    assert_eq!(writer.sequences(), SEQUENCES.to_vec());
}

#[test]
fn test_stalled_writer_stops_scoring() {
    init_logger();
    let p = Parameters {
        batchsize: 1,
        decode_threads: 2,
        queue_capacity: 2,
        ..params()
    };
    // three bases fit one chunk, so every batch is one read
    let sequences: Vec<String> = (0..120usize)
        .map(|i| (0..3).map(|d| b"ACGT"[(i >> (2 * d)) & 3] as char).collect())
        .collect();
    let input: Vec<Read> = sequences
        .iter()
        .enumerate()
        .map(|(i, s)| Read::new(format!("r{}", i), encode(s)))
        .collect();
    // queued in the three downstream channels, held by the scorer, stitcher,
    // consumer and each decoder, plus completions parked in the reorder buffer
    let bound = p.batchsize * (3 * p.queue_capacity + 2 * p.decode_threads + 4);
    assert!(bound < input.len());

    let calls = Arc::new(AtomicUsize::new(0));
    let oracle = CountingOracle {
        inner: LevelOracle::new(),
        calls: Arc::clone(&calls),
    };
    let (open_tx, open_rx) = bounded(1);
    let writer = thread::scope(|scope| {
        let run = scope.spawn(move || {
            let mut writer = GatedWriter {
                gate: open_rx,
                opened: false,
                inner: Collect::default(),
            };
            let stats = Basecaller::new(p).run(oracle, input, &mut writer);
            (stats, writer)
        });

        thread::sleep(Duration::from_millis(300));
        let stalled = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        let later = calls.load(Ordering::SeqCst);

        // open before asserting so a failure cannot leave the run blocked
        open_tx.send(()).unwrap();
        assert!(stalled > 0);
        assert!(stalled <= bound, "{} batches scored past a blocked writer", stalled);
        assert_eq!(later, stalled);

        let (stats, writer) = run.join().unwrap();
        assert_eq!(stats.unwrap().written, sequences.len() as u64);
        writer
    });

    assert_eq!(calls.load(Ordering::SeqCst), sequences.len());
    let expected_ids: Vec<String> = (0..sequences.len()).map(|i| format!("r{}", i)).collect();
    assert_eq!(writer.inner.ids(), expected_ids);
    assert_eq!(writer.inner.sequences(), sequences);
    assert_eq!(writer.inner.finished, 1);
}

#[test]
fn test_split_reads_rejoin() {
    init_logger();
    let p = Parameters {
        max_read_size: 40,
        ..params()
    };
    let mut writer = Collect::default();
    let stats = Basecaller::new(p)
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap();

    assert_eq!(writer.sequences(), SEQUENCES.to_vec());
    let expected: usize = SEQUENCES
        .iter()
        .map(|s| (s.len() * 3 * STRIDE).div_ceil(40))
        .sum();
    assert_eq!(stats.sub_reads, expected as u64);
    assert!(stats.sub_reads > stats.reads);
}

#[test]
fn test_reverse_calls_reverse_complement() {
    init_logger();
    for max_read_size in [400_000, 40] {
        let p = Parameters {
            reverse: true,
            max_read_size,
            ..params()
        };
        let mut writer = Collect::default();
        Basecaller::new(p)
            .run(LevelOracle::new(), reads(), &mut writer)
            .unwrap();
        let expected: Vec<String> = SEQUENCES.iter().map(|s| reverse_complement(s)).collect();
        assert_eq!(writer.sequences(), expected);
    }
}

#[test]
fn test_empty_and_too_long_reads_are_skipped() {
    init_logger();
    let p = Parameters {
        skip_read_size: 100,
        ..params()
    };
    let input = vec![
        Read::new("short", encode("ACGT")),
        Read::new("no-signal", Vec::new()),
        Read::new("flat", vec![0.0; 60]),
        Read::new("too-long", encode("ACGTACGTACGTACGTACGT")),
        Read::new("last", encode("TGCA")),
    ];
    let mut writer = Collect::default();
    let stats = Basecaller::new(p)
        .run(LevelOracle::new(), input, &mut writer)
        .unwrap();

    assert_eq!(writer.ids(), vec!["short", "last"]);
    assert_eq!(writer.sequences(), vec!["ACGT", "TGCA"]);
    assert_eq!(stats.reads, 4);
    assert_eq!(stats.too_long, 1);
    assert_eq!(stats.empty, 2);
    assert_eq!(stats.written, 2);
}

#[test]
fn test_trim_sites_and_mapping() {
    init_logger();
    let mapper = ClipMapper {
        reference: format!("TTTT{}TTTT", SEQUENCES[0]),
    };
    let p = Parameters {
        trim_sites: true,
        ..params()
    };
    let mut writer = Collect::default();
    let stats = Basecaller::new(p)
        .with_mapper(&mapper)
        .run(LevelOracle::new(), reads().into_iter().take(2), &mut writer)
        .unwrap();

    let (_, mapped) = &writer.results[0];
    let mapping = mapped.mapping.as_ref().unwrap();
    assert_eq!(mapping.r_st, 6);
    assert_eq!(mapping.q_en, 8);
    // 10 bases, 3 steps each: q_st=2 is first occupied at step 7, q_en=8 last at step 27
    assert_eq!(mapped.trim_positions, Some((14, 54)));

    let (_, unmapped) = &writer.results[1];
    assert!(unmapped.mapping.is_none());
    assert_eq!(unmapped.trim_positions, Some((-1, -1)));
    assert_eq!(stats.mapped, 1);
}

#[test]
fn test_reverse_trim_sites_in_forward_coordinates() {
    init_logger();
    let trim = |reverse: bool, q_st: usize, q_en: usize| {
        let mapper = RangeMapper { q_st, q_en };
        let p = Parameters {
            trim_sites: true,
            reverse,
            ..params()
        };
        let mut writer = Collect::default();
        Basecaller::new(p)
            .with_mapper(&mapper)
            .run(LevelOracle::new(), reads().into_iter().take(1), &mut writer)
            .unwrap();
        writer.results[0].1.trim_positions.unwrap()
    };

    // bases 1..4 of ACGTTGCAAC are positions 5..8 of its reverse complement
    let forward = trim(false, 1, 4);
    let reverse = trim(true, 5, 8);
    assert_eq!(forward, (8, 30));
    // measured from the read's start, not its end (36, 58)
    assert_eq!(reverse, (2, 24));
    // the step-before-transition convention moves each boundary by at most a base
    let base = 3 * STRIDE as i64;
    assert!((forward.0 - reverse.0).abs() <= base);
    assert!((forward.1 - reverse.1).abs() <= base);
}

#[test]
fn test_trim_sites_without_mapper_are_not_reported() {
    init_logger();
    let p = Parameters {
        trim_sites: true,
        ..params()
    };
    let mut writer = Collect::default();
    Basecaller::new(p)
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap();
    assert!(writer.results.iter().all(|(_, r)| r.trim_positions.is_none()));
}

#[test]
fn test_sam_output() {
    init_logger();
    let mapper = ClipMapper {
        reference: format!("TTTT{}TTTT", SEQUENCES[0]),
    };
    let mut writer = SamWriter::new(Vec::new(), &mapper.reference_sequences()).unwrap();
    Basecaller::new(params())
        .with_mapper(&mapper)
        .run(LevelOracle::new(), reads().into_iter().take(2), &mut writer)
        .unwrap();

    let text = String::from_utf8(writer.get_ref().clone()).unwrap();
    assert!(text.contains("@SQ\tSN:chr1\tLN:18"));
    let records: Vec<Vec<&str>> = text
        .lines()
        .filter(|l| !l.starts_with('@'))
        .map(|l| l.split('\t').collect())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][..6], &["read0", "0", "chr1", "7", "60", "2S6M2S"]);
    assert_eq!(records[0][9], SEQUENCES[0]);
    assert_eq!(records[1][1], "4");
    assert_eq!(records[1][9], SEQUENCES[1]);
}

#[test]
fn test_fastq_and_summary_files() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let fastq = dir.path().join("calls.fastq");
    let summary = dir.path().join("summary.tsv");
    let mut writer = MultiWriter::new(
        SequenceWriter::create(&fastq).unwrap(),
        Some(SummaryWriter::create(&summary).unwrap()),
    );
    let p = Parameters {
        qscores: true,
        ..params()
    };
    Basecaller::new(p)
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap();

    let text = fs::read_to_string(&fastq).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4 * SEQUENCES.len());
    assert_eq!(lines[0], "@read0");
    assert_eq!(lines[1], SEQUENCES[0]);
    assert_eq!(lines[2], "+");
    assert_eq!(lines[3], "?".repeat(SEQUENCES[0].len()));

    let table = fs::read_to_string(&summary).unwrap();
    let rows: Vec<Vec<&str>> = table.lines().skip(1).map(|l| l.split('\t').collect()).collect();
    assert_eq!(rows.len(), SEQUENCES.len());
    for (row, sequence) in rows.iter().zip(SEQUENCES) {
        assert_eq!(row[9], sequence.len().to_string());
        // placeholder qualities carry no estimate
        assert_eq!(row[10], "0.000000");
    }
}

#[test]
fn test_oracle_failure_still_finishes_writer() {
    init_logger();
    let p = Parameters {
        batchsize: 1,
        ..params()
    };
    let mut writer = Collect::default();
    let err = Basecaller::new(p)
        .run(LevelOracle::failing_on(4), reads(), &mut writer)
        .unwrap_err();

    assert!(matches!(err, Error::Oracle(_)));
    assert_eq!(writer.finished, 1);
    // whatever was written is a correct prefix
    let written = writer.sequences();
    assert_eq!(written, SEQUENCES[..written.len()].to_vec());
}

#[test]
fn test_writer_failure_stops_run() {
    init_logger();
    let mut writer = Collect {
        fail_on_write: Some(2),
        ..Collect::default()
    };
    let err = Basecaller::new(params())
        .run(LevelOracle::new(), reads(), &mut writer)
        .unwrap_err();

    assert!(matches!(err, Error::Output(_)));
    assert_eq!(writer.results.len(), 2);
    assert_eq!(writer.finished, 1);
}

#[test]
fn test_run_entry_point() {
    init_logger();
    let mut writer = SequenceWriter::new(Vec::new());
    let stats = rucall::run(&params(), LevelOracle::new(), reads(), None, &mut writer).unwrap();
    assert_eq!(stats.written, SEQUENCES.len() as u64);

    let text = String::from_utf8(writer.get_ref().clone()).unwrap();
    assert!(text.starts_with(">read0\nACGTTGCAAC\n"));
}
