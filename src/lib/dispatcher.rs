//! Running a split: worker threads, work-unit assignment and the run summary.
//!
//! ```text
//! Idle ──> LoadingHeader ──> Dispatching ──> Draining ──> Closed
//!   └───────────┴──────────────────┴─────────────┴──────────> Closed (fatal error)
//! ```
//!
//! The [`Dispatcher`] validates its [`SplitConfig`], decodes the input header, plans work units
//! (one per requested thread, when the input is large enough) and feeds them through a channel
//! to a fixed set of scoped worker threads. Each worker reads its unit in file order, routes every
//! record and appends the re-encoded bytes to the shared [`WriterPool`]. When the channel is
//! exhausted the pool is drained and a [`RunSummary`] is returned.
//!
//! Failures are tiered:
//!
//! - an undecodable record is skipped and counted;
//! - a truncated or corrupt block ends its work unit, which is recorded in
//!   [`RunSummary::failed_units`];
//! - a write failure fails its group, whose later records are counted as dropped;
//! - a fatal error (e.g. [`SplitError::Resource`]) stops dispatch, the pool is drained and the
//!   error is returned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use log::{debug, warn};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use parking_lot::Mutex;

use crate::bam_io::{RecordEncoder, encode_header, read_input_header};
use crate::barcode_map::BarcodeMap;
use crate::chunk::{WorkUnit, plan_work_units};
use crate::errors::{Result, SplitError};
use crate::logging::{OperationTimer, ProgressTracker};
use crate::record_reader::{ReadOutcome, UnitReader};
use crate::router::{RouteKind, Router};
use crate::validation::{prepare_output_dir, validate_at_least, validate_input_file, validate_range};
use crate::writer_pool::{AppendOutcome, DEFAULT_MAX_OPEN_FILES, GroupReport, PoolOptions, WriterPool};

/// Default BGZF compression level for outputs.
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;

/// Number of records a worker counts locally before reporting progress.
const PROGRESS_BATCH: u64 = 10_000;

/// Parameters of a split run.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Input BAM file.
    pub input: PathBuf,
    /// Directory receiving one BAM per group; created if absent.
    pub output_dir: PathBuf,
    /// Number of worker threads (and the number of work units requested).
    pub threads: usize,
    /// Tag holding the cell barcode.
    pub tag: Tag,
    /// Maximum number of output files open at once.
    pub max_open_files: usize,
    /// BGZF compression level for outputs (1-12).
    pub compression_level: u8,
}

impl SplitConfig {
    /// Creates a single-threaded configuration with default settings.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            threads: 1,
            tag: Tag::CELL_BARCODE_ID,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Validates parameters and the input path without touching the filesystem.
    ///
    /// The output directory is checked (and created) by [`Dispatcher::run`] once the input
    /// header has been read. A budget of zero open files is accepted here and fails when the
    /// first stream is opened.
    ///
    /// # Errors
    ///
    /// Returns a configuration error ([`SplitError::is_config_error`]) for a bad thread count
    /// or compression level, or an unreadable input.
    pub fn validate(&self) -> Result<()> {
        validate_at_least(self.threads, 1, "threads")?;
        validate_range(self.compression_level, 1, 12, "compression-level")?;
        validate_input_file(&self.input)?;
        Ok(())
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, nothing done yet.
    Idle,
    /// Validating the configuration, decoding the header and planning work units.
    LoadingHeader,
    /// Workers are processing work units.
    Dispatching,
    /// Closing streams and assembling outputs.
    Draining,
    /// Finished, successfully or not.
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LoadingHeader => "loading-header",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A work unit that stopped before its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Index of the unit in file order.
    pub index: usize,
    /// What went wrong.
    pub error: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Record frames read, decodable or not.
    pub records_read: u64,
    /// Records written to a group output.
    pub records_written: u64,
    /// Records skipped because they could not be decoded or re-encoded.
    pub records_skipped: u64,
    /// Records whose barcode tag was missing, not a string, or empty.
    pub malformed_tags: u64,
    /// Records with a well-formed barcode absent from the map.
    pub unknown_barcodes: u64,
    /// Records routed to a group whose output had failed.
    pub records_dropped: u64,
    /// One report per group that received records, sorted by label.
    pub groups: Vec<GroupReport>,
    /// Work units that ended early, sorted by index.
    pub failed_units: Vec<UnitFailure>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// True if any group or work unit failed.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        !self.failed_units.is_empty() || self.groups.iter().any(GroupReport::is_failed)
    }

    /// Groups whose output failed.
    pub fn failed_groups(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|report| report.is_failed())
    }

    /// The report for the group labelled `label`, if it received records.
    #[must_use]
    pub fn group(&self, label: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|report| report.group.label() == label)
    }
}

/// Per-worker counters, merged into the summary once workers finish.
#[derive(Debug, Default, Clone, Copy)]
struct RecordCounts {
    read: u64,
    written: u64,
    skipped: u64,
    malformed: u64,
    unknown: u64,
    dropped: u64,
}

impl RecordCounts {
    fn merge(&mut self, other: &Self) {
        self.read += other.read;
        self.written += other.written;
        self.skipped += other.skipped;
        self.malformed += other.malformed;
        self.unknown += other.unknown;
        self.dropped += other.dropped;
    }
}

/// What a worker hands back when it exits.
#[derive(Debug, Default)]
struct WorkerOutput {
    counts: RecordCounts,
    failures: Vec<UnitFailure>,
}

/// State shared by all workers of a run.
struct RunContext<'a> {
    input: &'a Path,
    header: &'a Header,
    router: &'a Router,
    pool: &'a WriterPool,
    progress: &'a ProgressTracker,
    abort: AtomicBool,
    fatal: Mutex<Option<SplitError>>,
}

impl RunContext<'_> {
    /// Records the first fatal error and tells every worker to stop.
    fn abort_with(&self, error: SplitError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            warn!("Stopping run: {error}");
            *fatal = Some(error);
        }
        self.abort.store(true, Ordering::Relaxed);
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// Drives a split run.
pub struct Dispatcher {
    config: SplitConfig,
    barcode_map: Arc<BarcodeMap>,
    state: RunState,
}

impl Dispatcher {
    /// Creates a dispatcher in the [`RunState::Idle`] state.
    #[must_use]
    pub fn new(config: SplitConfig, barcode_map: Arc<BarcodeMap>) -> Self {
        Self { config, barcode_map, state: RunState::Idle }
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state: {} -> {next}", self.state);
        self.state = next;
    }

    /// Runs the split to completion.
    ///
    /// The dispatcher ends in [`RunState::Closed`] whether or not the run succeeds.
    ///
    /// # Errors
    ///
    /// Returns configuration and input-format errors before any record is processed, and
    /// [`SplitError::Resource`] if the open-file budget cannot be satisfied.
    pub fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_stages();
        self.transition(RunState::Closed);
        result
    }

    fn run_stages(&mut self) -> Result<RunSummary> {
        let timer = OperationTimer::new("Splitting records");

        self.transition(RunState::LoadingHeader);
        self.config.validate()?;
        let input = read_input_header(&self.config.input)?;
        let header_bytes = encode_header(&input.header).map_err(|e| SplitError::InvalidFileFormat {
            file_type: "BAM".to_string(),
            path: self.config.input.display().to_string(),
            reason: format!("header cannot be re-encoded: {e}"),
        })?;
        prepare_output_dir(&self.config.output_dir)?;
        let units = plan_work_units(&self.config.input, input.header_end, self.config.threads)?;
        let worker_count = self.config.threads.min(units.len()).max(1);
        debug!("Planned {} work unit(s) for {worker_count} worker(s)", units.len());

        let pool = WriterPool::new(PoolOptions {
            output_dir: self.config.output_dir.clone(),
            header_bytes,
            compression_level: self.config.compression_level,
            max_open_files: self.config.max_open_files,
            units: units.len(),
        })?;
        let router = Router::new(Arc::clone(&self.barcode_map), self.config.tag);
        let progress = ProgressTracker::new("Processed");

        self.transition(RunState::Dispatching);
        let (tx, rx) = unbounded();
        for unit in units {
            // The receiver is alive until the end of this function.
            let _ = tx.send(unit);
        }
        drop(tx);

        let ctx = RunContext {
            input: &self.config.input,
            header: &input.header,
            router: &router,
            pool: &pool,
            progress: &progress,
            abort: AtomicBool::new(false),
            fatal: Mutex::new(None),
        };

        let outputs: Vec<WorkerOutput> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|_| {
                    let rx = rx.clone();
                    let ctx = &ctx;
                    scope.spawn(move || run_worker(ctx, &rx))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(output) => output,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let fatal = ctx.fatal.into_inner();

        self.transition(RunState::Draining);
        let groups = pool.finish();

        if let Some(error) = fatal {
            return Err(error);
        }

        let mut counts = RecordCounts::default();
        let mut failed_units = Vec::new();
        for output in outputs {
            counts.merge(&output.counts);
            failed_units.extend(output.failures);
        }
        failed_units.sort_by_key(|failure| failure.index);

        timer.log_completion(counts.read);
        Ok(RunSummary {
            records_read: counts.read,
            records_written: counts.written,
            records_skipped: counts.skipped,
            malformed_tags: counts.malformed,
            unknown_barcodes: counts.unknown,
            records_dropped: counts.dropped,
            groups,
            failed_units,
            elapsed: timer.elapsed(),
        })
    }
}

/// Pulls work units until the channel is empty or the run is aborted.
fn run_worker(ctx: &RunContext<'_>, units: &Receiver<WorkUnit>) -> WorkerOutput {
    let mut output = WorkerOutput::default();
    let mut encoder = RecordEncoder::new();
    let mut record = RecordBuf::default();

    while let Ok(unit) = units.recv() {
        if ctx.is_aborted() {
            break;
        }
        match process_unit(ctx, &unit, &mut encoder, &mut record, &mut output.counts) {
            Ok(None) => {}
            Ok(Some(failure)) => {
                warn!("Work unit {} stopped early: {}", failure.index, failure.error);
                output.failures.push(failure);
            }
            Err(error) => {
                ctx.abort_with(error);
                break;
            }
        }
    }
    output
}

/// Reads, routes and writes every record of `unit`.
///
/// Returns `Ok(Some(_))` if the unit ended early on an input error, and `Err` for errors that
/// must stop the whole run.
fn process_unit(
    ctx: &RunContext<'_>,
    unit: &WorkUnit,
    encoder: &mut RecordEncoder,
    record: &mut RecordBuf,
    counts: &mut RecordCounts,
) -> Result<Option<UnitFailure>> {
    let failure = |error: &dyn fmt::Display| UnitFailure { index: unit.index, error: error.to_string() };

    let mut reader = match UnitReader::open(ctx.input, ctx.header, unit) {
        Ok(reader) => reader,
        Err(e) => return Ok(Some(failure(&e))),
    };

    let mut pending = 0u64;
    let result = loop {
        if ctx.is_aborted() {
            break None;
        }
        if pending == PROGRESS_BATCH {
            ctx.progress.add(pending);
            pending = 0;
        }

        match reader.read_next(record) {
            Ok(None) => break None,
            Ok(Some(ReadOutcome::Corrupt(e))) => {
                counts.read += 1;
                counts.skipped += 1;
                pending += 1;
                debug!("Skipping undecodable record in work unit {}: {e}", unit.index);
            }
            Ok(Some(ReadOutcome::Record)) => {
                counts.read += 1;
                pending += 1;

                let bytes = match encoder.encode(ctx.header, record) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        counts.skipped += 1;
                        debug!("Skipping record that cannot be re-encoded: {e}");
                        continue;
                    }
                };

                let route = ctx.router.route(record);
                match route.kind {
                    RouteKind::Assigned => {}
                    RouteKind::Unassigned => counts.unknown += 1,
                    RouteKind::MalformedTag => counts.malformed += 1,
                }

                match ctx.pool.append(unit.index, route.group, bytes)? {
                    AppendOutcome::Written => counts.written += 1,
                    AppendOutcome::Dropped => counts.dropped += 1,
                }
            }
            Err(e) => break Some(failure(&e)),
        }
    };

    ctx.progress.add(pending);
    Ok(result)
}
