//! Bounded pool of per-group output streams.
//!
//! Every `(group, work unit)` pair gets its own [`OutputStream`]. Streams for unit 0 write
//! straight into the group's final `<label>.bam`; streams for later units write headerless
//! BGZF segments into a temporary directory inside the output directory, which
//! [`WriterPool::finish`] appends to the final files in unit order. Because BGZF blocks are
//! independent, assembly is plain byte concatenation.
//!
//! # Locking
//!
//! - The stream table, the LRU list of open streams and the per-group states live behind one
//!   table mutex, held only for short bookkeeping.
//! - Each stream has its own mutex, held for the whole append.
//! - Lock order is stream then table. Code holding the table lock only ever `try_lock`s a
//!   stream, so it never blocks on one.
//!
//! When the open-file budget is exhausted the least recently used idle stream is flushed and
//! closed. Streams in use by another worker are skipped; if every open stream is busy the
//! caller waits until one is released.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use log::{debug, error};
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;

use crate::barcode_map::GroupId;
use crate::bgzf_writer::{BlockCompressor, write_eof};
use crate::errors::{Result, SplitError};

/// Default maximum number of simultaneously open output files.
pub const DEFAULT_MAX_OPEN_FILES: usize = 512;

/// How long a worker waits for a busy stream to be released before rescanning.
const EVICTION_WAIT: Duration = Duration::from_millis(50);

/// Identifies one output stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Group the stream belongs to.
    pub group: GroupId,
    /// Work unit that feeds the stream.
    pub unit: usize,
}

/// Result of a successful [`WriterPool::append`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was accepted by the group's stream.
    Written,
    /// The group's output has failed; the record was discarded.
    Dropped,
}

/// Final state of one group after [`WriterPool::finish`].
#[derive(Debug, Clone)]
pub struct GroupReport {
    /// The group.
    pub group: GroupId,
    /// Path of the group's output file.
    pub path: PathBuf,
    /// Records accepted for the group.
    pub records: u64,
    /// Records discarded after the group failed.
    pub dropped: u64,
    /// First error seen for the group, if it failed.
    pub error: Option<String>,
}

impl GroupReport {
    /// True if the group's output is incomplete.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Settings for a [`WriterPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Directory receiving `<label>.bam` files. Must exist.
    pub output_dir: PathBuf,
    /// Raw BAM header bytes (magic, text, references) written at the start of every output.
    pub header_bytes: Vec<u8>,
    /// BGZF compression level.
    pub compression_level: u8,
    /// Maximum number of output files open at once.
    pub max_open_files: usize,
    /// Number of work units that will append to the pool.
    pub units: usize,
}

#[derive(Debug, Default)]
struct GroupState {
    failed: AtomicBool,
    error: Mutex<Option<String>>,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl GroupState {
    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Marks the group failed, keeping the first error.
    fn fail(&self, group: &GroupId, reason: String) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            error!("Output for group '{group}' failed, further records will be dropped: {reason}");
            *self.error.lock() = Some(reason);
        }
    }

    fn drop_record(&self) -> AppendOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        AppendOutcome::Dropped
    }
}

/// One output file (final output or segment) and its compressor.
struct OutputStream {
    path: PathBuf,
    /// Unit-0 streams are final outputs and carry the header.
    is_final: bool,
    file: Option<File>,
    compressor: Option<BlockCompressor>,
    /// The file exists on disk; reopening must append.
    created: bool,
    header_written: bool,
    records: u64,
}

impl OutputStream {
    fn new(path: PathBuf, is_final: bool) -> Self {
        Self {
            path,
            is_final,
            file: None,
            compressor: None,
            created: false,
            header_written: false,
            records: 0,
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self, header_bytes: &[u8], compression_level: u8) -> io::Result<()> {
        let file = if self.created {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            File::create(&self.path)?
        };
        self.created = true;

        let mut compressor = BlockCompressor::new(compression_level)?;
        if self.is_final && !self.header_written {
            compressor.write_all(header_bytes)?;
            compressor.finish_block()?;
            self.header_written = true;
        }

        self.file = Some(file);
        self.compressor = Some(compressor);
        Ok(())
    }

    fn write(&mut self, record: &[u8]) -> io::Result<()> {
        let (Some(file), Some(compressor)) = (self.file.as_mut(), self.compressor.as_mut()) else {
            return Err(io::Error::other(format!("stream {} is not open", self.path.display())));
        };
        compressor.write_all(record)?;
        if compressor.pending_blocks() > 0 {
            compressor.write_blocks_to(file)?;
        }
        self.records += 1;
        Ok(())
    }

    /// Flushes buffered data and releases the file handle.
    fn close(&mut self) -> io::Result<()> {
        let file = self.file.take();
        let compressor = self.compressor.take();
        if let (Some(mut file), Some(mut compressor)) = (file, compressor) {
            compressor.finish_block()?;
            compressor.write_blocks_to(&mut file)?;
            file.flush()?;
        }
        Ok(())
    }
}

struct StreamTable {
    streams: AHashMap<StreamKey, Arc<Mutex<OutputStream>>>,
    /// Keys of streams holding an open file, most recently used first.
    open: LruCache<StreamKey, ()>,
    groups: AHashMap<GroupId, Arc<GroupState>>,
}

impl StreamTable {
    fn new() -> Self {
        Self { streams: AHashMap::new(), open: LruCache::unbounded(), groups: AHashMap::new() }
    }

    fn group_state(&mut self, group: &GroupId) -> Arc<GroupState> {
        Arc::clone(self.groups.entry(group.clone()).or_default())
    }

    /// Closes the least recently used stream that nobody holds. Returns false if every open
    /// stream is busy.
    fn evict_one(&mut self) -> bool {
        let mut victim = None;
        for (key, _) in self.open.iter().rev() {
            let Some(stream) = self.streams.get(key) else { continue };
            if let Some(mut guard) = stream.try_lock() {
                if let Err(e) = guard.close() {
                    if let Some(state) = self.groups.get(&key.group) {
                        state.fail(&key.group, format!("flushing {}: {e}", guard.path.display()));
                    }
                }
                debug!("Evicted output stream {} (unit {})", key.group, key.unit);
                victim = Some(key.clone());
                break;
            }
        }

        match victim {
            Some(key) => {
                self.open.pop(&key);
                true
            }
            None => false,
        }
    }
}

/// Pool of output streams shared by all workers.
pub struct WriterPool {
    output_dir: PathBuf,
    segment_dir: Option<TempDir>,
    header_bytes: Vec<u8>,
    compression_level: u8,
    max_open_files: usize,
    table: Mutex<StreamTable>,
    idle: Condvar,
}

impl WriterPool {
    /// Creates a pool. Nothing is opened until the first append.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::OutputUnusable`] if the segment directory for multi-unit runs
    /// cannot be created.
    pub fn new(options: PoolOptions) -> Result<Self> {
        let segment_dir = if options.units > 1 {
            let dir = tempfile::Builder::new()
                .prefix(".cellsplit-")
                .tempdir_in(&options.output_dir)
                .map_err(|e| SplitError::OutputUnusable {
                    path: options.output_dir.display().to_string(),
                    reason: format!("cannot create segment directory: {e}"),
                })?;
            Some(dir)
        } else {
            None
        };

        Ok(Self {
            output_dir: options.output_dir,
            segment_dir,
            header_bytes: options.header_bytes,
            compression_level: options.compression_level,
            max_open_files: options.max_open_files,
            table: Mutex::new(StreamTable::new()),
            idle: Condvar::new(),
        })
    }

    /// Path of a group's final output file.
    #[must_use]
    pub fn output_path(&self, group: &GroupId) -> PathBuf {
        self.output_dir.join(group.file_name())
    }

    fn stream_path(&self, key: &StreamKey) -> PathBuf {
        match (&self.segment_dir, key.unit) {
            (Some(dir), unit) if unit > 0 => {
                dir.path().join(format!("{}.{unit:06}.bgzf", key.group.label()))
            }
            _ => self.output_path(&key.group),
        }
    }

    /// Appends one encoded record (with its `block_size` prefix) to the stream for
    /// `(group, unit)`.
    ///
    /// I/O failures are contained: the group is marked failed and this and later records for
    /// it are reported as [`AppendOutcome::Dropped`].
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::Resource`] if the open-file budget is zero.
    pub fn append(&self, unit: usize, group: &GroupId, record: &[u8]) -> Result<AppendOutcome> {
        let key = StreamKey { group: group.clone(), unit };

        let (stream, state) = {
            let mut table = self.table.lock();
            let state = table.group_state(group);
            if state.is_failed() {
                return Ok(state.drop_record());
            }
            let stream = match table.streams.get(&key) {
                Some(stream) => Arc::clone(stream),
                None => {
                    let stream =
                        Arc::new(Mutex::new(OutputStream::new(self.stream_path(&key), unit == 0)));
                    table.streams.insert(key.clone(), Arc::clone(&stream));
                    stream
                }
            };
            (stream, state)
        };

        let outcome = {
            let mut guard = stream.lock();
            self.append_locked(&key, &mut guard, &state, record)
        };
        self.idle.notify_all();
        outcome
    }

    fn append_locked(
        &self,
        key: &StreamKey,
        stream: &mut OutputStream,
        state: &GroupState,
        record: &[u8],
    ) -> Result<AppendOutcome> {
        if state.is_failed() {
            return Ok(state.drop_record());
        }

        if stream.is_open() {
            self.table.lock().open.promote(key);
        } else {
            self.reserve_slot(key)?;
            if let Err(e) = stream.open(&self.header_bytes, self.compression_level) {
                self.release_slot(key);
                state.fail(&key.group, format!("opening {}: {e}", stream.path.display()));
                return Ok(state.drop_record());
            }
        }

        match stream.write(record) {
            Ok(()) => {
                state.written.fetch_add(1, Ordering::Relaxed);
                Ok(AppendOutcome::Written)
            }
            Err(e) => {
                state.fail(&key.group, format!("writing {}: {e}", stream.path.display()));
                stream.file = None;
                stream.compressor = None;
                self.release_slot(key);
                Ok(state.drop_record())
            }
        }
    }

    /// Takes one open-file slot for `key`, evicting idle streams as needed.
    fn reserve_slot(&self, key: &StreamKey) -> Result<()> {
        if self.max_open_files == 0 {
            return Err(SplitError::Resource {
                group: key.group.to_string(),
                budget: self.max_open_files,
            });
        }

        let mut table = self.table.lock();
        loop {
            if table.open.len() < self.max_open_files {
                table.open.put(key.clone(), ());
                return Ok(());
            }
            if !table.evict_one() {
                self.idle.wait_for(&mut table, EVICTION_WAIT);
            }
        }
    }

    fn release_slot(&self, key: &StreamKey) {
        self.table.lock().open.pop(key);
        self.idle.notify_all();
    }

    /// Number of streams currently holding an open file.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.table.lock().open.len()
    }

    /// Closes every stream, assembles the final outputs and reports on each group.
    ///
    /// For each group that has not failed, the final file is created (with its header) if
    /// unit 0 never wrote to it, the group's segments are appended in unit order, and the BGZF
    /// EOF marker is written. Reports are sorted by group label.
    #[must_use]
    pub fn finish(self) -> Vec<GroupReport> {
        let table = self.table.into_inner();

        let mut by_group: BTreeMap<GroupId, BTreeMap<usize, OutputStream>> = BTreeMap::new();
        for (key, stream) in table.streams {
            let mut stream = match Arc::try_unwrap(stream) {
                Ok(mutex) => mutex.into_inner(),
                Err(shared) => {
                    // Only reachable if a worker outlived the run; close what we can see.
                    let mut guard = shared.lock();
                    let placeholder = OutputStream::new(guard.path.clone(), guard.is_final);
                    std::mem::replace(&mut *guard, placeholder)
                }
            };
            if let Err(e) = stream.close() {
                if let Some(state) = table.groups.get(&key.group) {
                    state.fail(&key.group, format!("flushing {}: {e}", stream.path.display()));
                }
            }
            debug!("Closed {} with {} record(s)", stream.path.display(), stream.records);
            by_group.entry(key.group).or_default().insert(key.unit, stream);
        }

        let mut reports = Vec::with_capacity(table.groups.len());
        let mut groups: Vec<(GroupId, Arc<GroupState>)> = table.groups.into_iter().collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        for (group, state) in groups {
            let path = self.output_dir.join(group.file_name());
            let streams = by_group.remove(&group).unwrap_or_default();

            if !state.is_failed() {
                if let Err(e) =
                    assemble(&path, &streams, &self.header_bytes, self.compression_level)
                {
                    state.fail(&group, format!("assembling {}: {e}", path.display()));
                }
            }

            for stream in streams.values().filter(|s| !s.is_final && s.created) {
                if let Err(e) = std::fs::remove_file(&stream.path) {
                    debug!("Could not remove segment {}: {e}", stream.path.display());
                }
            }

            reports.push(GroupReport {
                group,
                path,
                records: state.written.load(Ordering::Relaxed),
                dropped: state.dropped.load(Ordering::Relaxed),
                error: state.error.lock().take(),
            });
        }

        reports
    }
}

/// Builds a group's final file from its unit-0 output and segments.
fn assemble(
    path: &Path,
    streams: &BTreeMap<usize, OutputStream>,
    header_bytes: &[u8],
    compression_level: u8,
) -> io::Result<()> {
    let has_final = streams.get(&0).is_some_and(|s| s.is_final && s.created);
    let mut out = if has_final {
        OpenOptions::new().append(true).open(path)?
    } else {
        let mut file = File::create(path)?;
        let mut compressor = BlockCompressor::new(compression_level)?;
        compressor.write_all(header_bytes)?;
        compressor.finish_block()?;
        compressor.write_blocks_to(&mut file)?;
        file
    };

    for segment in streams.values().filter(|s| !s.is_final && s.created) {
        let mut input = File::open(&segment.path)?;
        io::copy(&mut input, &mut out)?;
    }

    write_eof(&mut out)?;
    out.flush()
}
