//! Partitioning the input into record-aligned work units.
//!
//! A [`WorkUnit`] is a contiguous span of records delimited by BGZF virtual positions. Planning
//! walks the BAM record length chain over raw, individually inflated BGZF blocks, so every
//! boundary is the exact start of a record, expressed within the block that holds the record's
//! first byte. Boundaries are never guessed from byte offsets alone.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use libdeflater::Decompressor;
use log::debug;
use noodles::bgzf::VirtualPosition;

use crate::bgzf_reader::{BlockScanner, decompress_block_into};
use crate::errors::{Result, SplitError};
use crate::record_reader::MAX_RECORD_SIZE;

/// A contiguous, record-aligned span of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    /// Position of the unit in file order, starting at 0.
    pub index: usize,
    /// Virtual position of the unit's first record.
    pub start: VirtualPosition,
    /// Virtual position of the next unit's first record, or `None` for the last unit.
    pub end: Option<VirtualPosition>,
}

impl WorkUnit {
    /// A single unit covering every record after the header.
    #[must_use]
    pub fn whole_file(header_end: VirtualPosition) -> Self {
        Self { index: 0, start: header_end, end: None }
    }
}

/// Where the record-chain walk stands at a block boundary.
#[derive(Debug, Clone, Copy)]
enum Walk {
    /// Skip this many bytes; the byte after them starts a record.
    Skip(u64),
    /// Collecting the 4-byte length prefix of the current record.
    Length { buf: [u8; 4], have: usize },
}

/// Plans up to `n` work units over the records of `path`.
///
/// Split targets are the compressed offsets `file_len * k / n` for `k` in `1..n`. The first
/// record that starts inside a block at or past a target becomes the start of a new unit. An
/// input with fewer records (or blocks) than requested units yields fewer units; `n <= 1`
/// returns a single unit without reading the file.
///
/// Frames are walked the way [`UnitReader`](crate::record_reader::UnitReader) reads them: a
/// length prefix too short to hold a record is still skipped as one frame, so it becomes a
/// skipped record in whichever unit contains it. Planning stops early, keeping the boundaries
/// found so far, at a block that cannot be read or inflated or at an impossible record length.
/// The last unit then reaches that point and ends there with a unit failure, exactly as a
/// single-unit run would.
///
/// The scan is serial and inflates every block up to the last split target (roughly
/// `(n - 1) / n` of the input) before any worker starts; it stops as soon as every target has a
/// boundary.
///
/// # Errors
///
/// Returns [`SplitError::InputUnreadable`] if the file cannot be opened or positioned.
#[allow(clippy::cast_possible_truncation)]
pub fn plan_work_units(path: &Path, header_end: VirtualPosition, n: usize) -> Result<Vec<WorkUnit>> {
    if n <= 1 {
        return Ok(vec![WorkUnit::whole_file(header_end)]);
    }

    let unreadable = |e: std::io::Error| SplitError::InputUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let file_len = file.metadata().map_err(unreadable)?.len();
    file.seek(SeekFrom::Start(header_end.compressed())).map_err(unreadable)?;

    let targets: Vec<u64> = (1..n as u64).map(|k| file_len * k / n as u64).collect();
    let mut next_target = 0;
    let mut starts = vec![header_end];

    let mut scanner = BlockScanner::new(BufReader::new(file), header_end.compressed());
    let mut decompressor = Decompressor::new();
    let mut data = Vec::new();
    let mut walk = Walk::Skip(u64::from(header_end.uncompressed()));
    let mut blocks_scanned = 0usize;

    'blocks: while next_target < targets.len() {
        let block = match scanner.next_block() {
            Ok(Some(block)) => block,
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped planning at an unreadable block: {e}");
                break;
            }
        };
        blocks_scanned += 1;

        data.clear();
        if let Err(e) = decompress_block_into(&block, &mut decompressor, &mut data) {
            debug!("Stopped planning at block offset {}: {e}", block.offset);
            break;
        }

        let mut p = 0usize;
        while p < data.len() {
            walk = match walk {
                Walk::Skip(skip) => {
                    let remaining = (data.len() - p) as u64;
                    if skip >= remaining {
                        p = data.len();
                        Walk::Skip(skip - remaining)
                    } else {
                        p += skip as usize;

                        // A record starts at (block.offset, p).
                        if block.offset >= targets[next_target] {
                            let Ok(position) = VirtualPosition::try_from((block.offset, p as u16))
                            else {
                                debug!("Stopped planning: offset {} out of range", block.offset);
                                break 'blocks;
                            };
                            if starts.last().is_some_and(|last| position > *last) {
                                starts.push(position);
                            }
                            while next_target < targets.len() && targets[next_target] <= block.offset
                            {
                                next_target += 1;
                            }
                            if next_target == targets.len() {
                                break 'blocks;
                            }
                        }

                        Walk::Length { buf: [0; 4], have: 0 }
                    }
                }
                Walk::Length { mut buf, mut have } => {
                    let take = (4 - have).min(data.len() - p);
                    buf[have..have + take].copy_from_slice(&data[p..p + take]);
                    have += take;
                    p += take;
                    if have == 4 {
                        let block_size = u32::from_le_bytes(buf);
                        if block_size as usize > MAX_RECORD_SIZE {
                            debug!(
                                "Stopped planning at record length {block_size} in block at \
                                 offset {}",
                                block.offset
                            );
                            break 'blocks;
                        }
                        Walk::Skip(u64::from(block_size))
                    } else {
                        Walk::Length { buf, have }
                    }
                }
            };
        }
    }

    debug!(
        "Planned {} work unit(s) from {} requested after scanning {blocks_scanned} block(s)",
        starts.len(),
        n
    );

    let units = starts
        .iter()
        .enumerate()
        .map(|(index, &start)| WorkUnit { index, start, end: starts.get(index + 1).copied() })
        .collect();
    Ok(units)
}
