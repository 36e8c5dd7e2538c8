//! Lazy record reading within a work unit.
//!
//! A [`UnitReader`] owns its own file handle and BGZF reader, positioned at the unit's start,
//! and frames records itself (4-byte `block_size` + body) so that it can stop exactly at the
//! unit's end and tell framing failures apart from undecodable records:
//!
//! - a frame whose body cannot be decoded is reported as [`ReadOutcome::Corrupt`] and reading
//!   continues with the next frame;
//! - an I/O or framing error (truncated block, CRC mismatch, truncated record) is returned as
//!   `Err` and ends the unit.

use std::io::{self, BufRead, Read};
use std::path::Path;

use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;

use crate::bam_io::{InputBgzfReader, open_bgzf};
use crate::chunk::WorkUnit;

/// Largest record frame accepted before the length prefix is treated as garbage.
pub const MAX_RECORD_SIZE: usize = 1 << 28;

/// Result of reading one frame.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The record buffer now holds the next record.
    Record,
    /// The frame was intact but its body could not be decoded.
    Corrupt(io::Error),
}

/// Reads the records of one [`WorkUnit`].
pub struct UnitReader<'h> {
    inner: InputBgzfReader,
    header: &'h Header,
    end: Option<noodles::bgzf::VirtualPosition>,
    frame: Vec<u8>,
    done: bool,
}

impl<'h> UnitReader<'h> {
    /// Opens `path` and positions a reader at the start of `unit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the start position cannot be reached.
    pub fn open(path: &Path, header: &'h Header, unit: &WorkUnit) -> io::Result<Self> {
        let mut inner = open_bgzf(path).map_err(io::Error::other)?;
        inner.seek(unit.start)?;
        Ok(Self { inner, header, end: unit.end, frame: Vec::new(), done: false })
    }

    /// Reads the next record into `record`.
    ///
    /// Returns `Ok(None)` once the unit is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is truncated or not valid BGZF. The reader
    /// yields nothing further after an error.
    pub fn read_next(&mut self, record: &mut RecordBuf) -> io::Result<Option<ReadOutcome>> {
        if self.done {
            return Ok(None);
        }

        match self.next_frame() {
            Ok(true) => {}
            Ok(false) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        }

        let mut decoder = bam::io::Reader::from(&self.frame[..]);
        match decoder.read_record_buf(self.header, record) {
            Ok(0) => Ok(Some(ReadOutcome::Corrupt(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty record frame",
            )))),
            Ok(_) => Ok(Some(ReadOutcome::Record)),
            Err(e) => Ok(Some(ReadOutcome::Corrupt(e))),
        }
    }

    /// Loads the next frame into `self.frame`; `false` at the end of the unit.
    fn next_frame(&mut self) -> io::Result<bool> {
        // Filling first guarantees the virtual position names the block that holds the next
        // byte, which is how unit boundaries are expressed.
        if self.inner.fill_buf()?.is_empty() {
            return Ok(false);
        }
        if self.end.is_some_and(|end| self.inner.virtual_position() >= end) {
            return Ok(false);
        }

        let mut prefix = [0u8; 4];
        self.inner.read_exact(&mut prefix)?;
        let block_size = u32::from_le_bytes(prefix) as usize;
        if block_size > MAX_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {block_size} exceeds the maximum of {MAX_RECORD_SIZE}"),
            ));
        }

        self.frame.clear();
        self.frame.extend_from_slice(&prefix);
        self.frame.resize(4 + block_size, 0);
        self.inner.read_exact(&mut self.frame[4..])?;
        Ok(true)
    }
}
