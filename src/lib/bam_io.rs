//! BAM header and record encoding helpers.
//!
//! The input header is decoded once, when the run starts, and its raw BAM encoding (magic, text
//! and reference table) is copied verbatim to the front of every output file. Records are
//! re-encoded per worker with a [`RecordEncoder`], which keeps its output buffer between calls.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use noodles::bam;
use noodles::bgzf::{self, VirtualPosition};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as _;

use crate::errors::{Result, SplitError};

/// BGZF reader over a buffered input file.
pub type InputBgzfReader = bgzf::io::Reader<BufReader<File>>;

/// The decoded input header and where the first record starts.
#[derive(Debug, Clone)]
pub struct InputHeader {
    /// The decoded SAM header.
    pub header: Header,
    /// Virtual position directly after the BAM header.
    pub header_end: VirtualPosition,
}

/// Opens a BGZF reader over `path`.
///
/// # Errors
///
/// Returns [`SplitError::InputUnreadable`] if the file cannot be opened.
pub fn open_bgzf(path: &Path) -> Result<InputBgzfReader> {
    let file = File::open(path).map_err(|e| SplitError::InputUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(bgzf::io::Reader::new(BufReader::new(file)))
}

/// Reads and validates the BAM header of `path`.
///
/// # Errors
///
/// Returns [`SplitError::InputUnreadable`] if the file cannot be opened and
/// [`SplitError::InvalidFileFormat`] if it is not BGZF, lacks the BAM magic, or the header
/// cannot be decoded.
pub fn read_input_header(path: &Path) -> Result<InputHeader> {
    let mut reader = bam::io::Reader::from(open_bgzf(path)?);
    let header = reader.read_header().map_err(|e| SplitError::InvalidFileFormat {
        file_type: "BAM".to_string(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let header_end = reader.get_ref().virtual_position();
    Ok(InputHeader { header, header_end })
}

/// Encodes `header` the way it appears at the start of an uncompressed BAM stream.
///
/// # Errors
///
/// Returns an error if the header cannot be serialized.
pub fn encode_header(header: &Header) -> io::Result<Vec<u8>> {
    let mut writer = bam::io::Writer::from(Vec::new());
    writer.write_header(header)?;
    Ok(writer.into_inner())
}

/// Reusable BAM record encoder.
///
/// The encoded bytes include the 4-byte `block_size` prefix, so they can be appended to an
/// output stream as they are.
pub struct RecordEncoder {
    writer: bam::io::Writer<Vec<u8>>,
}

impl Default for RecordEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordEncoder {
    /// Creates an encoder with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { writer: bam::io::Writer::from(Vec::new()) }
    }

    /// Encodes `record`, returning a view of the encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be represented in BAM (e.g. a reference sequence
    /// id the header does not define).
    pub fn encode(&mut self, header: &Header, record: &RecordBuf) -> io::Result<&[u8]> {
        self.writer.get_mut().clear();
        self.writer.write_alignment_record(header, record)?;
        Ok(self.writer.get_ref())
    }
}
