//! Raw BGZF block scanning and decompression.
//!
//! Work-unit planning needs to know where each BGZF block starts in the compressed file, which
//! the buffered `noodles` reader does not expose block by block. [`BlockScanner`] reads raw
//! blocks straight off the file, tracking their compressed offsets, and
//! [`decompress_block_into`] inflates them with libdeflater.
//!
//! # BGZF Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                               │
//! │  - Magic: 0x1f 0x8b (gzip)                                      │
//! │  - Method: 0x08 (deflate)                                       │
//! │  - Flags: 0x04 (FEXTRA)                                         │
//! │  - MTIME, XFL, OS: 6 bytes                                      │
//! │  - XLEN: 2 bytes (= 6)                                          │
//! │  - Subfield: "BC" + len(2) + BSIZE(2)                           │
//! │    where BSIZE = total_block_size - 1                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Compressed data (deflate)                                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                                │
//! │  - CRC32: 4 bytes                                               │
//! │  - ISIZE: 4 bytes (uncompressed size mod 2^32)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use libdeflater::Decompressor;
use std::io::{self, Read};

/// Size of the BGZF block header.
pub const BGZF_HEADER_SIZE: usize = 18;

/// Size of the BGZF block footer (CRC32 + ISIZE).
pub const BGZF_FOOTER_SIZE: usize = 8;

/// Largest uncompressed payload a BGZF block may carry.
pub const BGZF_MAX_ISIZE: usize = 65536;

/// BGZF EOF marker block (empty block signaling end of file).
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// A raw BGZF block together with where it starts in the compressed file.
#[derive(Debug, Clone)]
pub struct RawBgzfBlock {
    /// Compressed offset of the first header byte.
    pub offset: u64,
    /// Complete raw block data: header + compressed data + footer.
    pub data: Vec<u8>,
}

impl RawBgzfBlock {
    /// Total size of the block on disk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the block holds no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True for the 28-byte BGZF EOF marker.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.data == BGZF_EOF
    }

    /// The deflate payload between header and footer.
    #[must_use]
    pub fn compressed_data(&self) -> &[u8] {
        if self.data.len() <= BGZF_HEADER_SIZE + BGZF_FOOTER_SIZE {
            return &[];
        }
        &self.data[BGZF_HEADER_SIZE..self.data.len() - BGZF_FOOTER_SIZE]
    }

    /// Expected uncompressed size from the footer (ISIZE field).
    #[must_use]
    pub fn uncompressed_size(&self) -> usize {
        self.footer_word(4) as usize
    }

    /// CRC32 of the uncompressed payload from the footer.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        self.footer_word(8)
    }

    fn footer_word(&self, from_end: usize) -> u32 {
        let len = self.data.len();
        if len < BGZF_FOOTER_SIZE {
            return 0;
        }
        let start = len - from_end;
        u32::from_le_bytes([
            self.data[start],
            self.data[start + 1],
            self.data[start + 2],
            self.data[start + 3],
        ])
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Read a single raw BGZF block that starts at `offset`.
///
/// Returns `Ok(None)` at a clean end of input, an `UnexpectedEof` error if the input ends inside
/// a block, and `InvalidData` if the header is not a BGZF header.
fn read_raw_block<R: Read + ?Sized>(reader: &mut R, offset: u64) -> io::Result<Option<RawBgzfBlock>> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let mut filled = 0;
    while filled < BGZF_HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < BGZF_HEADER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Truncated BGZF block header at offset {offset}"),
        ));
    }

    if header[0] != 0x1f || header[1] != 0x8b {
        return Err(invalid_data(format!(
            "Invalid BGZF magic at offset {offset}: expected 0x1f 0x8b, got 0x{:02x} 0x{:02x}",
            header[0], header[1]
        )));
    }

    if header[2] != 0x08 {
        return Err(invalid_data(format!(
            "Invalid compression method at offset {offset}: expected 0x08, got 0x{:02x}",
            header[2]
        )));
    }

    if header[3] & 0x04 == 0 {
        return Err(invalid_data(format!("BGZF block at offset {offset} missing FEXTRA flag")));
    }

    if header[12] != b'B' || header[13] != b'C' {
        return Err(invalid_data(format!(
            "Invalid BGZF subfield ID at offset {offset}: expected 'BC', got '{}{}'",
            header[12] as char, header[13] as char
        )));
    }

    // BSIZE = total_block_size - 1
    let bsize = u16::from_le_bytes([header[16], header[17]]) as usize;
    let block_size = bsize + 1;

    if block_size < BGZF_HEADER_SIZE + BGZF_FOOTER_SIZE {
        return Err(invalid_data(format!(
            "BGZF block at offset {offset} too small: {block_size} bytes"
        )));
    }

    let mut data = vec![0u8; block_size];
    data[..BGZF_HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut data[BGZF_HEADER_SIZE..])?;

    Ok(Some(RawBgzfBlock { offset, data }))
}

/// Sequential reader of raw BGZF blocks that knows each block's compressed offset.
///
/// The caller positions the underlying reader; `offset` must be the compressed position it is
/// currently at.
pub struct BlockScanner<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> BlockScanner<R> {
    /// Creates a scanner whose next block starts at `offset`.
    pub fn new(inner: R, offset: u64) -> Self {
        Self { inner, offset }
    }

    /// Compressed offset of the next block to be read.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next raw block, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid BGZF or ends inside a block.
    pub fn next_block(&mut self) -> io::Result<Option<RawBgzfBlock>> {
        let block = read_raw_block(&mut self.inner, self.offset)?;
        if let Some(block) = &block {
            self.offset += block.len() as u64;
        }
        Ok(block)
    }
}

/// Decompress a BGZF block, appending the payload to `output`.
///
/// The payload is checked against the footer's CRC32.
///
/// # Errors
///
/// Returns an error if the declared size is impossible, inflation fails, or the CRC32 does not
/// match.
pub fn decompress_block_into(
    block: &RawBgzfBlock,
    decompressor: &mut Decompressor,
    output: &mut Vec<u8>,
) -> io::Result<()> {
    if block.is_eof() || block.uncompressed_size() == 0 {
        return Ok(());
    }

    let uncompressed_size = block.uncompressed_size();
    if uncompressed_size > BGZF_MAX_ISIZE {
        return Err(invalid_data(format!(
            "BGZF block at offset {} declares {uncompressed_size} uncompressed bytes",
            block.offset
        )));
    }

    let start = output.len();
    output.resize(start + uncompressed_size, 0);

    let written = decompressor
        .deflate_decompress(block.compressed_data(), &mut output[start..])
        .map_err(|e| {
            invalid_data(format!(
                "BGZF decompression failed at offset {}: {e:?}",
                block.offset
            ))
        })?;
    if written != uncompressed_size {
        return Err(invalid_data(format!(
            "BGZF block at offset {} inflated to {written} bytes, expected {uncompressed_size}",
            block.offset
        )));
    }

    let expected_crc = block.crc32();
    let actual_crc = crc32fast::hash(&output[start..]);
    if expected_crc != actual_crc {
        return Err(invalid_data(format!(
            "BGZF CRC32 mismatch at offset {}: expected 0x{expected_crc:08x}, got 0x{actual_crc:08x}",
            block.offset
        )));
    }

    Ok(())
}
