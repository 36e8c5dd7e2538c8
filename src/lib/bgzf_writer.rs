//! Inline BGZF compression for output streams.
//!
//! Each output stream owns a [`BlockCompressor`]. Encoded records are buffered until a full
//! BGZF block's worth of data is available, compressed with the `bgzf` crate, and the
//! resulting blocks are written to the stream's file by [`BlockCompressor::write_blocks_to`].
//!
//! Blocks are self-contained, so segments produced by different compressors can be joined by
//! plain byte concatenation; only the final file gets an EOF marker ([`write_eof`]).

use bgzf::{CompressionLevel, Compressor as BgzfCompressor};
use std::io::{self, Write};

use crate::bgzf_reader::BGZF_EOF;

/// Maximum uncompressed size for a BGZF block.
const BGZF_MAX_BLOCK_SIZE: usize = bgzf::BGZF_BLOCK_SIZE;

/// Buffering BGZF compressor.
pub struct BlockCompressor {
    /// Uncompressed bytes waiting for a full block.
    buffer: Vec<u8>,
    compressor: BgzfCompressor,
    /// Compressed blocks not yet written out.
    completed_blocks: Vec<Vec<u8>>,
    /// Recycled block buffers.
    buffer_pool: Vec<Vec<u8>>,
}

impl BlockCompressor {
    /// Creates a compressor at the given level.
    ///
    /// Levels outside 1-12 are clamped into range.
    ///
    /// # Errors
    ///
    /// Returns an error if the compression backend rejects the level.
    pub fn new(compression_level: u8) -> io::Result<Self> {
        let level = CompressionLevel::new(compression_level.clamp(1, 12)).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported BGZF compression level: {compression_level}"),
            )
        })?;
        Ok(Self {
            buffer: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            compressor: BgzfCompressor::new(level),
            completed_blocks: Vec::new(),
            buffer_pool: Vec::new(),
        })
    }

    /// Buffers `data`, compressing a block each time the buffer fills.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;

        while offset < data.len() {
            let remaining_in_buffer = BGZF_MAX_BLOCK_SIZE - self.buffer.len();
            let to_copy = remaining_in_buffer.min(data.len() - offset);

            self.buffer.extend_from_slice(&data[offset..offset + to_copy]);
            offset += to_copy;

            if self.buffer.len() >= BGZF_MAX_BLOCK_SIZE {
                self.compress_current_buffer()?;
            }
        }

        Ok(())
    }

    /// Compresses whatever is buffered into a (possibly short) block.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn finish_block(&mut self) -> io::Result<()> {
        self.compress_current_buffer()
    }

    /// Number of uncompressed bytes waiting in the buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of compressed blocks not yet written.
    #[must_use]
    pub fn pending_blocks(&self) -> usize {
        self.completed_blocks.len()
    }

    /// Writes all completed blocks to `output` and recycles their buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails. Blocks not yet written are discarded in that case,
    /// since the stream they belong to is no longer usable.
    pub fn write_blocks_to<W: Write + ?Sized>(&mut self, output: &mut W) -> io::Result<()> {
        let mut blocks = std::mem::take(&mut self.completed_blocks);
        let result = blocks.iter().try_for_each(|block| output.write_all(block));
        for mut buf in blocks.drain(..) {
            buf.clear();
            self.buffer_pool.push(buf);
        }
        self.completed_blocks = blocks;
        result
    }

    fn compress_current_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut compressed = self.buffer_pool.pop().unwrap_or_default();
        compressed.clear();

        self.compressor
            .compress(&self.buffer, &mut compressed)
            .map_err(|e| io::Error::other(format!("BGZF compression failed: {e}")))?;

        self.completed_blocks.push(compressed);
        self.buffer.clear();

        Ok(())
    }
}

/// Writes the 28-byte BGZF EOF marker.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_eof<W: Write + ?Sized>(output: &mut W) -> io::Result<()> {
    output.write_all(&BGZF_EOF)
}
