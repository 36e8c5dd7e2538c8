//! Common CLI options shared across commands.
//!
//! This module provides shared argument structures that can be composed into
//! command structs using `#[command(flatten)]`.

use clap::Args;

use cellsplit_lib::dispatcher::DEFAULT_COMPRESSION_LEVEL;
use cellsplit_lib::writer_pool::DEFAULT_MAX_OPEN_FILES;

/// Options for worker threads.
#[derive(Debug, Clone, Args)]
pub struct ThreadingOptions {
    /// Number of worker threads.
    ///
    /// The input is divided into this many record-aligned work units when it is large enough.
    /// Output is identical for any thread count.
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub threads: usize,
}

impl Default for ThreadingOptions {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

impl ThreadingOptions {
    /// Creates threading options with N threads.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    /// Returns a log message describing the threading configuration.
    #[must_use]
    pub fn log_message(&self) -> String {
        if self.threads == 1 {
            "Single-threaded".to_string()
        } else {
            format!("Using {} threads", self.threads)
        }
    }
}

/// Options for output compression.
///
/// Controls BGZF compression level for BAM output files.
#[derive(Debug, Clone, Args)]
pub struct CompressionOptions {
    /// Compression level for output BAMs (1-12).
    ///
    /// Level 1 is fastest with larger files.
    /// Level 12 produces smallest files but is slowest.
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    pub compression_level: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self { compression_level: DEFAULT_COMPRESSION_LEVEL }
    }
}

/// Options bounding the number of simultaneously open output files.
#[derive(Debug, Clone, Args)]
pub struct OpenFileOptions {
    /// Maximum number of output files held open at once.
    ///
    /// When more groups than this are active, the least recently written idle output is
    /// flushed and closed, and reopened for appending when it next receives a record.
    #[arg(long = "max-open-files", default_value_t = DEFAULT_MAX_OPEN_FILES)]
    pub max_open_files: usize,
}

impl Default for OpenFileOptions {
    fn default() -> Self {
        Self { max_open_files: DEFAULT_MAX_OPEN_FILES }
    }
}
