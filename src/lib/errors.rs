//! Custom error types for cellsplit operations.
//!
//! Every variant here is fatal to a run. Per-record decode failures, malformed barcode tags
//! and per-group write failures are absorbed by the engine and only surface through
//! [`crate::dispatcher::RunSummary`].

use thiserror::Error;

/// Result type alias for cellsplit operations
pub type Result<T> = std::result::Result<T, SplitError>;

/// Error type for cellsplit operations
#[derive(Error, Debug)]
pub enum SplitError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// The input file is missing or cannot be opened
    #[error("Cannot read input '{path}': {reason}")]
    InputUnreadable {
        /// Path to the input
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// The output directory cannot be created or written
    #[error("Cannot use output directory '{path}': {reason}")]
    OutputUnusable {
        /// Path to the output directory
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// File format error (bad BGZF container, BAM magic or header)
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// The open-file budget cannot be satisfied, even after eviction
    #[error("Cannot open output stream for group '{group}': open-file budget of {budget} cannot be satisfied")]
    Resource {
        /// Group whose stream could not be opened
        group: String,
        /// The configured maximum number of open files
        budget: usize,
    },

    /// A group label that cannot be used as an output file name
    #[error("Invalid group label '{label}': {reason}")]
    InvalidGroupLabel {
        /// The offending label
        label: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A barcode that cannot be used as a map key
    #[error("Invalid barcode '{barcode}' for group '{group}': {reason}")]
    InvalidBarcode {
        /// The offending barcode
        barcode: String,
        /// The group it was assigned to
        group: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A barcode assigned to more than one group
    #[error("Barcode '{barcode}' is assigned to both '{first}' and '{second}'")]
    DuplicateBarcode {
        /// The duplicated barcode
        barcode: String,
        /// First group the barcode was assigned to
        first: String,
        /// Conflicting group
        second: String,
    },
}

impl SplitError {
    /// True for errors caused by configuration (paths, parameters) rather than data.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::InputUnreadable { .. } | Self::OutputUnusable { .. }
        )
    }

    /// True for errors caused by an unparseable input container.
    #[must_use]
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::InvalidFileFormat { .. })
    }
}
