//! Input validation utilities
//!
//! Checks run before any record is read: the input must be a readable file, the output
//! directory must exist (or be creatable) and accept new files, and numeric and tag parameters
//! must be in range.

use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use noodles::sam::alignment::record::data::field::Tag;

use crate::errors::{Result, SplitError};

/// Validate that the input is an existing, readable file.
///
/// # Errors
///
/// Returns [`SplitError::InputUnreadable`] if the path does not exist, is a directory, or
/// cannot be opened.
///
/// # Example
/// ```
/// use cellsplit_lib::validation::validate_input_file;
///
/// assert!(validate_input_file("/nonexistent/input.bam").is_err());
/// ```
pub fn validate_input_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path_ref = path.as_ref();
    let unreadable = |reason: String| SplitError::InputUnreadable {
        path: path_ref.display().to_string(),
        reason,
    };

    if !path_ref.exists() {
        return Err(unreadable("File does not exist".to_string()));
    }
    if path_ref.is_dir() {
        return Err(unreadable("Path is a directory".to_string()));
    }
    File::open(path_ref).map_err(|e| unreadable(e.to_string()))?;
    Ok(())
}

/// Create the output directory if needed and check that files can be created in it.
///
/// # Errors
///
/// Returns [`SplitError::OutputUnusable`] if the path exists but is not a directory, cannot
/// be created, or does not accept new files.
pub fn prepare_output_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path_ref = path.as_ref();
    let unusable = |reason: String| SplitError::OutputUnusable {
        path: path_ref.display().to_string(),
        reason,
    };

    if path_ref.exists() && !path_ref.is_dir() {
        return Err(unusable("Path exists and is not a directory".to_string()));
    }
    std::fs::create_dir_all(path_ref).map_err(|e| unusable(e.to_string()))?;

    tempfile::Builder::new()
        .prefix(".cellsplit-probe-")
        .tempfile_in(path_ref)
        .map_err(|e| unusable(format!("Directory is not writable: {e}")))?;
    Ok(())
}

/// Validate that a SAM tag is exactly two alphanumeric characters and convert it.
///
/// # Errors
///
/// Returns [`SplitError::InvalidParameter`] otherwise.
///
/// # Example
/// ```
/// use cellsplit_lib::validation::string_to_tag;
///
/// assert!(string_to_tag("CB", "tag").is_ok());
/// assert!(string_to_tag("CBX", "tag").is_err());
/// ```
pub fn string_to_tag(tag: &str, name: &str) -> Result<Tag> {
    let bytes = tag.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_alphanumeric) {
        return Err(SplitError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("Tag must be exactly 2 alphanumeric characters, got: '{tag}'"),
        });
    }
    Ok(Tag::from([bytes[0], bytes[1]]))
}

/// Validate that `value` lies in `min..=max`.
///
/// # Errors
///
/// Returns [`SplitError::InvalidParameter`] if it does not.
#[allow(clippy::needless_pass_by_value)]
pub fn validate_range<T: PartialOrd + Display>(value: T, min: T, max: T, name: &str) -> Result<()> {
    if value < min || value > max {
        return Err(SplitError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("{name} must be between {min} and {max}, got {value}"),
        });
    }
    Ok(())
}

/// Validate that `value` is at least `min`.
///
/// # Errors
///
/// Returns [`SplitError::InvalidParameter`] if it is smaller.
#[allow(clippy::needless_pass_by_value)]
pub fn validate_at_least<T: PartialOrd + Display>(value: T, min: T, name: &str) -> Result<()> {
    if value < min {
        return Err(SplitError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("{name} must be >= {min}, got {value}"),
        });
    }
    Ok(())
}
