//! CLI command implementations for cellsplit.
//!
//! - [`split`] - Split a BAM into one BAM per group of cell barcodes

pub mod command;
pub mod common;
pub mod split;
