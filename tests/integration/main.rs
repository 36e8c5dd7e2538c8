//! Integration tests for cellsplit.
//!
//! These tests validate end-to-end workflows that span multiple modules,
//! ensuring that module interactions work correctly.

mod test_split_command;
mod test_split_engine;
