//! Barcode to group lookup.
//!
//! A [`BarcodeMap`] is built once from an already-parsed mapping and is read-only afterwards,
//! so it can be shared between worker threads behind an `Arc` without locking. Lookups are a
//! single hash probe and never fail: barcodes that are absent from the map, or empty, resolve
//! to the reserved [`GroupId::unassigned`] group.
//!
//! The loader at the bottom of this module ([`load_barcode_map`]) reads either a two-column
//! TSV (`barcode`, `group`) or a JSON object of `{"group": ["barcode", ...]}`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Context;
use fgoxide::io::DelimFile;
use serde::Deserialize;

use crate::errors::{Result, SplitError};

/// Label of the fallback group that collects records without a resolvable barcode.
pub const UNASSIGNED_LABEL: &str = "unassigned";

/// File extension of per-group outputs.
pub const OUTPUT_EXTENSION: &str = "bam";

/// Identifier of an output group.
///
/// The label doubles as the output file stem, so construction rejects anything that would not
/// be a plain file name. Cloning is cheap (shared string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Arc<str>);

impl GroupId {
    /// Creates a group identifier from a label.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidGroupLabel`] if the label is empty, is `.` or `..`, or
    /// contains a path separator or NUL byte.
    pub fn new(label: &str) -> Result<Self> {
        let reason = if label.is_empty() {
            Some("label is empty")
        } else if label == "." || label == ".." {
            Some("label is a relative directory name")
        } else if label.contains(['/', '\\']) {
            Some("label contains a path separator")
        } else if label.contains('\0') {
            Some("label contains a NUL byte")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(SplitError::InvalidGroupLabel {
                label: label.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(Self(Arc::from(label))),
        }
    }

    /// The reserved fallback group.
    #[must_use]
    pub fn unassigned() -> Self {
        Self(Arc::from(UNASSIGNED_LABEL))
    }

    /// The group label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.0
    }

    /// True for the reserved fallback group.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        &*self.0 == UNASSIGNED_LABEL
    }

    /// Output file name for this group, e.g. `cluster_1.bam`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{OUTPUT_EXTENSION}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable barcode to group mapping with a fallback group.
#[derive(Debug, Clone)]
pub struct BarcodeMap {
    lookup: AHashMap<Vec<u8>, GroupId>,
    fallback: GroupId,
}

impl BarcodeMap {
    /// Builds a map from `(barcode, group label)` pairs.
    ///
    /// The same barcode may appear more than once as long as it always names the same group.
    ///
    /// # Errors
    ///
    /// Returns an error if a label is not a valid file name, a barcode is empty or contains
    /// whitespace, or a barcode is assigned to two different groups.
    pub fn from_pairs<I, B, G>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (B, G)>,
        B: AsRef<str>,
        G: AsRef<str>,
    {
        // Interning keeps one Arc per distinct label however many barcodes point at it.
        let mut interned: AHashMap<String, GroupId> = AHashMap::new();
        let mut lookup: AHashMap<Vec<u8>, GroupId> = AHashMap::new();

        for (barcode, label) in pairs {
            let barcode = barcode.as_ref();
            let label = label.as_ref();

            let group = match interned.get(label) {
                Some(group) => group.clone(),
                None => {
                    let group = GroupId::new(label)?;
                    interned.insert(label.to_string(), group.clone());
                    group
                }
            };

            validate_barcode(barcode, label)?;

            match lookup.get(barcode.as_bytes()) {
                Some(existing) if *existing != group => {
                    return Err(SplitError::DuplicateBarcode {
                        barcode: barcode.to_string(),
                        first: existing.label().to_string(),
                        second: label.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    lookup.insert(barcode.as_bytes().to_vec(), group);
                }
            }
        }

        Ok(Self { lookup, fallback: GroupId::unassigned() })
    }

    /// Builds a map from `group label -> barcodes`, the layout used by barcode JSON files.
    ///
    /// Groups are visited in label order so duplicate-barcode errors are reproducible.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BarcodeMap::from_pairs`].
    pub fn from_groups<G, B>(groups: &BTreeMap<G, Vec<B>>) -> Result<Self>
    where
        G: AsRef<str>,
        B: AsRef<str>,
    {
        Self::from_pairs(groups.iter().flat_map(|(label, barcodes)| {
            barcodes.iter().map(move |barcode| (barcode.as_ref(), label.as_ref()))
        }))
    }

    /// Resolves a barcode to its group, falling back to `unassigned`.
    #[inline]
    #[must_use]
    pub fn resolve(&self, barcode: &[u8]) -> &GroupId {
        self.lookup(barcode).unwrap_or(&self.fallback)
    }

    /// Returns the group for a barcode only if the map contains it.
    #[inline]
    #[must_use]
    pub fn lookup(&self, barcode: &[u8]) -> Option<&GroupId> {
        if barcode.is_empty() {
            return None;
        }
        self.lookup.get(barcode)
    }

    /// The fallback group.
    #[must_use]
    pub fn fallback(&self) -> &GroupId {
        &self.fallback
    }

    /// Number of barcodes in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// True if the map holds no barcodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Distinct groups named by the map, sorted by label.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.lookup.values().cloned().collect();
        groups.sort();
        groups.dedup();
        groups
    }
}

fn validate_barcode(barcode: &str, group: &str) -> Result<()> {
    let reason = if barcode.is_empty() {
        Some("barcode is empty")
    } else if barcode.bytes().any(|b| b.is_ascii_whitespace()) {
        Some("barcode contains whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SplitError::InvalidBarcode {
            barcode: barcode.to_string(),
            group: group.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// One row of a barcode TSV file.
#[derive(Debug, Deserialize)]
struct BarcodeRow {
    barcode: String,
    group: String,
}

/// Loads a barcode map from disk.
///
/// Files ending in `.json` are read as `{"group": ["barcode", ...]}`. Anything else is read as
/// a tab-separated file with a `barcode` and a `group` column (header line required).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the mapping is invalid.
pub fn load_barcode_map(path: &Path) -> anyhow::Result<BarcodeMap> {
    let is_json =
        path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let file = File::open(path)
            .with_context(|| format!("Failed to open barcode file: {}", path.display()))?;
        let groups: BTreeMap<String, Vec<String>> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse barcode JSON: {}", path.display()))?;
        Ok(BarcodeMap::from_groups(&groups)?)
    } else {
        let path_buf = path.to_path_buf();
        let rows: Vec<BarcodeRow> = DelimFile::default()
            .read_tsv(&path_buf)
            .with_context(|| format!("Failed to read barcode TSV: {}", path.display()))?;
        Ok(BarcodeMap::from_pairs(
            rows.iter().map(|row| (row.barcode.trim(), row.group.trim())),
        )?)
    }
}
