//! Routing records to groups by their barcode tag.

use std::sync::Arc;

use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;

use crate::barcode_map::{BarcodeMap, GroupId};

/// The default cell barcode tag.
pub const DEFAULT_BARCODE_TAG: &str = "CB";

/// How a record was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// The barcode is in the map.
    Assigned,
    /// The barcode is well formed but not in the map.
    Unassigned,
    /// The tag is missing, not a string, or empty.
    MalformedTag,
}

/// The destination of a record.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    /// Group the record belongs to.
    pub group: &'a GroupId,
    /// Why the record was sent there.
    pub kind: RouteKind,
}

/// Resolves records to groups. Pure and shareable across workers.
#[derive(Debug, Clone)]
pub struct Router {
    map: Arc<BarcodeMap>,
    tag: Tag,
}

impl Router {
    /// Creates a router reading barcodes from `tag`.
    #[must_use]
    pub fn new(map: Arc<BarcodeMap>, tag: Tag) -> Self {
        Self { map, tag }
    }

    /// Routes a record.
    #[must_use]
    pub fn route(&self, record: &RecordBuf) -> Route<'_> {
        match record.data().get(&self.tag) {
            Some(Value::String(barcode)) if !barcode.is_empty() => match self.map.lookup(barcode) {
                Some(group) => Route { group, kind: RouteKind::Assigned },
                None => Route { group: self.map.fallback(), kind: RouteKind::Unassigned },
            },
            _ => Route { group: self.map.fallback(), kind: RouteKind::MalformedTag },
        }
    }
}
