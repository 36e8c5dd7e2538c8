//! Utilities for generating test BAM data and barcode maps programmatically.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use bstr::BString;
use noodles::bam;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record::{Flags, MappingQuality};
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};

/// Fluent builder for single test records.
///
/// Records are unmapped unless a reference sequence and start are set.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    name: Option<String>,
    sequence: Option<String>,
    qualities: Option<Vec<u8>>,
    reference_sequence_id: Option<usize>,
    alignment_start: Option<usize>,
    mapping_quality: u8,
    tags: Vec<(Tag, BufValue)>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self { mapping_quality: 60, ..Self::default() }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn sequence(mut self, sequence: &str) -> Self {
        self.sequence = Some(sequence.to_string());
        self
    }

    pub fn qualities(mut self, qualities: &[u8]) -> Self {
        self.qualities = Some(qualities.to_vec());
        self
    }

    pub fn reference_sequence_id(mut self, id: usize) -> Self {
        self.reference_sequence_id = Some(id);
        self
    }

    pub fn alignment_start(mut self, start: usize) -> Self {
        self.alignment_start = Some(start);
        self
    }

    pub fn mapping_quality(mut self, mapq: u8) -> Self {
        self.mapping_quality = mapq;
        self
    }

    pub fn tag<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        let bytes = tag.as_bytes();
        assert_eq!(bytes.len(), 2, "tags are two characters");
        self.tags.push((Tag::new(bytes[0], bytes[1]), value.into()));
        self
    }

    pub fn build(self) -> RecordBuf {
        let sequence = self.sequence.unwrap_or_else(|| "ACGTACGTAC".to_string());
        let qualities = self.qualities.unwrap_or_else(|| vec![30; sequence.len()]);

        let mut record = RecordBuf::default();
        *record.name_mut() = self.name.map(BString::from);
        *record.quality_scores_mut() = QualityScores::from(qualities);

        match (self.reference_sequence_id, self.alignment_start) {
            (Some(id), Some(start)) => {
                *record.flags_mut() = Flags::empty();
                *record.reference_sequence_id_mut() = Some(id);
                *record.alignment_start_mut() = Some(Position::try_from(start).unwrap());
                *record.cigar_mut() = [Op::new(Kind::Match, sequence.len())].into_iter().collect();
                *record.mapping_quality_mut() = MappingQuality::new(self.mapping_quality);
            }
            _ => *record.flags_mut() = Flags::UNMAPPED,
        }
        *record.sequence_mut() = Sequence::from(sequence.into_bytes());

        for (tag, value) in self.tags {
            record.data_mut().insert(tag, value);
        }
        record
    }
}

/// Creates a header with one reference sequence and a comment line.
pub fn create_minimal_header(ref_name: &str, ref_len: usize) -> Header {
    use noodles::sam::header::record::value::{Map, map::ReferenceSequence};
    use std::num::NonZeroUsize;

    let reference_sequence = Map::<ReferenceSequence>::new(
        NonZeroUsize::new(ref_len).expect("reference length must be non-zero"),
    );

    Header::builder()
        .add_reference_sequence(BString::from(ref_name), reference_sequence)
        .add_comment("pooled single-cell library")
        .build()
}

/// A mapped read on reference 0 carrying `barcode` in the `CB` tag (or no tag at all).
pub fn cell_read(name: &str, barcode: Option<&str>, position: usize) -> RecordBuf {
    let builder = RecordBuilder::new()
        .name(name)
        .reference_sequence_id(0)
        .alignment_start(position)
        .tag("UB", "GATTACA");
    match barcode {
        Some(barcode) => builder.tag("CB", barcode).build(),
        None => builder.build(),
    }
}

/// Creates `count` reads named `r000000`, `r000001`, ... cycling through `barcodes`.
///
/// Read `i` gets `barcodes[(i * 7) % barcodes.len()]`: neighbouring reads go to different
/// barcodes, and each barcode gets the same number of reads when `count` is a multiple of
/// `barcodes.len()` (and the length is coprime to 7).
pub fn create_cell_reads(count: usize, barcodes: &[&str]) -> Vec<RecordBuf> {
    (0..count)
        .map(|i| {
            let barcode = barcodes[(i * 7) % barcodes.len()];
            cell_read(&format!("r{i:06}"), Some(barcode), 100 + i % 5000)
        })
        .collect()
}

/// Writes `records` to a BAM at `path`.
pub fn write_bam(path: &Path, header: &Header, records: &[RecordBuf]) {
    let mut writer =
        bam::io::Writer::new(fs::File::create(path).expect("Failed to create BAM file"));
    writer.write_header(header).expect("Failed to write header");
    for record in records {
        writer.write_alignment_record(header, record).expect("Failed to write record");
    }
    writer.finish(header).expect("Failed to finish BAM");
}

/// Reads a BAM, returning its header and records.
pub fn read_bam(path: &Path) -> (Header, Vec<RecordBuf>) {
    let mut reader = bam::io::Reader::new(fs::File::open(path).expect("Failed to open BAM"));
    let header = reader.read_header().expect("Failed to read header");
    let records = reader
        .record_bufs(&header)
        .collect::<std::io::Result<Vec<_>>>()
        .expect("Failed to read records");
    (header, records)
}

/// Reads the record names of a BAM, in file order.
pub fn read_names(path: &Path) -> Vec<String> {
    read_bam(path)
        .1
        .iter()
        .map(|record| record.name().map(ToString::to_string).unwrap_or_default())
        .collect()
}

/// Writes a two-column barcode TSV with a header line.
pub fn write_barcode_tsv(path: &Path, pairs: &[(&str, &str)]) {
    let mut text = String::from("barcode\tgroup\n");
    for (barcode, group) in pairs {
        text.push_str(&format!("{barcode}\t{group}\n"));
    }
    fs::write(path, text).expect("Failed to write barcode TSV");
}

/// Writes a barcode JSON file of the form `{"group": ["barcode", ...]}`.
pub fn write_barcode_json(path: &Path, groups: &[(&str, &[&str])]) {
    let map: serde_json::Map<String, serde_json::Value> = groups
        .iter()
        .map(|(group, barcodes)| ((*group).to_string(), serde_json::json!(barcodes)))
        .collect();
    fs::write(path, serde_json::to_string_pretty(&map).unwrap())
        .expect("Failed to write barcode JSON");
}
