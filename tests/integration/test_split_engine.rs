//! End-to-end tests of the split engine through the library API.
//!
//! These tests run [`Dispatcher`] on generated BAMs and validate:
//! 1. Partition completeness and single destination
//! 2. Header propagation and record fidelity
//! 3. Order preservation and thread-count invariance
//! 4. Bounded open files with many groups

use std::collections::BTreeMap;
use std::sync::Arc;

use cellsplit_lib::barcode_map::BarcodeMap;
use cellsplit_lib::dispatcher::{Dispatcher, SplitConfig};
use cellsplit_lib::errors::SplitError;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value;
use rstest::rstest;
use tempfile::TempDir;

use crate::helpers::{
    assert_cb_tag, assert_group_barcodes, assert_in_input_order, assert_output_files, cell_read,
    create_cell_reads, create_minimal_header, read_bam, read_names, write_bam,
};

const BARCODES: [&str; 6] = ["AAAACCCC", "AAAAGGGG", "CCCCTTTT", "GGGGAAAA", "TTTTCCCC", "NNNNNNNN"];

fn cluster_map() -> Arc<BarcodeMap> {
    Arc::new(
        BarcodeMap::from_pairs([
            ("AAAACCCC", "cluster_1"),
            ("AAAAGGGG", "cluster_1"),
            ("CCCCTTTT", "cluster_2"),
            ("GGGGAAAA", "cluster_3"),
        ])
        .unwrap(),
    )
}

#[test]
fn test_scenario_known_and_unknown_barcodes() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(
        &input,
        &header,
        &[
            cell_read("read1", Some("AAAA"), 100),
            cell_read("read2", Some("BBBB"), 200),
            cell_read("read3", Some("AAAA"), 300),
        ],
    );
    let out = dir.path().join("out");
    let map = Arc::new(BarcodeMap::from_pairs([("AAAA", "groupX")]).unwrap());

    let summary = Dispatcher::new(SplitConfig::new(&input, &out), map).run().unwrap();

    assert_output_files(&out, &["groupX.bam", "unassigned.bam"]);
    assert_eq!(read_names(&out.join("groupX.bam")), vec!["read1", "read3"]);
    assert_eq!(read_names(&out.join("unassigned.bam")), vec!["read2"]);
    assert_eq!(summary.records_read, 3);
    assert_eq!(summary.records_skipped, 0);
    assert_eq!(summary.malformed_tags, 0);
}

#[test]
fn test_missing_tag_goes_to_unassigned() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(
        &input,
        &header,
        &[cell_read("read1", None, 100), cell_read("read2", Some("AAAACCCC"), 200)],
    );
    let out = dir.path().join("out");

    let summary = Dispatcher::new(SplitConfig::new(&input, &out), cluster_map()).run().unwrap();
    assert_eq!(summary.malformed_tags, 1);
    assert_eq!(read_names(&out.join("unassigned.bam")), vec!["read1"]);
    assert_eq!(read_names(&out.join("cluster_1.bam")), vec!["read2"]);
}

#[test]
fn test_headers_are_propagated_verbatim() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr7", 159_345_973);
    write_bam(&input, &header, &create_cell_reads(50, &BARCODES));
    let out = dir.path().join("out");

    Dispatcher::new(SplitConfig::new(&input, &out), cluster_map()).run().unwrap();

    let (input_header, _) = read_bam(&input);
    for name in ["cluster_1.bam", "cluster_2.bam", "cluster_3.bam", "unassigned.bam"] {
        let (output_header, _) = read_bam(&out.join(name));
        assert_eq!(output_header, input_header, "header of {name} differs from the input");
    }
}

#[test]
fn test_records_are_unchanged() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(200, &BARCODES));
    let out = dir.path().join("out");

    Dispatcher::new(SplitConfig::new(&input, &out), cluster_map()).run().unwrap();

    let (_, input_records) = read_bam(&input);
    let map = cluster_map();
    let mut expected: BTreeMap<String, Vec<RecordBuf>> = BTreeMap::new();
    for record in input_records {
        let Some(Value::String(barcode)) = record.data().get(&Tag::CELL_BARCODE_ID) else {
            panic!("generated reads carry a barcode");
        };
        let group = map.resolve(barcode).label().to_string();
        expected.entry(group).or_default().push(record);
    }

    for (group, records) in expected {
        let (_, output_records) = read_bam(&out.join(format!("{group}.bam")));
        assert_eq!(output_records, records, "records of {group} differ from the input");
    }

    let (_, cluster_2) = read_bam(&out.join("cluster_2.bam"));
    for record in &cluster_2 {
        assert_cb_tag(record, "CCCCTTTT");
    }
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(8)]
fn test_thread_count_invariance(#[case] threads: usize) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(40_000, &BARCODES));

    let single = dir.path().join("single");
    let one = Dispatcher::new(SplitConfig::new(&input, &single), cluster_map()).run().unwrap();

    let multi = dir.path().join("multi");
    let mut config = SplitConfig::new(&input, &multi);
    config.threads = threads;
    let many = Dispatcher::new(config, cluster_map()).run().unwrap();

    assert_eq!(one.records_read, 40_000);
    assert_eq!(many.records_read, one.records_read);
    assert_eq!(many.records_written, one.records_written);
    assert_output_files(
        &multi,
        &["cluster_1.bam", "cluster_2.bam", "cluster_3.bam", "unassigned.bam"],
    );

    for name in ["cluster_1.bam", "cluster_2.bam", "cluster_3.bam", "unassigned.bam"] {
        let expected = read_names(&single.join(name));
        let actual = read_names(&multi.join(name));
        assert_in_input_order(&actual);
        assert_eq!(actual, expected, "{name} differs with {threads} threads");
    }
    assert_group_barcodes(&multi.join("cluster_1.bam"), &["AAAACCCC", "AAAAGGGG"]);
}

#[test]
fn test_partition_is_complete() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(25_000, &BARCODES));
    let out = dir.path().join("out");

    let mut config = SplitConfig::new(&input, &out);
    config.threads = 3;
    let summary = Dispatcher::new(config, cluster_map()).run().unwrap();

    assert_eq!(
        summary.records_written + summary.records_skipped + summary.records_dropped,
        summary.records_read
    );
    let total: u64 = summary.groups.iter().map(|g| g.records).sum();
    assert_eq!(total, summary.records_written);

    let mut names: Vec<String> = summary
        .groups
        .iter()
        .flat_map(|g| read_names(&g.path))
        .collect();
    assert_eq!(names.len(), 25_000);
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 25_000, "a record was written to more than one group");
}

#[test]
fn test_many_groups_with_small_budget() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);

    let barcodes: Vec<String> = (0..300).map(|i| format!("BC{i:04}")).collect();
    let barcode_refs: Vec<&str> = barcodes.iter().map(String::as_str).collect();
    write_bam(&input, &header, &create_cell_reads(12_000, &barcode_refs));

    let map = BarcodeMap::from_pairs(
        barcodes.iter().enumerate().map(|(i, bc)| (bc.clone(), format!("cell_{i:03}"))),
    )
    .unwrap();
    let out = dir.path().join("out");
    let mut config = SplitConfig::new(&input, &out);
    config.threads = 4;
    config.max_open_files = 8;

    let summary = Dispatcher::new(config, Arc::new(map)).run().unwrap();
    assert!(!summary.is_partial_failure());
    assert_eq!(summary.groups.len(), 300);
    assert_eq!(summary.records_written, 12_000);
    for report in &summary.groups {
        let names = read_names(&report.path);
        assert_eq!(names.len() as u64, report.records);
        assert_in_input_order(&names);
    }
}

#[test]
fn test_zero_budget_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(10, &BARCODES));

    let mut config = SplitConfig::new(&input, dir.path().join("out"));
    config.max_open_files = 0;
    let error = Dispatcher::new(config, cluster_map()).run().unwrap_err();
    assert!(matches!(error, SplitError::Resource { budget: 0, .. }));
}

#[test]
fn test_unwritable_group_does_not_stop_others() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(1_000, &BARCODES));
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("cluster_2.bam")).unwrap();

    let summary = Dispatcher::new(SplitConfig::new(&input, &out), cluster_map()).run().unwrap();

    assert!(summary.is_partial_failure());
    let failed: Vec<&str> = summary.failed_groups().map(|g| g.group.label()).collect();
    assert_eq!(failed, vec!["cluster_2"]);
    assert!(summary.records_dropped > 0);
    for name in ["cluster_1.bam", "cluster_3.bam", "unassigned.bam"] {
        assert!(!read_names(&out.join(name)).is_empty(), "{name} should be complete");
    }
}
