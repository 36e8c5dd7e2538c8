//! End-to-end CLI tests for the split command.
//!
//! These tests run the actual `cellsplit split` binary and validate:
//! 1. Splitting with TSV and JSON barcode maps
//! 2. Metrics output
//! 3. Exit statuses for partial and fatal failures

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

use crate::helpers::bam_generator::{
    RecordBuilder, cell_read, create_cell_reads, create_minimal_header, read_names, write_bam,
    write_barcode_json, write_barcode_tsv,
};
use crate::helpers::{assert_in_input_order, assert_output_files};

const BARCODES: [&str; 4] = ["AAAACCCC", "CCCCGGGG", "GGGGTTTT", "TTTTAAAA"];

fn run_split(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cellsplit"))
        .arg("split")
        .args(args)
        .output()
        .expect("Failed to run split command")
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn setup(dir: &TempDir, records: usize) -> (std::path::PathBuf, std::path::PathBuf) {
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    write_bam(&input, &header, &create_cell_reads(records, &BARCODES));

    let barcodes = dir.path().join("barcodes.tsv");
    write_barcode_tsv(
        &barcodes,
        &[("AAAACCCC", "T_cells"), ("CCCCGGGG", "T_cells"), ("GGGGTTTT", "B_cells")],
    );
    (input, barcodes)
}

#[test]
fn test_split_command_basic() {
    let dir = TempDir::new().unwrap();
    let (input, barcodes) = setup(&dir, 100);
    let out = dir.path().join("out");

    let output = run_split(&[
        "--input",
        path_str(&input),
        "--barcodes",
        path_str(&barcodes),
        "--output",
        path_str(&out),
        "--compression-level",
        "1",
    ]);

    assert!(output.status.success(), "split failed: {}", String::from_utf8_lossy(&output.stderr));
    assert_output_files(&out, &["B_cells.bam", "T_cells.bam", "unassigned.bam"]);
    assert_eq!(read_names(&out.join("T_cells.bam")).len(), 50);
    assert_eq!(read_names(&out.join("B_cells.bam")).len(), 25);
    assert_eq!(read_names(&out.join("unassigned.bam")).len(), 25);
}

#[test]
fn test_split_command_json_map_and_threads() {
    let dir = TempDir::new().unwrap();
    let (input, _) = setup(&dir, 30_000);
    let barcodes = dir.path().join("clusters.json");
    write_barcode_json(
        &barcodes,
        &[("cluster_1", &["AAAACCCC", "TTTTAAAA"][..]), ("cluster_2", &["GGGGTTTT"][..])],
    );
    let out = dir.path().join("out");

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&out),
        "--threads",
        "4",
        "--max-open-files",
        "2",
    ]);

    assert!(output.status.success(), "split failed: {}", String::from_utf8_lossy(&output.stderr));
    assert_output_files(&out, &["cluster_1.bam", "cluster_2.bam", "unassigned.bam"]);
    let cluster_1 = read_names(&out.join("cluster_1.bam"));
    assert_eq!(cluster_1.len(), 15_000);
    assert_in_input_order(&cluster_1);
}

#[test]
fn test_split_command_metrics() {
    let dir = TempDir::new().unwrap();
    let (input, barcodes) = setup(&dir, 100);
    let out = dir.path().join("out");
    let metrics = dir.path().join("metrics.tsv");

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&out),
        "--metrics",
        path_str(&metrics),
    ]);
    assert!(output.status.success());

    let text = fs::read_to_string(&metrics).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "group\trecords\tdropped\tfailed");
    assert_eq!(lines[1], "B_cells\t25\t0\tfalse");
    assert_eq!(lines[2], "T_cells\t50\t0\tfalse");
    assert_eq!(lines[3], "unassigned\t25\t0\tfalse");
    assert_eq!(lines.len(), 4);
}

#[test]
fn test_split_command_custom_tag() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    let header = create_minimal_header("chr1", 10_000);
    let records = vec![
        RecordBuilder::new().name("a").tag("XC", "AAAACCCC").build(),
        RecordBuilder::new().name("b").tag("CB", "AAAACCCC").build(),
    ];
    write_bam(&input, &header, &records);
    let barcodes = dir.path().join("barcodes.tsv");
    write_barcode_tsv(&barcodes, &[("AAAACCCC", "cell_1")]);
    let out = dir.path().join("out");

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&out),
        "--tag",
        "XC",
    ]);
    assert!(output.status.success());
    assert_eq!(read_names(&out.join("cell_1.bam")), vec!["a"]);
    assert_eq!(read_names(&out.join("unassigned.bam")), vec!["b"]);
}

#[test]
fn test_split_command_partial_failure_exit_code() {
    let dir = TempDir::new().unwrap();
    let (input, barcodes) = setup(&dir, 100);
    let out = dir.path().join("out");
    fs::create_dir_all(out.join("B_cells.bam")).unwrap();

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&out),
    ]);

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(read_names(&out.join("T_cells.bam")).len(), 50);
}

#[test]
fn test_split_command_missing_input() {
    let dir = TempDir::new().unwrap();
    let barcodes = dir.path().join("barcodes.tsv");
    write_barcode_tsv(&barcodes, &[("AAAACCCC", "cell_1")]);

    let output = run_split(&[
        "-i",
        path_str(&dir.path().join("missing.bam")),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&dir.path().join("out")),
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.bam"));
}

#[test]
fn test_split_command_invalid_tag() {
    let dir = TempDir::new().unwrap();
    let (input, barcodes) = setup(&dir, 10);

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&dir.path().join("out")),
        "--tag",
        "CELL",
    ]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_split_command_duplicate_barcode() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    write_bam(&input, &create_minimal_header("chr1", 10_000), &[cell_read("a", Some("AAAA"), 1)]);
    let barcodes = dir.path().join("barcodes.tsv");
    write_barcode_tsv(&barcodes, &[("AAAA", "cell_1"), ("AAAA", "cell_2")]);

    let output = run_split(&[
        "-i",
        path_str(&input),
        "-b",
        path_str(&barcodes),
        "-o",
        path_str(&dir.path().join("out")),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("AAAA"));
}

#[test]
fn test_split_command_not_a_bam() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bam");
    fs::write(&input, b"this is not a BAM file").unwrap();
    let barcodes = dir.path().join("barcodes.tsv");
    write_barcode_tsv(&barcodes, &[("AAAA", "cell_1")]);
    let out = dir.path().join("out");

    let output = run_split(&["-i", path_str(&input), "-b", path_str(&barcodes), "-o", path_str(&out)]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!out.exists());
}
