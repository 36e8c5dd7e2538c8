//! Split a pooled BAM into one BAM per group of cell barcodes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use thiserror::Error;

use cellsplit_lib::barcode_map::load_barcode_map;
use cellsplit_lib::dispatcher::{Dispatcher, RunSummary, SplitConfig};
use cellsplit_lib::logging::{format_count, log_run_summary};
use cellsplit_lib::metrics::{GroupMetric, write_metrics};
use cellsplit_lib::router::DEFAULT_BARCODE_TAG;
use cellsplit_lib::validation::string_to_tag;

use crate::commands::command::Command;
use crate::commands::common::{CompressionOptions, OpenFileOptions, ThreadingOptions};

/// Returned when the run completed but some groups or work units failed.
#[derive(Debug, Error)]
#[error("{failed_groups} group(s) and {failed_units} work unit(s) failed; see the warnings above")]
pub struct PartialFailure {
    /// Number of groups whose output failed.
    pub failed_groups: usize,
    /// Number of work units that stopped early.
    pub failed_units: usize,
}

impl PartialFailure {
    /// Exit status used for partial failures.
    pub const EXIT_CODE: i32 = 3;

    fn from_summary(summary: &RunSummary) -> Self {
        Self {
            failed_groups: summary.failed_groups().count(),
            failed_units: summary.failed_units.len(),
        }
    }
}

/// Splits a BAM file by cell barcode.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "split",
    author,
    version,
    about = "\x1b[38;5;30m[DEMULTIPLEXING]\x1b[0m \x1b[36mSplit a BAM into one BAM per group of cell barcodes\x1b[0m",
    long_about = r#"
Splits a BAM file of pooled single-cell reads into one BAM per group.

Each record's cell barcode is read from a tag (`CB` by default) and looked up in a barcode map
that assigns barcodes to groups (e.g. cells, clusters or samples). Records are written to
`<output>/<group>.bam`. Records whose barcode is not in the map, or whose tag is missing or not
a string, are written to `<output>/unassigned.bam`. Output files are only created for groups
that receive at least one record.

## Barcode Map

The barcode map is either:

1. A tab-separated file with the header `barcode<TAB>group` and one barcode per line, or
2. A JSON file (`.json` extension) of the form `{"group1": ["BARCODE1", "BARCODE2"], ...}`.

A barcode may only be assigned to one group. Group names become file names and may not contain
path separators.

## Output

Every output has the input's header, unchanged, and its records in input order. Records are
not modified.

With `--threads N` the input is divided into N record-aligned ranges which are processed in
parallel; the outputs are identical to a single-threaded run. At most `--max-open-files`
outputs are held open at once; idle outputs are closed and reopened as needed.

If an output cannot be written, the error is reported, the records for that group are dropped,
and the other groups are completed. The tool then exits with status 3.
"#
)]
pub struct Split {
    /// Input BAM file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Barcode map: TSV with `barcode` and `group` columns, or JSON of group to barcodes
    #[arg(short = 'b', long = "barcodes")]
    pub barcodes: PathBuf,

    /// Output directory; created if it does not exist
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Tag holding the cell barcode
    #[arg(long = "tag", default_value = DEFAULT_BARCODE_TAG)]
    pub tag: String,

    /// Optional output file for per-group metrics
    #[arg(short = 'm', long = "metrics")]
    pub metrics: Option<PathBuf>,

    #[command(flatten)]
    pub threading: ThreadingOptions,

    #[command(flatten)]
    pub open_files: OpenFileOptions,

    #[command(flatten)]
    pub compression: CompressionOptions,
}

impl Split {
    fn config(&self) -> Result<SplitConfig> {
        let mut config = SplitConfig::new(&self.input, &self.output);
        config.tag = string_to_tag(&self.tag, "tag")?;
        config.threads = self.threading.threads;
        config.max_open_files = self.open_files.max_open_files;
        config.compression_level = self.compression.compression_level;
        Ok(config)
    }
}

impl Command for Split {
    fn execute(&self, command_line: &str) -> Result<()> {
        info!("Command: {command_line}");
        let config = self.config()?;
        info!("{}", self.threading.log_message());

        let barcode_map = load_barcode_map(&self.barcodes)?;
        info!(
            "Loaded {} barcode(s) for {} group(s) from {}",
            format_count(barcode_map.len() as u64),
            barcode_map.groups().len(),
            self.barcodes.display()
        );

        let summary = Dispatcher::new(config, Arc::new(barcode_map)).run()?;
        log_run_summary(&summary);

        if let Some(path) = &self.metrics {
            let rows = GroupMetric::from_reports(&summary.groups);
            write_metrics(path, &rows, "group")?;
            info!("Wrote metrics for {} group(s) to {}", rows.len(), path.display());
        }

        if summary.is_partial_failure() {
            return Err(PartialFailure::from_summary(&summary).into());
        }
        Ok(())
    }
}
