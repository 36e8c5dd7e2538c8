#![deny(unsafe_code)]
pub mod commands;
mod version;

use clap::Parser;
use clap::builder::styling::{AnsiColor, Effects, Styles};

/// Custom styles for CLI help output
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());
use commands::command::Command;
use commands::split::{PartialFailure, Split};
use enum_dispatch::enum_dispatch;
use env_logger::Env;
use log::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(styles = STYLES)]
struct Args {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[enum_dispatch(Command)]
#[derive(Parser, Debug)]
#[command(version)]
enum Subcommand {
    #[command(display_order = 1)]
    Split(Split),
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let args = Args::parse();

    info!("Running cellsplit version {}", version::VERSION.as_str());
    if let Err(e) = args.subcommand.execute(&command_line) {
        if let Some(partial) = e.downcast_ref::<PartialFailure>() {
            error!("{partial}");
            std::process::exit(PartialFailure::EXIT_CODE);
        }
        error!("{e:#}");
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
