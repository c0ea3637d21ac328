//! CLI argument parsing using clap.

use clap::{
    Args, Parser, Subcommand, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::{PollStrategyKind, Settings};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Per-file change notifications
#[derive(Parser)]
#[command(
    name = "vigil",
    version = env!("CARGO_PKG_VERSION"),
    about = "Report writes, deletes and renames on watched files",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch files until interrupted
    #[command(about = "Watch paths and print a line per change")]
    Watch(WatchArgs),

    /// Display active settings
    Config,

    /// Set up .vigil directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Blocking,
    Interval,
}

impl From<StrategyArg> for PollStrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Blocking => PollStrategyKind::Blocking,
            StrategyArg::Interval => PollStrategyKind::Interval,
        }
    }
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Paths to watch (defaults to every entry under the watch root)
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Directory whose entries are watched when no paths are given
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// How loops wait for events (overrides config)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Wait timeout or idle delay in milliseconds (overrides config)
    #[arg(long = "interval-ms")]
    pub interval_ms: Option<u64>,

    /// Maximum events fetched per wait (overrides config)
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Also report attribute changes
    #[arg(long)]
    pub attributes: bool,
}

impl WatchArgs {
    /// Apply explicitly given flags on top of loaded settings.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        let watch = &mut settings.watch;
        if let Some(root) = &self.root {
            watch.root = root.clone();
        }
        if let Some(strategy) = self.strategy {
            watch.strategy = strategy.into();
        }
        if let Some(interval_ms) = self.interval_ms {
            watch.poll_interval_ms = interval_ms;
        }
        if let Some(max_events) = self.max_events {
            watch.max_events = max_events;
        }
        if self.attributes {
            watch.include_attributes = true;
        }
    }
}
