//! Watch command: one loop per path until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::cli::args::WatchArgs;
use crate::config::Settings;
use crate::discovery;
use crate::watcher::{LogDispatcher, LoopExit, WatchOptions, Watcher};

/// Resolve the paths to watch: explicit arguments, else the root's entries.
pub fn resolve_paths(args: &WatchArgs, settings: &Settings) -> Result<Vec<PathBuf>> {
    if !args.paths.is_empty() {
        return Ok(args.paths.clone());
    }
    let root = &settings.watch.root;
    let entries = discovery::list_entries(root)
        .with_context(|| format!("listing watch root {}", root.display()))?;
    if entries.is_empty() {
        bail!("nothing to watch under {}", root.display());
    }
    Ok(entries)
}

pub async fn run(args: WatchArgs, settings: Settings) -> Result<()> {
    settings.validate()?;
    let paths = resolve_paths(&args, &settings)?;

    let options = WatchOptions::from_config(&settings.watch);
    let watcher = Watcher::new(options, Arc::new(LogDispatcher))?;

    let report = watcher.watch_all(&paths);
    if report.all_failed() {
        bail!("none of the {} paths could be watched", report.failed.len());
    }
    crate::log_event!(
        "watch",
        "ready",
        "{} watched, {} failed",
        report.started.len(),
        report.failed.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    crate::log_event!("watch", "interrupted");

    let outcomes = tokio::task::spawn_blocking(move || watcher.shutdown()).await?;
    for outcome in outcomes {
        match &outcome.exit {
            LoopExit::Cancelled => crate::debug_event!(
                "watch",
                "stopped",
                "{} after {} polls, {} dispatched",
                outcome.path.display(),
                outcome.stats.polls,
                outcome.stats.dispatched
            ),
            exit => tracing::warn!("[watch] {}: {exit}", outcome.path.display()),
        }
    }
    Ok(())
}
