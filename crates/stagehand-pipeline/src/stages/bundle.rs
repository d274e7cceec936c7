use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use stagehand_tools::toolchain::{BundleConfig, BundleResult};
use stagehand_types::{Result, StageKind, StageStatus, StagehandError};
use tokio::sync::mpsc;

use crate::entries::discover_entries;
use crate::events::StageEvent;
use crate::reporters::{report_bundle_fatal, report_bundle_stats, PathFixup};
use crate::sink::DiagnosticSink;
use crate::stage::{complete, Stage, StageContext, StageDescriptor, StageOptions, StageReport};

/// Quiet period after a change before a watch rebuild starts.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Shared bundling round
// ---------------------------------------------------------------------------

/// Discover entries, bundle them, and route the result through the sink.
/// Flushes exactly once.
async fn bundle_round(
    ctx: &StageContext,
    kind: StageKind,
    show_stats: Option<bool>,
) -> Result<StageReport> {
    let mut sink = ctx.sink(kind)?;
    let layout = &ctx.layout;
    let env = ctx.env.as_ref();

    let client_dir = layout.client_output_dir();
    let entries = match discover_entries(env, &client_dir, &layout.entry_suffix).await {
        Ok(entries) => entries,
        Err(e) => return complete(ctx, sink, Err(e)).await,
    };
    ctx.events.emit(StageEvent::EntriesDiscovered {
        stage: kind.to_string(),
        entries: entries.keys().cloned().collect(),
    });
    if entries.is_empty() {
        tracing::info!(stage = %kind, "No bundle entries, nothing to bundle");
        return Ok(complete(ctx, sink, Ok(StageStatus::Success))
            .await?
            .with_note("no bundle entries"));
    }

    let entry_count = entries.len();
    // The bundler requires an absolute output path.
    let config = BundleConfig::new(
        entries,
        env.resolve(&layout.public_dir),
        &layout.bundle_filename,
    );
    let outcome = match ctx
        .toolchain
        .bundler
        .bundle(&config, &layout.staging_dir, env)
        .await
    {
        Ok(result) => Ok(handle_result(ctx, &mut sink, &result, show_stats)),
        Err(e) => Err(e),
    };
    let (outcome, summary) = match outcome {
        Ok((status, summary)) => (Ok(status), summary),
        Err(e) => (Err(e), None),
    };
    let mut report = complete(ctx, sink, outcome)
        .await?
        .with_note(format!("{} bundle entries", entry_count));
    if let Some(summary) = summary {
        report = report.with_note(summary);
    }
    Ok(report)
}

/// Record the bundler's result. Stats printing is decided here, once per
/// completion, from the per-stage override or the run-wide flag; the printed
/// summary is returned so it can travel on the report.
fn handle_result(
    ctx: &StageContext,
    sink: &mut DiagnosticSink,
    result: &BundleResult,
    show_stats: Option<bool>,
) -> (StageStatus, Option<String>) {
    match result {
        BundleResult::Fatal(message) => {
            tracing::error!(stage = %sink.stage(), error = %message, "Bundler fatal error");
            report_bundle_fatal(sink, message);
            (StageStatus::Fail, None)
        }
        BundleResult::Completed(stats) => {
            let fixup = PathFixup::new(ctx.env.working_directory());
            report_bundle_stats(sink, stats, &fixup);
            if !sink.is_empty() {
                eprintln!("{}", sink.batch().to_text());
            }
            let summary = if show_stats.unwrap_or(ctx.config.show_stats()) {
                let summary = stats.summary();
                println!("{}", summary);
                Some(summary)
            } else {
                None
            };
            let status = if stats.has_errors() {
                StageStatus::Fail
            } else {
                StageStatus::Success
            };
            (status, summary)
        }
    }
}

// ---------------------------------------------------------------------------
// BundleStage
// ---------------------------------------------------------------------------

/// One-shot bundle of every discovered client entry.
pub struct BundleStage {
    show_stats: Option<bool>,
    descriptor: StageDescriptor,
}

impl BundleStage {
    pub fn new(options: &StageOptions) -> Self {
        Self {
            show_stats: options.show_stats,
            descriptor: StageDescriptor::new(StageKind::Bundle, &["*-entry.js"]),
        }
    }
}

#[async_trait]
impl Stage for BundleStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        bundle_round(ctx, StageKind::Bundle, self.show_stats).await
    }
}

// ---------------------------------------------------------------------------
// BundleWatchStage
// ---------------------------------------------------------------------------

/// Bundles once, then again after every change under the compiled client
/// directory.
///
/// Each rebuild goes through the same result handling and flush as the
/// one-shot stage. A failed round is logged and reported as `StageFailed`,
/// and the stage keeps waiting for the next change. The build directory
/// watch is re-armed before every wait, so deleting and recreating the
/// client output (as a clean followed by a compile does) is picked up. The
/// stage only returns when a flush escalates under fail-on-error or the
/// watcher itself fails; otherwise it runs until the host process exits.
pub struct BundleWatchStage {
    show_stats: Option<bool>,
    descriptor: StageDescriptor,
}

impl BundleWatchStage {
    pub fn new(options: &StageOptions) -> Self {
        Self {
            show_stats: options.show_stats,
            descriptor: StageDescriptor::new(StageKind::BundleWatch, &["*-entry.js"]),
        }
    }
}

/// Whether a changed path should trigger a rebuild: anything under the
/// client directory, or the build directory itself appearing or vanishing.
fn triggers_rebuild(path: &Path, client_dir: &Path, build_dir: &Path) -> bool {
    path.starts_with(client_dir) || path == build_dir
}

/// (Re)install a recursive watch on `dir`. Returns false when `dir` does
/// not exist or could not be watched.
fn arm_recursive(watcher: &mut notify::RecommendedWatcher, dir: &Path) -> bool {
    use notify::{RecursiveMode, Watcher};

    if !dir.is_dir() {
        return false;
    }
    let _ = watcher.unwatch(dir);
    match watcher.watch(dir, RecursiveMode::Recursive) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Could not watch directory");
            false
        }
    }
}

#[async_trait]
impl Stage for BundleWatchStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        use notify::{Event as NotifyEvent, RecursiveMode, Watcher};

        let kind = self.kind();
        let root = ctx.env.working_directory().to_path_buf();
        let build_dir = ctx.env.resolve(&ctx.layout.build_dir);
        let client_dir = ctx.env.resolve(&ctx.layout.client_output_dir());

        let (tx, mut rx) = mpsc::channel::<()>(1);
        let (filter_client, filter_build): (PathBuf, PathBuf) =
            (client_dir.clone(), build_dir.clone());
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        notify::EventKind::Create(_)
                            | notify::EventKind::Modify(_)
                            | notify::EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| triggers_rebuild(p, &filter_client, &filter_build));
                    if relevant {
                        // A full channel already has a rebuild pending.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Watch error"),
            },
        )
        .map_err(|e| StagehandError::WatchError(e.to_string()))?;
        // The root watch survives removal of the build tree and reports it
        // being recreated.
        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|e| StagehandError::WatchError(format!("{}: {}", root.display(), e)))?;
        tracing::info!(stage = %kind, dir = %client_dir.display(), "Watching for changes");

        let mut rounds = 0u64;
        loop {
            // Re-armed every round: removing the build tree drops the
            // recursive watch along with it.
            let armed = arm_recursive(&mut watcher, &build_dir);
            let round = bundle_round(ctx, kind, self.show_stats).await;
            rounds += 1;
            match round {
                Ok(report) if report.escalate => {
                    return Ok(report.with_note(format!("stopped after {} round(s)", rounds)));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        stage = %kind,
                        round = rounds,
                        error = %e,
                        "Bundle round failed, still watching"
                    );
                    ctx.events.emit(StageEvent::StageFailed {
                        stage: kind.to_string(),
                        error: e.to_string(),
                    });
                }
            }
            if !armed {
                arm_recursive(&mut watcher, &build_dir);
            }

            if rx.recv().await.is_none() {
                return Err(StagehandError::WatchError("watcher channel closed".into()));
            }
            tokio::time::sleep(WATCH_DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
            tracing::debug!(stage = %kind, round = rounds + 1, "Change detected, rebundling");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_trigger_is_limited_to_client_output_and_build_root() {
        let client = Path::new("/p/build/client");
        let build = Path::new("/p/build");
        assert!(triggers_rebuild(Path::new("/p/build/client/a-entry.js"), client, build));
        assert!(triggers_rebuild(Path::new("/p/build/client"), client, build));
        assert!(triggers_rebuild(Path::new("/p/build"), client, build));
        assert!(!triggers_rebuild(Path::new("/p/build/public/bundle.js"), client, build));
        assert!(!triggers_rebuild(Path::new("/p/webstorm/bundle.errors"), client, build));
        assert!(!triggers_rebuild(Path::new("/p/stagehand.json"), client, build));
    }
}
