//! Diagnostic sink: collects one stage run's diagnostics and persists them.
//!
//! A sink is created empty when a stage starts and consumed by [`flush`],
//! so each run flushes exactly once. The persisted file is always
//! overwritten, which also clears stale diagnostics from an earlier failing
//! run when the current one is clean.
//!
//! [`flush`]: DiagnosticSink::flush

use std::path::{Path, PathBuf};

use stagehand_tools::ExecutionEnvironment;
use stagehand_types::{DiagnosticBatch, Result, StageKind, StagehandError};

use crate::events::{EventEmitter, StageEvent};
use crate::run_mode::RunConfig;

pub struct DiagnosticSink {
    batch: DiagnosticBatch,
    destination: PathBuf,
}

/// What a flush wrote and whether the run must now fail.
#[derive(Debug, Clone)]
pub struct FlushOutcome {
    pub batch: DiagnosticBatch,
    pub path: PathBuf,
    /// Fail-on-error was set and the batch was non-empty.
    pub escalate: bool,
}

impl DiagnosticSink {
    pub fn new(stage: StageKind, destination: impl Into<PathBuf>) -> Self {
        Self {
            batch: DiagnosticBatch::new(stage),
            destination: destination.into(),
        }
    }

    /// Sink writing to the layout's file for `stage`.
    pub fn for_stage(stage: StageKind, layout: &crate::layout::ProjectLayout) -> Result<Self> {
        let destination = layout.diagnostics_path(stage).ok_or_else(|| {
            StagehandError::stage(stage, "stage does not persist diagnostics")
        })?;
        Ok(Self::new(stage, destination))
    }

    pub fn stage(&self) -> StageKind {
        self.batch.stage()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn batch(&self) -> &DiagnosticBatch {
        &self.batch
    }

    pub fn record(&mut self, text: impl AsRef<str>) -> bool {
        self.batch.record(text)
    }

    pub fn record_located(
        &mut self,
        text: impl AsRef<str>,
        source_path: Option<PathBuf>,
        line: Option<usize>,
    ) -> bool {
        self.batch.record_located(text, source_path, line)
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Overwrite the destination with the newline-joined records, creating
    /// parent directories as needed.
    pub async fn flush(
        self,
        env: &dyn ExecutionEnvironment,
        config: RunConfig,
        events: &EventEmitter,
    ) -> Result<FlushOutcome> {
        env.write_file(&self.destination, &self.batch.to_text()).await?;

        let count = self.batch.len();
        tracing::info!(
            stage = %self.batch.stage(),
            path = %self.destination.display(),
            count,
            "Diagnostics flushed"
        );
        events.emit(StageEvent::DiagnosticsFlushed {
            stage: self.batch.stage().to_string(),
            path: self.destination.display().to_string(),
            count,
        });

        let escalate = config.fail_on_error() && count > 0;
        if escalate {
            tracing::error!(stage = %self.batch.stage(), count, "Fail-on-error escalation");
            events.emit(StageEvent::EscalationRaised {
                stage: self.batch.stage().to_string(),
                diagnostics: count,
            });
        }

        Ok(FlushOutcome {
            batch: self.batch,
            path: self.destination,
            escalate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_tools::LocalExecutionEnvironment;

    fn env(dir: &tempfile::TempDir) -> LocalExecutionEnvironment {
        LocalExecutionEnvironment::new(dir.path())
    }

    #[tokio::test]
    async fn flush_writes_records_one_per_line_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = env(&dir);
        let mut sink = DiagnosticSink::new(StageKind::ServerScript, "webstorm/server-ts.errors");
        sink.record("src/server/a.ts(1,1): error TS1005: ';' expected.");
        sink.record("src/server/b.ts(4,2): semicolon: Missing semicolon");
        sink.record("third");

        let outcome = sink
            .flush(&env, RunConfig::new(), &EventEmitter::default())
            .await
            .unwrap();
        assert!(!outcome.escalate);

        let written = std::fs::read_to_string(dir.path().join("webstorm/server-ts.errors")).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "src/server/a.ts(1,1): error TS1005: ';' expected.",
                "src/server/b.ts(4,2): semicolon: Missing semicolon",
                "third",
            ]
        );
    }

    #[tokio::test]
    async fn empty_flush_overwrites_stale_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = env(&dir);
        std::fs::create_dir_all(dir.path().join("webstorm")).unwrap();
        std::fs::write(dir.path().join("webstorm/style.errors"), "old error").unwrap();

        let sink = DiagnosticSink::new(StageKind::Style, "webstorm/style.errors");
        sink.flush(&env, RunConfig::new(), &EventEmitter::default())
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("webstorm/style.errors")).unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn escalates_only_with_fail_on_error_and_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = env(&dir);
        let events = EventEmitter::default();

        let mut sink = DiagnosticSink::new(StageKind::Bundle, "webstorm/bundle.errors");
        sink.record("Module not found");
        let outcome = sink.flush(&env, RunConfig::new(), &events).await.unwrap();
        assert!(!outcome.escalate);

        let mut config = RunConfig::new();
        config.enable_fail_on_error();

        let mut sink = DiagnosticSink::new(StageKind::Bundle, "webstorm/bundle.errors");
        sink.record("Module not found");
        let mut rx = events.subscribe();
        let outcome = sink.flush(&env, config, &events).await.unwrap();
        assert!(outcome.escalate);
        assert!(matches!(rx.recv().await.unwrap(), StageEvent::DiagnosticsFlushed { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StageEvent::EscalationRaised { diagnostics: 1, .. }
        ));

        let sink = DiagnosticSink::new(StageKind::Bundle, "webstorm/bundle.errors");
        let outcome = sink.flush(&env, config, &events).await.unwrap();
        assert!(!outcome.escalate);
    }

    #[test]
    fn for_stage_rejects_stages_without_diagnostics() {
        let layout = crate::layout::ProjectLayout::default();
        assert!(DiagnosticSink::for_stage(StageKind::Clean, &layout).is_err());
        let sink = DiagnosticSink::for_stage(StageKind::ClientScript, &layout).unwrap();
        assert_eq!(sink.destination(), Path::new("webstorm/client-ts.errors"));
    }
}
