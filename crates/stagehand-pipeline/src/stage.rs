//! Stage trait, shared stage context, and the stage registry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagehand_tools::toolchain::LintRuleSet;
use stagehand_tools::{ExecutionEnvironment, Toolchain};
use stagehand_types::{DiagnosticBatch, Result, StageKind, StageStatus, StagehandError, TestTarget};

use crate::events::EventEmitter;
use crate::layout::ProjectLayout;
use crate::run_mode::RunConfig;
use crate::sink::{DiagnosticSink, FlushOutcome};

// ---------------------------------------------------------------------------
// Context, options, descriptor, report
// ---------------------------------------------------------------------------

/// Everything a stage run may read. Cheap to clone; shared by concurrent runs.
#[derive(Clone)]
pub struct StageContext {
    pub env: Arc<dyn ExecutionEnvironment>,
    pub toolchain: Toolchain,
    pub layout: Arc<ProjectLayout>,
    pub config: RunConfig,
    pub events: EventEmitter,
}

impl StageContext {
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        toolchain: Toolchain,
        layout: ProjectLayout,
        config: RunConfig,
    ) -> Self {
        Self {
            env,
            toolchain,
            layout: Arc::new(layout),
            config,
            events: EventEmitter::default(),
        }
    }

    /// Fresh sink for one run of `stage`.
    pub fn sink(&self, stage: StageKind) -> Result<DiagnosticSink> {
        DiagnosticSink::for_stage(stage, &self.layout)
    }

    pub async fn flush(&self, sink: DiagnosticSink) -> Result<FlushOutcome> {
        sink.flush(self.env.as_ref(), self.config, &self.events).await
    }
}

/// Per-construction stage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Also emit type declaration files.
    pub declaration: bool,
    /// Script lint rules; the built-in set when absent.
    pub rules: Option<LintRuleSet>,
    /// Overrides the run-wide stats flag for this stage.
    pub show_stats: Option<bool>,
}

/// Immutable description of a constructed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub kind: StageKind,
    /// Glob patterns, relative to the stage's input root.
    pub input_selectors: Vec<String>,
    pub declaration_output: bool,
}

impl StageDescriptor {
    pub fn new(kind: StageKind, input_selectors: &[&str]) -> Self {
        Self {
            kind,
            input_selectors: input_selectors.iter().map(|s| s.to_string()).collect(),
            declaration_output: false,
        }
    }

    pub fn with_declaration_output(mut self, declaration: bool) -> Self {
        self.declaration_output = declaration;
        self
    }
}

/// Structured result of one stage run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageKind,
    pub status: StageStatus,
    pub diagnostics: DiagnosticBatch,
    /// Where the diagnostics were persisted, for stages that persist them.
    pub diagnostics_path: Option<PathBuf>,
    /// Fail-on-error was set and the flushed batch was non-empty.
    pub escalate: bool,
    pub notes: Vec<String>,
}

impl StageReport {
    /// Report for a stage that does not aggregate diagnostics.
    pub fn without_diagnostics(stage: StageKind, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            diagnostics: DiagnosticBatch::new(stage),
            diagnostics_path: None,
            escalate: false,
            notes: Vec::new(),
        }
    }

    pub fn from_flush(status: StageStatus, flushed: FlushOutcome) -> Self {
        Self {
            stage: flushed.batch.stage(),
            status,
            diagnostics: flushed.batch,
            diagnostics_path: Some(flushed.path),
            escalate: flushed.escalate,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn ok(&self) -> bool {
        self.status != StageStatus::Fail && !self.escalate
    }
}

/// Flush `sink` whatever `outcome` is, then surface the outcome.
///
/// Infrastructure errors still propagate, but only after the diagnostics
/// gathered so far are on disk.
pub(crate) async fn complete(
    ctx: &StageContext,
    sink: DiagnosticSink,
    outcome: Result<StageStatus>,
) -> Result<StageReport> {
    let stage = sink.stage();
    let flushed = ctx.flush(sink).await;
    match outcome {
        Ok(status) => Ok(StageReport::from_flush(status, flushed?)),
        Err(e) => {
            if let Err(flush_err) = flushed {
                tracing::error!(stage = %stage, error = %flush_err, "Diagnostic flush failed");
            }
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    fn kind(&self) -> StageKind {
        self.descriptor().kind
    }

    /// Run the stage once. Diagnostics are flushed exactly once per call.
    async fn run(&self, ctx: &StageContext) -> Result<StageReport>;
}

// ---------------------------------------------------------------------------
// StageRegistry
// ---------------------------------------------------------------------------

pub type StageFactory = fn(&StageOptions) -> Box<dyn Stage>;

/// Static mapping from stage kind to the constructor producing it.
pub struct StageRegistry {
    factories: BTreeMap<StageKind, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: StageKind, factory: StageFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn has(&self, kind: StageKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.factories.keys().copied().collect()
    }

    /// Construct a fresh stage instance.
    pub fn build(&self, kind: StageKind, options: &StageOptions) -> Result<Box<dyn Stage>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| StagehandError::RegistryError(format!("no factory for '{}'", kind)))?;
        Ok(factory(options))
    }

    /// Every kind has a factory, and each factory builds the kind it is
    /// registered under.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<_> = StageKind::ALL
            .into_iter()
            .filter(|k| !self.has(*k))
            .map(|k| k.name())
            .collect();
        if !missing.is_empty() {
            return Err(StagehandError::RegistryError(format!(
                "missing factories for: {}",
                missing.join(", ")
            )));
        }
        for (kind, factory) in &self.factories {
            let built = factory(&StageOptions::default()).kind();
            if built != *kind {
                return Err(StagehandError::RegistryError(format!(
                    "factory for '{}' builds '{}'",
                    kind, built
                )));
            }
        }
        Ok(())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn test_stage(target: TestTarget) -> Box<dyn Stage> {
    Box::new(crate::stages::TestStage::new(target))
}

pub fn default_registry() -> StageRegistry {
    use crate::stages::{BundleStage, BundleWatchStage, CleanStage, ScriptStage, StyleStage};

    let mut reg = StageRegistry::new();
    reg.register(StageKind::Style, |o| Box::new(StyleStage::new(o)));
    reg.register(StageKind::ClientScript, |o| Box::new(ScriptStage::client(o)));
    reg.register(StageKind::ServerScript, |o| Box::new(ScriptStage::server(o)));
    reg.register(StageKind::Test(TestTarget::Utils), |_| test_stage(TestTarget::Utils));
    reg.register(StageKind::Test(TestTarget::Models), |_| test_stage(TestTarget::Models));
    reg.register(StageKind::Test(TestTarget::Client), |_| test_stage(TestTarget::Client));
    reg.register(StageKind::Test(TestTarget::Server), |_| test_stage(TestTarget::Server));
    reg.register(StageKind::Bundle, |o| Box::new(BundleStage::new(o)));
    reg.register(StageKind::BundleWatch, |o| Box::new(BundleWatchStage::new(o)));
    reg.register(StageKind::Clean, |_| Box::new(CleanStage::new()));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_valid_and_complete() {
        let reg = default_registry();
        reg.validate().unwrap();
        assert_eq!(reg.kinds().len(), StageKind::ALL.len());
    }

    #[test]
    fn missing_factory_fails_validation() {
        let mut reg = default_registry();
        reg.factories.remove(&StageKind::Clean);
        let err = reg.validate().unwrap_err();
        assert!(err.to_string().contains("clean"));
    }

    #[test]
    fn mismatched_factory_fails_validation() {
        let mut reg = default_registry();
        reg.register(StageKind::Bundle, |_| Box::new(crate::stages::CleanStage::new()));
        let err = reg.validate().unwrap_err();
        assert!(err.to_string().contains("builds 'clean'"));
    }

    #[test]
    fn build_carries_options_into_descriptor() {
        let reg = default_registry();
        let options = StageOptions {
            declaration: true,
            ..Default::default()
        };
        let stage = reg.build(StageKind::ServerScript, &options).unwrap();
        assert_eq!(stage.kind(), StageKind::ServerScript);
        assert!(stage.descriptor().declaration_output);
    }

    #[test]
    fn report_ok_requires_no_failure_and_no_escalation() {
        let mut report = StageReport::without_diagnostics(StageKind::Clean, StageStatus::Success);
        assert!(report.ok());
        report.escalate = true;
        assert!(!report.ok());
    }
}
