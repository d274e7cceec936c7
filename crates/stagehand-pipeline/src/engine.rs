//! Stage orchestrator: runs an ordered list of stages and derives the exit code.
//!
//! Fail-on-error never kills the process from inside a stage. Each stage
//! reports whether its flush escalated and the orchestrator turns that into
//! an exit status, so concurrently running siblings always get to flush.

use std::time::Instant;

use stagehand_types::{Result, StageKind, StageStatus};
use tokio::task::JoinSet;

use crate::events::StageEvent;
use crate::stage::{StageContext, StageOptions, StageRegistry, StageReport};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    registry: StageRegistry,
    ctx: StageContext,
    options: StageOptions,
}

/// Outcome of one stage in a run.
#[derive(Debug)]
pub enum StageOutcome {
    Completed(StageReport),
    /// The stage raised an infrastructure error.
    Errored {
        stage: StageKind,
        error: String,
    },
}

impl StageOutcome {
    pub fn stage(&self) -> StageKind {
        match self {
            StageOutcome::Completed(report) => report.stage,
            StageOutcome::Errored { stage, .. } => *stage,
        }
    }

    pub fn report(&self) -> Option<&StageReport> {
        match self {
            StageOutcome::Completed(report) => Some(report),
            StageOutcome::Errored { .. } => None,
        }
    }

    /// Whether this outcome makes the whole run exit non-zero.
    fn is_fatal(&self) -> bool {
        match self {
            StageOutcome::Completed(report) => {
                report.escalate
                    || (matches!(report.stage, StageKind::Test(_))
                        && report.status == StageStatus::Fail)
            }
            StageOutcome::Errored { .. } => true,
        }
    }
}

#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: String,
    pub outcomes: Vec<StageOutcome>,
    pub exit_code: i32,
}

impl PipelineResult {
    fn new(run_id: String, outcomes: Vec<StageOutcome>) -> Self {
        let exit_code = if outcomes.iter().any(StageOutcome::is_fatal) {
            1
        } else {
            0
        };
        Self {
            run_id,
            outcomes,
            exit_code,
        }
    }

    pub fn reports(&self) -> impl Iterator<Item = &StageReport> {
        self.outcomes.iter().filter_map(StageOutcome::report)
    }

    pub fn escalated(&self) -> bool {
        self.reports().any(|r| r.escalate)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

impl Orchestrator {
    /// Create an orchestrator. The registry is validated up front.
    pub fn new(registry: StageRegistry, ctx: StageContext) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry,
            ctx,
            options: StageOptions::default(),
        })
    }

    /// Options every stage of this orchestrator is constructed with.
    pub fn with_options(mut self, options: StageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Run `stages` one after another. Stops after the first stage whose
    /// flush escalated or that raised an infrastructure error.
    pub async fn run(&self, stages: &[StageKind]) -> Result<PipelineResult> {
        let run_id = self.start(stages);
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(stages.len());

        for &kind in stages {
            let outcome = run_one(&self.registry, &self.options, &self.ctx, kind).await?;
            let stop = match outcome {
                StageOutcome::Completed(ref report) => report.escalate,
                StageOutcome::Errored { .. } => true,
            };
            outcomes.push(outcome);
            if stop {
                tracing::warn!(stage = %kind, "Stopping run");
                break;
            }
        }

        Ok(self.finish(run_id, outcomes, started))
    }

    /// Run `stages` as concurrent tasks. Every stage runs to completion and
    /// flushes before the result is assembled; outcomes are returned in the
    /// requested order.
    pub async fn run_concurrent(&self, stages: &[StageKind]) -> Result<PipelineResult> {
        let run_id = self.start(stages);
        let started = Instant::now();

        let mut set = JoinSet::new();
        for (index, &kind) in stages.iter().enumerate() {
            let stage = self.registry.build(kind, &self.options)?;
            let ctx = self.ctx.clone();
            set.spawn(async move {
                let outcome = execute(stage.as_ref(), &ctx).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<StageOutcome>> = stages.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Stage task panicked"),
            }
        }
        let outcomes = slots
            .into_iter()
            .zip(stages)
            .map(|(slot, &kind)| {
                slot.unwrap_or_else(|| StageOutcome::Errored {
                    stage: kind,
                    error: "stage task aborted".into(),
                })
            })
            .collect();

        Ok(self.finish(run_id, outcomes, started))
    }

    fn start(&self, stages: &[StageKind]) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, stages = stages.len(), "Run started");
        self.ctx.events.emit(StageEvent::RunStarted {
            run_id: run_id.clone(),
            stages: stages.iter().map(|s| s.to_string()).collect(),
        });
        run_id
    }

    fn finish(&self, run_id: String, outcomes: Vec<StageOutcome>, started: Instant) -> PipelineResult {
        let result = PipelineResult::new(run_id, outcomes);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %result.run_id,
            exit_code = result.exit_code,
            duration_ms,
            finished_at = %chrono::Utc::now().to_rfc3339(),
            "Run completed"
        );
        self.ctx.events.emit(StageEvent::RunCompleted {
            run_id: result.run_id.clone(),
            exit_code: result.exit_code,
            duration_ms,
        });
        result
    }
}

async fn run_one(
    registry: &StageRegistry,
    options: &StageOptions,
    ctx: &StageContext,
    kind: StageKind,
) -> Result<StageOutcome> {
    let stage = registry.build(kind, options)?;
    Ok(execute(stage.as_ref(), ctx).await)
}

/// Run one stage, converting an infrastructure error into an outcome.
async fn execute(stage: &dyn crate::stage::Stage, ctx: &StageContext) -> StageOutcome {
    let kind = stage.kind();
    let started = Instant::now();
    tracing::info!(stage = %kind, "Stage started");
    ctx.events.emit(StageEvent::StageStarted {
        stage: kind.to_string(),
    });

    match stage.run(ctx).await {
        Ok(report) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(
                stage = %kind,
                status = report.status.as_str(),
                diagnostics = report.diagnostics.len(),
                duration_ms,
                "Stage completed"
            );
            ctx.events.emit(StageEvent::StageCompleted {
                stage: kind.to_string(),
                status: report.status.as_str().to_string(),
                diagnostics: report.diagnostics.len(),
                duration_ms,
            });
            StageOutcome::Completed(report)
        }
        Err(e) => {
            tracing::error!(stage = %kind, error = %e, infrastructure = e.is_infrastructure(), "Stage failed");
            ctx.events.emit(StageEvent::StageFailed {
                stage: kind.to_string(),
                error: e.to_string(),
            });
            StageOutcome::Errored {
                stage: kind,
                error: e.to_string(),
            }
        }
    }
}
