//! Build stages, diagnostic aggregation and stage orchestration.
//!
//! Every stage collects its tool diagnostics into a [`DiagnosticSink`] which
//! is flushed exactly once per run to the stage's diagnostic file. Run-wide
//! behavior comes from a [`RunConfig`] threaded into every stage through the
//! [`StageContext`].

pub mod composer;
pub mod engine;
pub mod entries;
pub mod events;
pub mod layout;
pub mod reporters;
pub mod run_mode;
pub mod sink;
pub mod stage;
pub mod stages;

pub use composer::{ComposedFile, SourceSet, UnitOfWork};
pub use engine::{Orchestrator, PipelineResult, StageOutcome};
pub use entries::{discover_entries, EntryMapping};
pub use events::{EventEmitter, StageEvent};
pub use layout::{ProjectLayout, CONFIG_FILE};
pub use run_mode::RunConfig;
pub use sink::{DiagnosticSink, FlushOutcome};
pub use stage::{
    default_registry, Stage, StageContext, StageDescriptor, StageFactory, StageOptions,
    StageRegistry, StageReport,
};
