//! Shared types, errors, and diagnostic records for the Stagehand build orchestrator.
//!
//! This crate provides the foundational types used across all other Stagehand crates:
//! - `StagehandError`: unified error taxonomy
//! - `StageKind` / `TestTarget`: the closed set of build stages
//! - `Diagnostic` / `DiagnosticBatch`: normalized tool-reported issues
//! - `StageStatus`: terminal status of one stage run

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unified error type for all Stagehand subsystems.
///
/// Code-quality findings (lint violations, compile errors) are never carried
/// by this type; they travel as [`Diagnostic`]s. Everything here is an
/// orchestration failure that escapes the stage boundary.
#[derive(Debug, thiserror::Error)]
pub enum StagehandError {
    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Stage Errors ===
    #[error("Stage '{stage}' failed: {message}")]
    StageError { stage: StageKind, message: String },

    #[error("Stage registry is invalid: {0}")]
    RegistryError(String),

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    // === Configuration ===
    #[error("Invalid configuration at {path}: {message}")]
    ConfigError { path: PathBuf, message: String },

    #[error("File watcher error: {0}")]
    WatchError(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StagehandError {
    /// Returns `true` for failures of the orchestration infrastructure itself
    /// (file system, process spawning, watchers) as opposed to tool failures.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            StagehandError::Io(_)
                | StagehandError::WatchError(_)
                | StagehandError::CommandTimeout { .. }
        )
    }

    /// Create a tool error.
    pub fn tool(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::ToolError {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Create a stage error.
    pub fn stage(stage: StageKind, message: impl ToString) -> Self {
        Self::StageError {
            stage,
            message: message.to_string(),
        }
    }
}

/// A convenience alias for `Result<T, StagehandError>`.
pub type Result<T> = std::result::Result<T, StagehandError>;

// ---------------------------------------------------------------------------
// StageKind: the closed set of build stages
// ---------------------------------------------------------------------------

/// Subdirectory of the build tree whose compiled tests a test stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestTarget {
    Utils,
    Models,
    Client,
    Server,
}

impl TestTarget {
    pub const ALL: [TestTarget; 4] = [
        TestTarget::Utils,
        TestTarget::Models,
        TestTarget::Client,
        TestTarget::Server,
    ];

    /// Directory name under the build root.
    pub fn dir_name(self) -> &'static str {
        match self {
            TestTarget::Utils => "utils",
            TestTarget::Models => "models",
            TestTarget::Client => "client",
            TestTarget::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Style,
    ClientScript,
    ServerScript,
    Test(TestTarget),
    Bundle,
    BundleWatch,
    Clean,
}

impl StageKind {
    /// Every stage kind, in the order a full build would usually run them.
    pub const ALL: [StageKind; 10] = [
        StageKind::Clean,
        StageKind::Style,
        StageKind::ClientScript,
        StageKind::ServerScript,
        StageKind::Test(TestTarget::Utils),
        StageKind::Test(TestTarget::Models),
        StageKind::Test(TestTarget::Client),
        StageKind::Test(TestTarget::Server),
        StageKind::Bundle,
        StageKind::BundleWatch,
    ];

    /// Stable command-line name of the stage.
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Style => "style",
            StageKind::ClientScript => "client-ts",
            StageKind::ServerScript => "server-ts",
            StageKind::Test(TestTarget::Utils) => "test-utils",
            StageKind::Test(TestTarget::Models) => "test-models",
            StageKind::Test(TestTarget::Client) => "test-client",
            StageKind::Test(TestTarget::Server) => "test-server",
            StageKind::Bundle => "bundle",
            StageKind::BundleWatch => "bundle-watch",
            StageKind::Clean => "clean",
        }
    }

    /// File name of the persisted diagnostic log for this stage class, or
    /// `None` for stages that do not aggregate diagnostics.
    ///
    /// The one-shot and watch bundle stages share a class and therefore a file.
    pub fn diagnostic_file(self) -> Option<&'static str> {
        match self {
            StageKind::Style => Some("style.errors"),
            StageKind::ClientScript => Some("client-ts.errors"),
            StageKind::ServerScript => Some("server-ts.errors"),
            StageKind::Bundle | StageKind::BundleWatch => Some("bundle.errors"),
            StageKind::Test(_) | StageKind::Clean => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| StagehandError::UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Diagnostic: one normalized tool-reported issue
// ---------------------------------------------------------------------------

/// A normalized unit of error/warning text with enough context to locate it.
///
/// Instances are only created through [`DiagnosticBatch::record`] and
/// [`DiagnosticBatch::record_located`], which guarantee `text` is non-empty and
/// fits on a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    text: String,
    source_path: Option<PathBuf>,
    line: Option<usize>,
    stage: StageKind,
}

impl Diagnostic {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }
}

/// Collapse a possibly multi-line tool message onto one line.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// DiagnosticBatch: append-only records of one stage invocation
// ---------------------------------------------------------------------------

/// Ordered, append-only sequence of diagnostics collected during exactly one
/// stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticBatch {
    stage: StageKind,
    records: Vec<Diagnostic>,
}

impl DiagnosticBatch {
    /// Create an empty batch owned by `stage`.
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            records: Vec::new(),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Append a record without source location. Returns `false` (and records
    /// nothing) when `text` is blank.
    pub fn record(&mut self, text: impl AsRef<str>) -> bool {
        self.record_located(text, None, None)
    }

    /// Append a record with optional source path and line.
    pub fn record_located(
        &mut self,
        text: impl AsRef<str>,
        source_path: Option<PathBuf>,
        line: Option<usize>,
    ) -> bool {
        let text = single_line(text.as_ref());
        if text.is_empty() {
            tracing::trace!(stage = %self.stage, "Dropping blank diagnostic");
            return false;
        }
        self.records.push(Diagnostic {
            text,
            source_path,
            line,
            stage: self.stage,
        });
        true
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newline-joined record texts, in append order.
    pub fn to_text(&self) -> String {
        self.records
            .iter()
            .map(Diagnostic::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// StageStatus: terminal status of a stage run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Fail,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Fail => "fail",
            StageStatus::Skipped => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_tool_error() {
        let err = StagehandError::tool("tsc", "not found");
        assert_eq!(err.to_string(), "Tool 'tsc' error: not found");
    }

    #[test]
    fn error_display_stage_error() {
        let err = StagehandError::stage(StageKind::Bundle, "entry dir missing");
        assert_eq!(err.to_string(), "Stage 'bundle' failed: entry dir missing");
    }

    #[test]
    fn error_display_unknown_stage() {
        let err = StagehandError::UnknownStage("lint".into());
        assert_eq!(err.to_string(), "Unknown stage 'lint'");
    }

    #[test]
    fn io_error_is_infrastructure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StagehandError = io_err.into();
        assert!(matches!(err, StagehandError::Io(_)));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn tool_error_is_not_infrastructure() {
        assert!(!StagehandError::tool("sass", "crashed").is_infrastructure());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: StagehandError = json_err.into();
        assert!(matches!(err, StagehandError::Json(_)));
    }

    // --- StageKind ---

    #[test]
    fn stage_kind_names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.name().parse::<StageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn stage_kind_rejects_unknown_name() {
        let err = "deploy".parse::<StageKind>().unwrap_err();
        assert!(matches!(err, StagehandError::UnknownStage(name) if name == "deploy"));
    }

    #[test]
    fn diagnostic_files_are_distinct_per_class() {
        let style = StageKind::Style.diagnostic_file();
        let client = StageKind::ClientScript.diagnostic_file();
        let server = StageKind::ServerScript.diagnostic_file();
        let bundle = StageKind::Bundle.diagnostic_file();
        let all = [style, client, server, bundle];
        for (i, a) in all.iter().enumerate() {
            assert!(a.is_some());
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(StageKind::BundleWatch.diagnostic_file(), bundle);
        assert_eq!(StageKind::Clean.diagnostic_file(), None);
        assert_eq!(StageKind::Test(TestTarget::Models).diagnostic_file(), None);
    }

    // --- DiagnosticBatch ---

    #[test]
    fn batch_records_in_append_order() {
        let mut batch = DiagnosticBatch::new(StageKind::Style);
        assert!(batch.record("first"));
        assert!(batch.record_located("second", Some(PathBuf::from("a.scss")), Some(3)));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].text(), "first");
        assert_eq!(batch.records()[1].line(), Some(3));
        assert_eq!(batch.records()[1].stage(), StageKind::Style);
        assert_eq!(batch.to_text(), "first\nsecond");
    }

    #[test]
    fn batch_drops_blank_text() {
        let mut batch = DiagnosticBatch::new(StageKind::Bundle);
        assert!(!batch.record("   \n  "));
        assert!(batch.is_empty());
        assert_eq!(batch.to_text(), "");
    }

    #[test]
    fn batch_collapses_multiline_text() {
        let mut batch = DiagnosticBatch::new(StageKind::Style);
        batch.record("Error: expected \";\"\n   ╷\n 3 │ a { b: c }\n");
        assert_eq!(batch.len(), 1);
        assert!(!batch.records()[0].text().contains('\n'));
        assert!(batch.records()[0].text().starts_with("Error: expected"));
    }

    // --- StageStatus ---

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&StageStatus::Skipped).unwrap(),
            "\"skipped\""
        );
        assert_eq!(StageStatus::Fail.as_str(), "fail");
    }
}
