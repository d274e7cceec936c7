//! External collaborators invoked by the build stages.
//!
//! Each tool is an async trait taking the [`ExecutionEnvironment`] it should
//! run in, returning a tool-specific payload. Normalizing those payloads into
//! diagnostics is the caller's job. The `Command*` implementations shell out
//! to the usual node-based tools and parse their output.

pub mod bundler;
pub mod script;
pub mod style;
pub mod test_runner;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use bundler::{
    BundleAsset, BundleConfig, BundleMessage, BundleResult, BundleStats, Bundler, CommandBundler,
    LoaderRule, SvgoPlugin,
};
pub use script::{
    CommandScriptLinter, CommandTypeCompiler, CompileOutput, CompileRequest, CompilerDiagnostic,
    CompilerOptions, EmitKind, EmittedFile, LintRuleSet, ScriptLintFailure, ScriptLinter,
    TypeCompiler,
};
pub use style::{
    CommandStyleCompiler, CommandStyleLinter, CommandStylePrefixer, LintSeverity,
    StyleCompileError, StyleCompiler, StyleLintIssue, StyleLinter, StylePrefixer,
};
pub use test_runner::{CommandTestRunner, TestRunSummary, TestRunner};

/// Upper bound for a single tool invocation.
pub const TOOL_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Quote a path for inclusion in a `bash -c` command line.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Join several paths into a space-separated, quoted argument list.
pub fn shell_quote_all(paths: &[impl AsRef<Path>]) -> String {
    paths
        .iter()
        .map(|p| shell_quote(p.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Base command line for each external tool. Arguments specific to one
/// invocation are appended by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommands {
    pub style_lint: String,
    pub style_compile: String,
    pub style_prefix: String,
    pub script_lint: String,
    pub type_compile: String,
    pub bundle: String,
    pub test: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            style_lint: "scss-lint".into(),
            style_compile: "sass".into(),
            style_prefix: "postcss --use autoprefixer".into(),
            script_lint: "tslint".into(),
            type_compile: "tsc".into(),
            bundle: "webpack".into(),
            test: "mocha".into(),
        }
    }
}

/// The full set of external tools the stages call into.
#[derive(Clone)]
pub struct Toolchain {
    pub style_linter: Arc<dyn StyleLinter>,
    pub style_compiler: Arc<dyn StyleCompiler>,
    pub style_prefixer: Arc<dyn StylePrefixer>,
    pub script_linter: Arc<dyn ScriptLinter>,
    pub type_compiler: Arc<dyn TypeCompiler>,
    pub bundler: Arc<dyn Bundler>,
    pub test_runner: Arc<dyn TestRunner>,
}

impl Toolchain {
    /// Command-line backed toolchain.
    pub fn from_commands(commands: &ToolCommands) -> Self {
        Self {
            style_linter: Arc::new(CommandStyleLinter::new(&commands.style_lint)),
            style_compiler: Arc::new(CommandStyleCompiler::new(&commands.style_compile)),
            style_prefixer: Arc::new(CommandStylePrefixer::new(&commands.style_prefix)),
            script_linter: Arc::new(CommandScriptLinter::new(&commands.script_lint)),
            type_compiler: Arc::new(CommandTypeCompiler::new(&commands.type_compile)),
            bundler: Arc::new(CommandBundler::new(&commands.bundle)),
            test_runner: Arc::new(CommandTestRunner::new(&commands.test)),
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::from_commands(&ToolCommands::default())
    }
}
