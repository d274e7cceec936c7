//! Script linter and type compiler adapters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use stagehand_types::{Result, StagehandError};

use super::{shell_quote, shell_quote_all, TOOL_TIMEOUT_MS};
use crate::environment::ExecutionEnvironment;

// ---------------------------------------------------------------------------
// Lint rule set
// ---------------------------------------------------------------------------

/// Rule name → rule setting, serialized as the linter's `rules` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintRuleSet {
    pub rules: BTreeMap<String, serde_json::Value>,
}

impl LintRuleSet {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, name: impl Into<String>, setting: serde_json::Value) -> Self {
        self.rules.insert(name.into(), setting);
        self
    }

    /// Linter configuration file contents.
    pub fn to_config_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&serde_json::json!({ "rules": self.rules }))?)
    }
}

impl Default for LintRuleSet {
    fn default() -> Self {
        use serde_json::json;
        Self::empty()
            .with_rule("class-name", json!(true))
            .with_rule("curly", json!(true))
            .with_rule("eofline", json!(true))
            .with_rule("indent", json!([true, "spaces"]))
            .with_rule("no-consecutive-blank-lines", json!(true))
            .with_rule("no-debugger", json!(true))
            .with_rule("no-trailing-whitespace", json!(true))
            .with_rule("no-unused-variable", json!(true))
            .with_rule("no-var-keyword", json!(true))
            .with_rule("quotemark", json!([true, "single"]))
            .with_rule("semicolon", json!([true, "always"]))
            .with_rule("triple-equals", json!([true, "allow-null-check"]))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One failure reported by the script linter. Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLintFailure {
    pub file: PathBuf,
    pub line: usize,
    pub character: usize,
    pub rule: String,
    pub message: String,
}

/// Fixed compiler configuration.
///
/// Output is always requested for the whole program. Suppressing the output
/// of files with reported errors is left to the caller, per file, so that
/// error-free siblings are still emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    pub no_implicit_any: bool,
    pub target: String,
    pub module: String,
    pub declaration: bool,
    /// Emit source maps with this `sourceRoot` when set.
    pub source_root: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            no_implicit_any: true,
            target: "ES5".into(),
            module: "commonjs".into(),
            declaration: false,
            source_root: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Root every output path is computed relative to.
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
    pub options: CompilerOptions,
    /// Directory the adapter may use for intermediate output.
    pub scratch: PathBuf,
}

/// One diagnostic reported by the type compiler. Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerDiagnostic {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub character: Option<usize>,
    pub code: Option<u32>,
    pub category: String,
    pub message: String,
}

impl CompilerDiagnostic {
    pub fn is_error(&self) -> bool {
        self.category == "error"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    Code,
    Declaration,
    SourceMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    /// Source file this output was produced from.
    pub source: PathBuf,
    /// Output path relative to the request root.
    pub relative: PathBuf,
    pub kind: EmitKind,
    pub contents: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub diagnostics: Vec<CompilerDiagnostic>,
    pub emitted: Vec<EmittedFile>,
}

#[async_trait]
pub trait ScriptLinter: Send + Sync {
    async fn lint(
        &self,
        files: &[PathBuf],
        rules: &LintRuleSet,
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<Vec<ScriptLintFailure>>;
}

#[async_trait]
pub trait TypeCompiler: Send + Sync {
    async fn compile(
        &self,
        request: &CompileRequest,
        env: &dyn ExecutionEnvironment,
    ) -> Result<CompileOutput>;
}

// ---------------------------------------------------------------------------
// tslint
// ---------------------------------------------------------------------------

pub struct CommandScriptLinter {
    command: String,
}

impl CommandScriptLinter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLintFailure {
    name: String,
    failure: String,
    #[serde(default)]
    rule_name: String,
    start_position: RawPosition,
}

#[derive(Deserialize)]
struct RawPosition {
    line: usize,
    character: usize,
}

/// Parse the linter's `--format json` output.
pub fn parse_script_lint_json(stdout: &str) -> Result<Vec<ScriptLintFailure>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawLintFailure> = serde_json::from_str(trimmed)?;
    Ok(raw
        .into_iter()
        .map(|r| ScriptLintFailure {
            file: PathBuf::from(r.name),
            line: r.start_position.line + 1,
            character: r.start_position.character + 1,
            rule: r.rule_name,
            message: r.failure,
        })
        .collect())
}

#[async_trait]
impl ScriptLinter for CommandScriptLinter {
    async fn lint(
        &self,
        files: &[PathBuf],
        rules: &LintRuleSet,
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<Vec<ScriptLintFailure>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let config = scratch.join("script-lint.json");
        env.write_file(&config, &rules.to_config_json()?).await?;

        let command = format!(
            "{} --format json --config {} {}",
            self.command,
            shell_quote(&config),
            shell_quote_all(files)
        );
        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }
        // 0 clean, 2 lint failures; 1 is a usage or configuration problem.
        if result.exit_code != 0 && result.exit_code != 2 {
            return Err(StagehandError::tool(
                "script-lint",
                format!("exited with code {}: {}", result.exit_code, result.stderr.trim()),
            ));
        }
        parse_script_lint_json(&result.stdout)
    }
}

// ---------------------------------------------------------------------------
// tsc
// ---------------------------------------------------------------------------

pub struct CommandTypeCompiler {
    command: String,
}

impl CommandTypeCompiler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn command_line(&self, request: &CompileRequest) -> String {
        let opts = &request.options;
        let mut cmd = format!(
            "{} --pretty false --target {} --module {} --rootDir {} --outDir {}",
            self.command,
            opts.target,
            opts.module,
            shell_quote(&request.root),
            shell_quote(&request.scratch)
        );
        if opts.no_implicit_any {
            cmd.push_str(" --noImplicitAny");
        }
        if opts.declaration {
            cmd.push_str(" --declaration");
        }
        if let Some(ref root) = opts.source_root {
            cmd.push_str(&format!(" --sourceMap --sourceRoot '{}'", root));
        }
        cmd.push(' ');
        cmd.push_str(&shell_quote_all(&request.files));
        cmd
    }
}

fn located_diag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>.+?)\((?P<line>\d+),(?P<col>\d+)\): (?P<cat>error|warning|message) TS(?P<code>\d+): (?P<msg>.*)$",
        )
        .expect("valid regex")
    })
}

fn global_diag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<cat>error|warning|message) TS(?P<code>\d+): (?P<msg>.*)$")
            .expect("valid regex")
    })
}

/// Parse `--pretty false` compiler output. Indented continuation lines are
/// folded into the preceding diagnostic.
pub fn parse_compiler_output(output: &str) -> Vec<CompilerDiagnostic> {
    let mut diagnostics: Vec<CompilerDiagnostic> = Vec::new();
    for line in output.lines() {
        if let Some(c) = located_diag_re().captures(line) {
            diagnostics.push(CompilerDiagnostic {
                file: Some(PathBuf::from(&c["file"])),
                line: c["line"].parse().ok(),
                character: c["col"].parse().ok(),
                code: c["code"].parse().ok(),
                category: c["cat"].to_string(),
                message: c["msg"].to_string(),
            });
        } else if let Some(c) = global_diag_re().captures(line) {
            diagnostics.push(CompilerDiagnostic {
                file: None,
                line: None,
                character: None,
                code: c["code"].parse().ok(),
                category: c["cat"].to_string(),
                message: c["msg"].to_string(),
            });
        } else if line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
            if let Some(last) = diagnostics.last_mut() {
                last.message.push(' ');
                last.message.push_str(line.trim());
            }
        }
    }
    diagnostics
}

/// Classify an output path and map it back to its `.ts` source.
fn classify_output(rel: &Path) -> Option<(EmitKind, PathBuf)> {
    let name = rel.to_string_lossy();
    let (kind, stem) = if let Some(stem) = name.strip_suffix(".d.ts") {
        (EmitKind::Declaration, stem)
    } else if let Some(stem) = name.strip_suffix(".js.map") {
        (EmitKind::SourceMap, stem)
    } else if let Some(stem) = name.strip_suffix(".js") {
        (EmitKind::Code, stem)
    } else {
        return None;
    };
    Some((kind, PathBuf::from(format!("{}.ts", stem))))
}

#[async_trait]
impl TypeCompiler for CommandTypeCompiler {
    async fn compile(
        &self,
        request: &CompileRequest,
        env: &dyn ExecutionEnvironment,
    ) -> Result<CompileOutput> {
        if request.files.is_empty() {
            return Ok(CompileOutput::default());
        }
        env.remove_dir_all(&request.scratch).await?;

        let command = self.command_line(request);
        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }

        let diagnostics = parse_compiler_output(&result.stdout);
        // 0 clean, 1 errors with output skipped, 2 errors with output generated.
        if !(0..=2).contains(&result.exit_code)
            || (result.exit_code != 0 && diagnostics.is_empty())
        {
            return Err(StagehandError::tool(
                "type-compile",
                format!(
                    "exited with code {}: {}{}",
                    result.exit_code,
                    result.stdout.trim(),
                    result.stderr.trim()
                ),
            ));
        }

        let scratch = env.resolve(&request.scratch);
        let root = env.resolve(&request.root);
        let mut emitted = Vec::new();
        for path in env.glob_files("**/*", &scratch).await? {
            let Ok(rel) = path.strip_prefix(&scratch) else {
                continue;
            };
            let Some((kind, source_rel)) = classify_output(rel) else {
                continue;
            };
            emitted.push(EmittedFile {
                source: root.join(source_rel),
                relative: rel.to_path_buf(),
                kind,
                contents: env.read_file(&path).await?,
            });
        }
        env.remove_dir_all(&scratch).await?;

        tracing::debug!(
            files = request.files.len(),
            diagnostics = diagnostics.len(),
            emitted = emitted.len(),
            "Type compile finished"
        );
        Ok(CompileOutput {
            diagnostics,
            emitted,
        })
    }
}
