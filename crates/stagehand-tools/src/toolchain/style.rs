//! Stylesheet linter, compiler and vendor-prefix adapters.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use stagehand_types::{Result, StagehandError};

use super::{shell_quote, shell_quote_all, TOOL_TIMEOUT_MS};
use crate::environment::ExecutionEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintSeverity {
    Warning,
    Error,
}

/// One violation reported by the stylesheet linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleLintIssue {
    pub file: PathBuf,
    pub line: usize,
    pub column: Option<usize>,
    pub severity: LintSeverity,
    pub linter: Option<String>,
    pub reason: String,
}

/// Error raised by the stylesheet compiler for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleCompileError {
    pub message: String,
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

#[async_trait]
pub trait StyleLinter: Send + Sync {
    async fn lint(
        &self,
        files: &[PathBuf],
        config: Option<&Path>,
        env: &dyn ExecutionEnvironment,
    ) -> Result<Vec<StyleLintIssue>>;
}

#[async_trait]
pub trait StyleCompiler: Send + Sync {
    /// Compile one stylesheet. The outer `Result` is a tool failure; the inner
    /// one separates CSS output from a compile error in the source.
    async fn compile(
        &self,
        file: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<std::result::Result<String, StyleCompileError>>;
}

#[async_trait]
pub trait StylePrefixer: Send + Sync {
    async fn prefix(
        &self,
        css: &str,
        browsers: &[String],
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// scss-lint
// ---------------------------------------------------------------------------

pub struct CommandStyleLinter {
    command: String,
}

impl CommandStyleLinter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

fn lint_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>.+?):(?P<line>\d+)(?::(?P<col>\d+))? \[(?P<sev>[WE])\] (?:(?P<linter>[A-Za-z]+): )?(?P<reason>.*)$",
        )
        .expect("valid regex")
    })
}

/// Parse scss-lint's default reporter output.
pub fn parse_style_lint_output(output: &str) -> Vec<StyleLintIssue> {
    output
        .lines()
        .filter_map(|line| {
            let caps = lint_line_re().captures(line.trim_end())?;
            Some(StyleLintIssue {
                file: PathBuf::from(&caps["file"]),
                line: caps["line"].parse().ok()?,
                column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
                severity: if &caps["sev"] == "E" {
                    LintSeverity::Error
                } else {
                    LintSeverity::Warning
                },
                linter: caps.name("linter").map(|l| l.as_str().to_string()),
                reason: caps["reason"].to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl StyleLinter for CommandStyleLinter {
    async fn lint(
        &self,
        files: &[PathBuf],
        config: Option<&Path>,
        env: &dyn ExecutionEnvironment,
    ) -> Result<Vec<StyleLintIssue>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut command = self.command.clone();
        if let Some(cfg) = config {
            command.push_str(&format!(" --config {}", shell_quote(cfg)));
        }
        command.push(' ');
        command.push_str(&shell_quote_all(files));

        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }
        // 0 clean, 1 warnings, 2 errors; anything else is the linter failing.
        if !(0..=2).contains(&result.exit_code) {
            return Err(StagehandError::tool(
                "style-lint",
                format!("exited with code {}: {}", result.exit_code, result.stderr.trim()),
            ));
        }
        let issues = parse_style_lint_output(&result.stdout);
        tracing::debug!(files = files.len(), issues = issues.len(), "Style lint finished");
        Ok(issues)
    }
}

// ---------------------------------------------------------------------------
// sass
// ---------------------------------------------------------------------------

pub struct CommandStyleCompiler {
    command: String,
}

impl CommandStyleCompiler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

fn sass_location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<file>\S+\.s[ac]ss) (?P<line>\d+):(?P<col>\d+)").expect("valid regex")
    })
}

/// Extract message and location from a sass error report. Returns `None` when
/// the text is not a compile error (e.g. the binary could not start).
pub fn parse_style_compile_error(stderr: &str) -> Option<StyleCompileError> {
    let first = stderr.lines().find(|l| !l.trim().is_empty())?;
    let message = first.trim().strip_prefix("Error:")?.trim().to_string();
    let location = stderr
        .lines()
        .find_map(|l| sass_location_re().captures(l));
    Some(StyleCompileError {
        message,
        file: location.as_ref().map(|c| PathBuf::from(&c["file"])),
        line: location.as_ref().and_then(|c| c["line"].parse().ok()),
        column: location.as_ref().and_then(|c| c["col"].parse().ok()),
    })
}

#[async_trait]
impl StyleCompiler for CommandStyleCompiler {
    async fn compile(
        &self,
        file: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<std::result::Result<String, StyleCompileError>> {
        let command = format!("{} --no-source-map {}", self.command, shell_quote(file));
        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }
        if result.success() {
            return Ok(Ok(result.stdout));
        }
        match parse_style_compile_error(&result.stderr) {
            Some(mut err) => {
                if err.file.is_none() {
                    err.file = Some(file.to_path_buf());
                }
                Ok(Err(err))
            }
            None => Err(StagehandError::tool(
                "style-compile",
                format!("exited with code {}: {}", result.exit_code, result.stderr.trim()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// postcss + autoprefixer
// ---------------------------------------------------------------------------

pub struct CommandStylePrefixer {
    command: String,
}

impl CommandStylePrefixer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl StylePrefixer for CommandStylePrefixer {
    async fn prefix(
        &self,
        css: &str,
        browsers: &[String],
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<String> {
        let input = scratch.join("prefix-in.css");
        let output = scratch.join("prefix-out.css");
        env.write_file(&input, css).await?;

        let command = format!(
            "{} --no-map {} -o {}",
            self.command,
            shell_quote(&input),
            shell_quote(&output)
        );
        let mut vars = std::collections::HashMap::new();
        vars.insert("BROWSERSLIST".to_string(), browsers.join(", "));

        let result = env
            .exec_command(&command, TOOL_TIMEOUT_MS, None, Some(&vars))
            .await?;
        if !result.success() {
            return Err(StagehandError::tool(
                "style-prefix",
                format!("exited with code {}: {}", result.exit_code, result.stderr.trim()),
            ));
        }
        env.read_file(&output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scss_lint_lines_with_and_without_column() {
        let out = "\
src/client/a.scss:3:5 [W] ColorKeyword: Color `red` should be written in hexadecimal form as `#ff0000`
src/client/b.scss:10 [E] Syntax Error: Invalid CSS after \"a\"
Some unrelated banner line";
        let issues = parse_style_lint_output(out);
        assert_eq!(issues.len(), 2);

        assert_eq!(issues[0].file, PathBuf::from("src/client/a.scss"));
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[0].column, Some(5));
        assert_eq!(issues[0].severity, LintSeverity::Warning);
        assert_eq!(issues[0].linter.as_deref(), Some("ColorKeyword"));

        assert_eq!(issues[1].line, 10);
        assert_eq!(issues[1].column, None);
        assert_eq!(issues[1].severity, LintSeverity::Error);
        assert_eq!(issues[1].linter, None);
        assert!(issues[1].reason.starts_with("Syntax Error"));
    }

    #[test]
    fn parses_dart_sass_error() {
        let stderr = "\
Error: expected \";\".
  ╷
3 │   color: red
  │             ^
  ╵
  src/client/main.scss 3:13  root stylesheet
";
        let err = parse_style_compile_error(stderr).unwrap();
        assert_eq!(err.message, "expected \";\".");
        assert_eq!(err.file, Some(PathBuf::from("src/client/main.scss")));
        assert_eq!(err.line, Some(3));
        assert_eq!(err.column, Some(13));
    }

    #[test]
    fn non_sass_failure_is_not_a_compile_error() {
        assert!(parse_style_compile_error("bash: sass: command not found").is_none());
        assert!(parse_style_compile_error("").is_none());
    }
}
