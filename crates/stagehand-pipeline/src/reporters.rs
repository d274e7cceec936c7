//! Normalization of tool payloads into diagnostic records.
//!
//! Every record's text follows `path(line,col): message` when the tool
//! reported a location, so editors can jump to it. Paths are made relative to
//! the project root and staging prefixes are rewritten to the logical source
//! location through a [`PathFixup`].

use std::path::{Component, Path, PathBuf};

use stagehand_tools::toolchain::{
    BundleMessage, BundleStats, CompilerDiagnostic, LintSeverity, ScriptLintFailure, StyleCompileError,
    StyleLintIssue,
};

use crate::sink::DiagnosticSink;

/// Prefix distinguishing a bundler crash from per-module errors.
pub const BUNDLER_FATAL_PREFIX: &str = "bundler fatal error: ";

// ---------------------------------------------------------------------------
// PathFixup
// ---------------------------------------------------------------------------

/// Rewrites tool-reported paths into project-relative logical paths.
#[derive(Debug, Clone)]
pub struct PathFixup {
    root: PathBuf,
    rewrites: Vec<(PathBuf, PathBuf)>,
}

impl PathFixup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rewrites: Vec::new(),
        }
    }

    /// Replace the leading `from` prefix with `to`. Both are project-relative.
    pub fn rewrite(mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        self.rewrites.push((from.into(), to.into()));
        self
    }

    pub fn apply(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let relative: PathBuf = relative
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        for (from, to) in &self.rewrites {
            if let Ok(rest) = relative.strip_prefix(from) {
                return to.join(rest);
            }
        }
        relative
    }

    /// Rewrite path prefixes mentioned inside free-form message text. Only
    /// whole path segments are replaced.
    pub fn apply_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        let root = format!("{}/", self.root.display());
        if root.len() > 1 {
            out = out.replace(&root, "");
        }
        for (from, to) in &self.rewrites {
            let from = format!("{}/", from.display());
            let to = format!("{}/", to.display());
            out = replace_bounded(&out, &from, &to);
        }
        out
    }
}

/// Replace `from` where it begins a path (start of text or after a separator
/// character that cannot be part of a file name segment).
fn replace_bounded(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(from) {
        let bounded = idx == 0
            || rest[..idx]
                .chars()
                .last()
                .map(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '(' | '`'))
                .unwrap_or(true);
        out.push_str(&rest[..idx]);
        out.push_str(if bounded { to } else { from });
        rest = &rest[idx + from.len()..];
    }
    out.push_str(rest);
    out
}

fn located(path: &Path, line: usize, column: usize, message: &str) -> String {
    format!("{}({},{}): {}", path.display(), line, column, message)
}

// ---------------------------------------------------------------------------
// Style
// ---------------------------------------------------------------------------

pub fn report_style_lint(
    sink: &mut DiagnosticSink,
    issues: &[StyleLintIssue],
    fixup: &PathFixup,
) -> usize {
    let mut count = 0;
    for issue in issues {
        let path = fixup.apply(&issue.file);
        let severity = match issue.severity {
            LintSeverity::Warning => "warning",
            LintSeverity::Error => "error",
        };
        let message = match issue.linter {
            Some(ref linter) => format!("{} {}: {}", severity, linter, issue.reason),
            None => format!("{} {}", severity, issue.reason),
        };
        let text = located(&path, issue.line, issue.column.unwrap_or(1), &message);
        if sink.record_located(text, Some(path), Some(issue.line)) {
            count += 1;
        }
    }
    count
}

pub fn report_style_compile_error(
    sink: &mut DiagnosticSink,
    error: &StyleCompileError,
    source: &Path,
    fixup: &PathFixup,
) -> bool {
    let path = fixup.apply(error.file.as_deref().unwrap_or(source));
    let message = fixup.apply_text(&error.message);
    let text = match error.line {
        Some(line) => located(&path, line, error.column.unwrap_or(1), &message),
        None => format!("{}: {}", path.display(), message),
    };
    sink.record_located(text, Some(path), error.line)
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

pub fn report_script_lint(
    sink: &mut DiagnosticSink,
    failures: &[ScriptLintFailure],
    fixup: &PathFixup,
) -> usize {
    let mut count = 0;
    for failure in failures {
        let path = fixup.apply(&failure.file);
        let message = format!("{}: {}", failure.rule, failure.message);
        let text = located(&path, failure.line, failure.character, &message);
        if sink.record_located(text, Some(path), Some(failure.line)) {
            count += 1;
        }
    }
    count
}

pub fn report_compiler_diagnostics(
    sink: &mut DiagnosticSink,
    diagnostics: &[CompilerDiagnostic],
    fixup: &PathFixup,
) -> usize {
    let mut count = 0;
    for diag in diagnostics {
        let code = diag.code.map(|c| format!(" TS{}", c)).unwrap_or_default();
        let message = format!("{}{}: {}", diag.category, code, fixup.apply_text(&diag.message));
        let recorded = match diag.file {
            Some(ref file) => {
                let path = fixup.apply(file);
                let line = diag.line.unwrap_or(1);
                let text = located(&path, line, diag.character.unwrap_or(1), &message);
                sink.record_located(text, Some(path), diag.line)
            }
            None => sink.record(message),
        };
        if recorded {
            count += 1;
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

pub fn report_bundle_fatal(sink: &mut DiagnosticSink, message: &str) -> bool {
    sink.record(format!("{}{}", BUNDLER_FATAL_PREFIX, message))
}

fn report_bundle_message(
    sink: &mut DiagnosticSink,
    msg: &BundleMessage,
    prefix: &str,
    fixup: &PathFixup,
) -> bool {
    let message = format!("{}{}", prefix, fixup.apply_text(&msg.message));
    match msg.module {
        Some(ref module) => {
            let path = fixup.apply(module);
            let text = match msg.line {
                Some(line) => located(&path, line, msg.column.unwrap_or(1), &message),
                None => format!("{}: {}", path.display(), message),
            };
            sink.record_located(text, Some(path), msg.line)
        }
        None => sink.record(message),
    }
}

/// Errors first, then warnings, each in the bundler's reported order.
pub fn report_bundle_stats(
    sink: &mut DiagnosticSink,
    stats: &BundleStats,
    fixup: &PathFixup,
) -> usize {
    let errors = stats
        .errors
        .iter()
        .filter(|e| report_bundle_message(sink, e, "", fixup))
        .count();
    let warnings = stats
        .warnings
        .iter()
        .filter(|w| report_bundle_message(sink, w, "warning: ", fixup))
        .count();
    errors + warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_types::StageKind;

    fn client_fixup() -> PathFixup {
        PathFixup::new("/project").rewrite("build/tmp", "src")
    }

    fn texts(sink: &DiagnosticSink) -> Vec<String> {
        sink.batch()
            .records()
            .iter()
            .map(|r| r.text().to_string())
            .collect()
    }

    #[test]
    fn fixup_rewrites_staging_prefix_relative_and_absolute() {
        let fixup = client_fixup();
        assert_eq!(
            fixup.apply(Path::new("build/tmp/client/app.ts")),
            PathBuf::from("src/client/app.ts")
        );
        assert_eq!(
            fixup.apply(Path::new("/project/build/tmp/common/util.ts")),
            PathBuf::from("src/common/util.ts")
        );
        assert_eq!(
            fixup.apply(Path::new("./build/tmp/client/app.ts")),
            PathBuf::from("src/client/app.ts")
        );
        assert_eq!(
            fixup.apply(Path::new("typings/node.d.ts")),
            PathBuf::from("typings/node.d.ts")
        );
    }

    #[test]
    fn fixup_text_only_replaces_whole_segments() {
        let fixup = client_fixup();
        assert_eq!(
            fixup.apply_text("Cannot find module 'build/tmp/client/x'."),
            "Cannot find module 'src/client/x'."
        );
        assert_eq!(fixup.apply_text("see mybuild/tmp/a"), "see mybuild/tmp/a");
    }

    #[test]
    fn compiler_diagnostics_are_located_and_fixed_up() {
        let mut sink = DiagnosticSink::new(StageKind::ClientScript, "x");
        let diags = vec![
            CompilerDiagnostic {
                file: Some(PathBuf::from("build/tmp/client/app.ts")),
                line: Some(3),
                character: Some(7),
                code: Some(2322),
                category: "error".into(),
                message: "Type 'string' is not assignable to type 'number'.".into(),
            },
            CompilerDiagnostic {
                file: None,
                line: None,
                character: None,
                code: Some(5023),
                category: "error".into(),
                message: "Unknown compiler option 'foo'.".into(),
            },
        ];
        assert_eq!(report_compiler_diagnostics(&mut sink, &diags, &client_fixup()), 2);
        assert_eq!(
            texts(&sink),
            vec![
                "src/client/app.ts(3,7): error TS2322: Type 'string' is not assignable to type 'number'.",
                "error TS5023: Unknown compiler option 'foo'.",
            ]
        );
        let first = &sink.batch().records()[0];
        assert_eq!(first.source_path(), Some(Path::new("src/client/app.ts")));
        assert_eq!(first.line(), Some(3));
    }

    #[test]
    fn script_lint_records_rule_name() {
        let mut sink = DiagnosticSink::new(StageKind::ServerScript, "x");
        let failures = vec![ScriptLintFailure {
            file: PathBuf::from("src/server/db.ts"),
            line: 12,
            character: 5,
            rule: "semicolon".into(),
            message: "Missing semicolon".into(),
        }];
        report_script_lint(&mut sink, &failures, &PathFixup::new("/project"));
        assert_eq!(
            texts(&sink),
            vec!["src/server/db.ts(12,5): semicolon: Missing semicolon"]
        );
    }

    #[test]
    fn style_lint_and_compile_share_format() {
        let mut sink = DiagnosticSink::new(StageKind::Style, "x");
        let fixup = PathFixup::new("/project");
        let issues = vec![StyleLintIssue {
            file: PathBuf::from("/project/src/style/a.scss"),
            line: 4,
            column: Some(2),
            severity: LintSeverity::Warning,
            linter: Some("ColorVariable".into()),
            reason: "Color literals should be variables".into(),
        }];
        report_style_lint(&mut sink, &issues, &fixup);
        let error = StyleCompileError {
            message: "expected \";\".".into(),
            file: None,
            line: Some(9),
            column: None,
        };
        report_style_compile_error(&mut sink, &error, Path::new("src/style/b.scss"), &fixup);
        assert_eq!(
            texts(&sink),
            vec![
                "src/style/a.scss(4,2): warning ColorVariable: Color literals should be variables",
                "src/style/b.scss(9,1): expected \";\".",
            ]
        );
    }

    #[test]
    fn bundle_fatal_is_prefixed_and_stats_keep_order() {
        let mut sink = DiagnosticSink::new(StageKind::Bundle, "x");
        report_bundle_fatal(&mut sink, "Cannot read config");
        let stats = BundleStats {
            errors: vec!["Module not found: './missing'".into()],
            warnings: vec!["asset size limit".into()],
            ..Default::default()
        };
        assert_eq!(report_bundle_stats(&mut sink, &stats, &PathFixup::new("/project")), 2);
        assert_eq!(
            texts(&sink),
            vec![
                "bundler fatal error: Cannot read config",
                "Module not found: './missing'",
                "warning: asset size limit",
            ]
        );
    }

    #[test]
    fn bundle_messages_with_module_are_located() {
        let mut sink = DiagnosticSink::new(StageKind::Bundle, "x");
        let stats = BundleStats {
            errors: vec![BundleMessage {
                message: "Can't resolve './y'".into(),
                module: Some(PathBuf::from("./build/client/app-entry.js")),
                line: Some(3),
                column: Some(12),
            }],
            warnings: vec![BundleMessage {
                message: "unused export".into(),
                module: Some(PathBuf::from("/project/build/client/util.js")),
                line: None,
                column: None,
            }],
            ..Default::default()
        };
        report_bundle_stats(&mut sink, &stats, &PathFixup::new("/project"));
        assert_eq!(
            texts(&sink),
            vec![
                "build/client/app-entry.js(3,12): Can't resolve './y'",
                "build/client/util.js: warning: unused export",
            ]
        );
        let first = &sink.batch().records()[0];
        assert_eq!(first.source_path(), Some(Path::new("build/client/app-entry.js")));
        assert_eq!(first.line(), Some(3));
    }
}
