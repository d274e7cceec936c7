use std::path::Path;

use async_trait::async_trait;
use stagehand_types::{Result, StageKind, StageStatus};

use crate::reporters::{report_style_compile_error, report_style_lint, PathFixup};
use crate::sink::DiagnosticSink;
use crate::stage::{complete, Stage, StageContext, StageDescriptor, StageOptions, StageReport};

const STYLE_SOURCES: &str = "client/**/*.scss";

/// Lint, compile, concatenate and vendor-prefix the client stylesheets.
///
/// Lint violations never stop output. A compile error halts the stylesheet
/// output for the run but every file is still linted and compiled so the
/// diagnostics are complete.
pub struct StyleStage {
    descriptor: StageDescriptor,
}

impl StyleStage {
    pub fn new(_options: &StageOptions) -> Self {
        Self {
            descriptor: StageDescriptor::new(StageKind::Style, &[STYLE_SOURCES]),
        }
    }

    async fn build(&self, ctx: &StageContext, sink: &mut DiagnosticSink) -> Result<StageStatus> {
        let layout = &ctx.layout;
        let env = ctx.env.as_ref();
        let tools = &ctx.toolchain;
        let fixup = PathFixup::new(env.working_directory());

        let files = env.glob_files(STYLE_SOURCES, &layout.src_dir).await?;
        if files.is_empty() {
            tracing::info!(stage = %StageKind::Style, "No stylesheets");
            return Ok(StageStatus::Skipped);
        }

        let issues = tools
            .style_linter
            .lint(&files, layout.style_lint_config.as_deref(), env)
            .await?;
        let lint_count = report_style_lint(sink, &issues, &fixup);
        tracing::debug!(files = files.len(), issues = lint_count, "Stylesheets linted");

        let mut compiled = Vec::new();
        let mut halted = false;
        for file in files.iter().filter(|f| !is_partial(f)) {
            match tools.style_compiler.compile(file, env).await? {
                Ok(css) => compiled.push(css),
                Err(error) => {
                    tracing::warn!(file = %file.display(), error = %error.message, "Stylesheet compile error");
                    report_style_compile_error(sink, &error, file, &fixup);
                    halted = true;
                }
            }
        }
        if halted {
            return Ok(StageStatus::Fail);
        }

        let css = compiled.join("\n");
        let prefixed = tools
            .style_prefixer
            .prefix(&css, &layout.browsers, &layout.staging_dir, env)
            .await?;
        let dest = layout.public_dir.join(&layout.stylesheet_name);
        env.write_file(&dest, &prefixed).await?;
        tracing::info!(dest = %dest.display(), sources = compiled.len(), "Stylesheet written");
        Ok(StageStatus::Success)
    }
}

/// Partials are only compiled through imports.
fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('_'))
        .unwrap_or(false)
}

#[async_trait]
impl Stage for StyleStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        let mut sink = ctx.sink(StageKind::Style)?;
        let outcome = self.build(ctx, &mut sink).await;
        complete(ctx, sink, outcome).await
    }
}
