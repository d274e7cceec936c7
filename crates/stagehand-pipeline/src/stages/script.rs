use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stagehand_tools::toolchain::{CompileRequest, CompilerOptions, EmitKind, EmittedFile, LintRuleSet};
use stagehand_types::{Result, StageKind, StageStatus};

use crate::composer::{SourceSet, UnitOfWork};
use crate::reporters::{report_compiler_diagnostics, report_script_lint, PathFixup};
use crate::sink::DiagnosticSink;
use crate::stage::{complete, Stage, StageContext, StageDescriptor, StageOptions, StageReport};

const SOURCES: &str = "sources";
const TYPINGS: &str = "typings";
const TYPINGS_PATTERN: &str = "**/*.d.ts";

/// Which half of the code base a [`ScriptStage`] compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTarget {
    Client,
    Server,
}

impl ScriptTarget {
    fn kind(self) -> StageKind {
        match self {
            ScriptTarget::Client => StageKind::ClientScript,
            ScriptTarget::Server => StageKind::ServerScript,
        }
    }

    fn selector(self) -> &'static str {
        match self {
            ScriptTarget::Client => "{client,common}/**/*.ts",
            ScriptTarget::Server => "{server,common}/**/*.ts",
        }
    }

    /// `sourceRoot` written into emitted source maps.
    fn source_root(self) -> &'static str {
        match self {
            ScriptTarget::Client => "../client",
            ScriptTarget::Server => "../../src/server",
        }
    }
}

/// Lint and type-compile one half of the code base.
///
/// The client variant compiles from a staging copy of its sources, so lint and
/// compiler paths are rewritten from the staging prefix back to the source
/// prefix before they are recorded. Files with compile errors produce no
/// output; their error-free siblings are still written.
pub struct ScriptStage {
    target: ScriptTarget,
    rules: LintRuleSet,
    descriptor: StageDescriptor,
}

impl ScriptStage {
    pub fn new(target: ScriptTarget, options: &StageOptions) -> Self {
        Self {
            target,
            rules: options.rules.clone().unwrap_or_default(),
            descriptor: StageDescriptor::new(target.kind(), &[target.selector(), TYPINGS_PATTERN])
                .with_declaration_output(options.declaration),
        }
    }

    pub fn client(options: &StageOptions) -> Self {
        Self::new(ScriptTarget::Client, options)
    }

    pub fn server(options: &StageOptions) -> Self {
        Self::new(ScriptTarget::Server, options)
    }

    /// Copy the sources into the staging area. Returns the staged paths, in
    /// source order.
    async fn stage_sources(&self, ctx: &StageContext, sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let layout = &ctx.layout;
        let src_root = ctx.env.resolve(&layout.src_dir);
        let mut staged = Vec::with_capacity(sources.len());
        for source in sources {
            let relative = source.strip_prefix(&src_root).unwrap_or(source);
            let dest = layout.staging_dir.join(relative);
            ctx.env.copy_file(source, &dest).await?;
            staged.push(dest);
        }
        tracing::debug!(files = staged.len(), dir = %layout.staging_dir.display(), "Sources staged");
        Ok(staged)
    }

    async fn build(
        &self,
        ctx: &StageContext,
        sink: &mut DiagnosticSink,
        notes: &mut Vec<String>,
    ) -> Result<StageStatus> {
        let layout = &ctx.layout;
        let env = ctx.env.as_ref();
        let kind = self.kind();

        let sources = env.glob_files(self.target.selector(), &layout.src_dir).await?;
        if sources.is_empty() {
            tracing::info!(stage = %kind, "No sources");
            return Ok(StageStatus::Skipped);
        }

        let (compile_root, sources, fixup) = match self.target {
            ScriptTarget::Client => (
                layout.staging_dir.clone(),
                self.stage_sources(ctx, &sources).await?,
                PathFixup::new(env.working_directory())
                    .rewrite(&layout.staging_dir, &layout.src_dir),
            ),
            ScriptTarget::Server => (
                layout.src_dir.clone(),
                sources,
                PathFixup::new(env.working_directory()),
            ),
        };

        let failures = ctx
            .toolchain
            .script_linter
            .lint(&sources, &self.rules, &layout.staging_dir, env)
            .await?;
        report_script_lint(sink, &failures, &fixup);

        let typings = env.glob_files(TYPINGS_PATTERN, &layout.typings_dir).await?;
        let unit = UnitOfWork::compose([
            SourceSet::new(SOURCES, sources),
            SourceSet::new(TYPINGS, typings),
        ]);

        let request = CompileRequest {
            root: compile_root,
            files: unit.paths(),
            options: CompilerOptions {
                declaration: self.descriptor.declaration_output,
                source_root: Some(self.target.source_root().to_string()),
                ..CompilerOptions::default()
            },
            scratch: layout.build_dir.join(".emit").join(kind.name()),
        };
        let output = ctx.toolchain.type_compiler.compile(&request, env).await?;
        report_compiler_diagnostics(sink, &output.diagnostics, &fixup);

        let failed: HashSet<PathBuf> = output
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .filter_map(|d| d.file.as_deref())
            .map(|f| normalize(&env.resolve(f)))
            .collect();
        let emittable: HashSet<PathBuf> = unit
            .files_from(SOURCES)
            .iter()
            .map(|p| normalize(&env.resolve(p)))
            .filter(|p| !failed.contains(p))
            .collect();

        let (code, declarations): (Vec<&EmittedFile>, Vec<&EmittedFile>) = output
            .emitted
            .iter()
            .filter(|e| emittable.contains(&normalize(&e.source)))
            .partition(|e| e.kind != EmitKind::Declaration);

        let written = self.write_outputs(ctx, &code, &layout.build_dir).await?;
        notes.push(format!("{} file(s) written to {}", written, layout.build_dir.display()));
        if self.descriptor.declaration_output {
            let written = self
                .write_outputs(ctx, &declarations, &layout.declaration_dir)
                .await?;
            notes.push(format!(
                "{} declaration(s) written to {}",
                written,
                layout.declaration_dir.display()
            ));
        }

        let has_errors = output.diagnostics.iter().any(|d| d.is_error());
        tracing::info!(
            stage = %kind,
            sources = emittable.len() + failed.len(),
            failed = failed.len(),
            "Type compile finished"
        );
        Ok(if has_errors {
            StageStatus::Fail
        } else {
            StageStatus::Success
        })
    }

    async fn write_outputs(
        &self,
        ctx: &StageContext,
        files: &[&EmittedFile],
        dest: &Path,
    ) -> Result<usize> {
        for file in files {
            ctx.env.write_file(&dest.join(&file.relative), &file.contents).await?;
        }
        Ok(files.len())
    }
}

/// Drop `.` components so paths reported in different spellings compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

#[async_trait]
impl Stage for ScriptStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        let mut sink = ctx.sink(self.kind())?;
        let mut notes = Vec::new();
        let outcome = self.build(ctx, &mut sink, &mut notes).await;
        let mut report = complete(ctx, sink, outcome).await?;
        report.notes = notes;
        Ok(report)
    }
}
