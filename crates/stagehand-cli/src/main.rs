//! CLI binary for running Stagehand build stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use stagehand_pipeline::{
    default_registry, discover_entries, Orchestrator, ProjectLayout, RunConfig, StageContext,
    StageOptions, StageOutcome, CONFIG_FILE,
};
use stagehand_tools::toolchain::LintRuleSet;
use stagehand_tools::{LocalExecutionEnvironment, Toolchain};
use stagehand_types::StageKind;

#[derive(Parser)]
#[command(name = "stagehand", version, about = "Build-stage runner with editor-readable diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Layout file (default: <root>/stagehand.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more stages, in order
    Run {
        /// Stage names, see `stagehand list`
        #[arg(required = true, value_parser = parse_stage)]
        stages: Vec<StageKind>,

        /// Run the stages concurrently instead of one after another
        #[arg(long)]
        concurrent: bool,

        /// Also emit type declaration files
        #[arg(long)]
        declaration: bool,

        /// Print a bundler summary after every bundle run
        #[arg(long)]
        stats: bool,

        /// Exit with status 1 when any stage flushes a non-empty diagnostic batch
        #[arg(long)]
        fail_on_error: bool,

        /// JSON file with script lint rules (default: built-in rule set)
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// List every stage and where its diagnostics are written
    List,

    /// Show the bundle entries discovered in the compiled client output
    Entries,
}

fn parse_stage(name: &str) -> Result<StageKind, String> {
    name.parse().map_err(|e: stagehand_types::StagehandError| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let root = match cli.root {
        Some(ref dir) => std::fs::canonicalize(dir)?,
        None => std::env::current_dir()?,
    };
    let layout = match cli.config {
        Some(ref path) => ProjectLayout::load_from(path)?,
        None => ProjectLayout::load(&root)?,
    };
    match layout_file(&root, cli.config.as_deref()) {
        Some(file) => tracing::info!(
            root = %root.display(),
            layout = %file.display(),
            "Project layout loaded"
        ),
        None => tracing::info!(root = %root.display(), "No layout file, using defaults"),
    }

    match cli.command {
        Commands::Run {
            stages,
            concurrent,
            declaration,
            stats,
            fail_on_error,
            rules,
        } => {
            let mut config = RunConfig::new();
            if stats {
                config.enable_verbose_stats();
            }
            if fail_on_error {
                config.enable_fail_on_error();
            }
            let options = StageOptions {
                declaration,
                rules: rules.as_deref().map(load_rules).transpose()?,
                show_stats: None,
            };
            let code = cmd_run(&root, layout, config, options, &stages, concurrent).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::List => cmd_list(&layout),
        Commands::Entries => cmd_entries(&root, &layout).await?,
    }

    Ok(())
}

/// The layout file that applies to `root`, if any.
fn layout_file(root: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(root.join(CONFIG_FILE)).filter(|p| p.is_file()),
    }
}

fn load_rules(path: &Path) -> anyhow::Result<LintRuleSet> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

async fn cmd_run(
    root: &Path,
    layout: ProjectLayout,
    config: RunConfig,
    options: StageOptions,
    stages: &[StageKind],
    concurrent: bool,
) -> anyhow::Result<i32> {
    let toolchain = Toolchain::from_commands(&layout.tools);
    let env = Arc::new(LocalExecutionEnvironment::new(root));
    let ctx = StageContext::new(env, toolchain, layout, config);
    let orchestrator = Orchestrator::new(default_registry(), ctx)?.with_options(options);

    let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
    tracing::info!(stages = ?names, concurrent, "Starting run");
    let result = if concurrent {
        orchestrator.run_concurrent(stages).await?
    } else {
        orchestrator.run(stages).await?
    };
    tracing::info!(
        run_id = %result.run_id,
        exit_code = result.exit_code,
        completed = result.outcomes.len(),
        "Run finished"
    );

    println!();
    for outcome in &result.outcomes {
        match outcome {
            StageOutcome::Completed(report) => {
                let mut line = format!(
                    "{:<14} {:<8} {} diagnostic(s)",
                    report.stage.name(),
                    report.status.as_str(),
                    report.diagnostics.len()
                );
                if let Some(ref path) = report.diagnostics_path {
                    line.push_str(&format!(" -> {}", path.display()));
                }
                if report.escalate {
                    line.push_str(" [fail-on-error]");
                }
                println!("{}", line);
                for note in &report.notes {
                    println!("{:<14} {}", "", note);
                }
            }
            StageOutcome::Errored { stage, error } => {
                println!("{:<14} {:<8} {}", stage.name(), "error", error);
            }
        }
    }
    let skipped = stages.len() - result.outcomes.len();
    if skipped > 0 {
        println!("{} stage(s) not run", skipped);
    }

    Ok(result.exit_code)
}

fn cmd_list(layout: &ProjectLayout) {
    for kind in StageKind::ALL {
        match layout.diagnostics_path(kind) {
            Some(path) => println!("  {:<14} {}", kind.name(), path.display()),
            None => println!("  {:<14} -", kind.name()),
        }
    }
}

async fn cmd_entries(root: &Path, layout: &ProjectLayout) -> anyhow::Result<()> {
    let env = LocalExecutionEnvironment::new(root);
    let dir = layout.client_output_dir();
    let entries = discover_entries(&env, &dir, &layout.entry_suffix).await?;
    if entries.is_empty() {
        println!("No bundle entries in {}", dir.display());
        return Ok(());
    }
    for (name, path) in &entries {
        let shown = path.strip_prefix(root).unwrap_or(path);
        println!("  {:<20} {}", name, shown.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "stagehand",
            "run",
            "client-ts",
            "bundle",
            "--fail-on-error",
            "--declaration",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                stages,
                fail_on_error,
                declaration,
                concurrent,
                ..
            } => {
                assert_eq!(stages, vec![StageKind::ClientScript, StageKind::Bundle]);
                assert!(fail_on_error);
                assert!(declaration);
                assert!(!concurrent);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["stagehand", "run", "deploy"]).is_err());
    }

    #[test]
    fn layout_file_prefers_explicit_path_then_root_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(layout_file(dir.path(), None), None);

        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        assert_eq!(layout_file(dir.path(), None), Some(dir.path().join(CONFIG_FILE)));

        let explicit = Path::new("/elsewhere/layout.json");
        assert_eq!(
            layout_file(dir.path(), Some(explicit)),
            Some(explicit.to_path_buf())
        );
    }

    #[test]
    fn run_requires_a_stage() {
        assert!(Cli::try_parse_from(["stagehand", "run"]).is_err());
    }
}
