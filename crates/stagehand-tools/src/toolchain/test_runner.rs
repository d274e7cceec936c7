use std::path::PathBuf;

use async_trait::async_trait;
use stagehand_types::{Result, StagehandError};

use super::{shell_quote_all, TOOL_TIMEOUT_MS};
use crate::environment::ExecutionEnvironment;

/// Outcome of one test-runner invocation.
#[derive(Debug, Clone)]
pub struct TestRunSummary {
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(
        &self,
        files: &[PathBuf],
        reporter: &str,
        env: &dyn ExecutionEnvironment,
    ) -> Result<TestRunSummary>;
}

pub struct CommandTestRunner {
    command: String,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(
        &self,
        files: &[PathBuf],
        reporter: &str,
        env: &dyn ExecutionEnvironment,
    ) -> Result<TestRunSummary> {
        let command = format!(
            "{} --reporter {} {}",
            self.command,
            reporter,
            shell_quote_all(files)
        );
        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }
        let output = if result.stderr.is_empty() {
            result.stdout
        } else {
            format!("{}\n{}", result.stdout, result.stderr)
        };
        Ok(TestRunSummary {
            passed: result.exit_code == 0,
            output,
            duration_ms: result.duration_ms,
        })
    }
}
