use async_trait::async_trait;
use stagehand_types::{Result, StageKind, StageStatus, TestTarget};

use crate::stage::{Stage, StageContext, StageDescriptor, StageReport};

/// Compiled test files, relative to a target's build subdirectory.
pub const TEST_FILE_PATTERN: &str = "**/*.mocha.js";
pub const TEST_REPORTER: &str = "spec";

/// Runs the compiled tests of one build subdirectory.
///
/// The runner prints its own report; a failing run is surfaced as a failed
/// stage without any diagnostic aggregation.
pub struct TestStage {
    target: TestTarget,
    descriptor: StageDescriptor,
}

impl TestStage {
    pub fn new(target: TestTarget) -> Self {
        Self {
            target,
            descriptor: StageDescriptor::new(StageKind::Test(target), &[TEST_FILE_PATTERN]),
        }
    }
}

#[async_trait]
impl Stage for TestStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        let kind = self.kind();
        let dir = ctx.layout.test_dir(self.target);
        let files = ctx.env.glob_files(TEST_FILE_PATTERN, &dir).await?;
        if files.is_empty() {
            tracing::info!(stage = %kind, dir = %dir.display(), "No compiled tests");
            return Ok(StageReport::without_diagnostics(kind, StageStatus::Skipped)
                .with_note(format!("no tests under {}", dir.display())));
        }

        tracing::info!(stage = %kind, files = files.len(), "Running tests");
        let summary = ctx
            .toolchain
            .test_runner
            .run(&files, TEST_REPORTER, ctx.env.as_ref())
            .await?;
        if !summary.output.is_empty() {
            print!("{}", summary.output);
        }

        let status = if summary.passed {
            StageStatus::Success
        } else {
            tracing::warn!(stage = %kind, "Tests failed");
            StageStatus::Fail
        };
        Ok(StageReport::without_diagnostics(kind, status)
            .with_note(format!("{} test file(s) in {}ms", files.len(), summary.duration_ms)))
    }
}
