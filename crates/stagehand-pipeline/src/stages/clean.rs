use async_trait::async_trait;
use stagehand_types::{Result, StageKind, StageStatus};

use crate::stage::{Stage, StageContext, StageDescriptor, StageReport};

/// Deletes the whole build output tree.
pub struct CleanStage {
    descriptor: StageDescriptor,
}

impl CleanStage {
    pub fn new() -> Self {
        Self {
            descriptor: StageDescriptor::new(StageKind::Clean, &["**"]),
        }
    }
}

impl Default for CleanStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for CleanStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport> {
        let build_dir = &ctx.layout.build_dir;
        let removed = ctx.env.remove_dir_all(build_dir).await?;
        tracing::info!(dir = %build_dir.display(), removed, "Build tree cleaned");

        let note = if removed {
            format!("removed {}", build_dir.display())
        } else {
            format!("{} already absent", build_dir.display())
        };
        Ok(StageReport::without_diagnostics(StageKind::Clean, StageStatus::Success).with_note(note))
    }
}
