use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Result of executing a shell command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Entry returned by directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Abstraction over the file system and process table that stages and tools
/// operate on. Relative paths resolve against [`working_directory`].
///
/// [`working_directory`]: ExecutionEnvironment::working_directory
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn read_file(&self, path: &Path) -> stagehand_types::Result<String>;
    /// Overwrite `path`, creating parent directories as needed.
    async fn write_file(&self, path: &Path, content: &str) -> stagehand_types::Result<()>;
    async fn file_exists(&self, path: &Path) -> stagehand_types::Result<bool>;
    /// Copy a file, creating the destination's parent directories as needed.
    async fn copy_file(&self, from: &Path, to: &Path) -> stagehand_types::Result<()>;
    /// Remove a directory tree. Returns `false` when it did not exist.
    async fn remove_dir_all(&self, path: &Path) -> stagehand_types::Result<bool>;
    async fn list_directory(
        &self,
        path: &Path,
        depth: usize,
    ) -> stagehand_types::Result<Vec<DirEntry>>;
    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        cwd: Option<&Path>,
        env_vars: Option<&HashMap<String, String>>,
    ) -> stagehand_types::Result<ExecResult>;
    /// Files under `base` whose base-relative path matches `pattern`, sorted.
    /// A missing `base` yields no matches.
    async fn glob_files(&self, pattern: &str, base: &Path)
        -> stagehand_types::Result<Vec<PathBuf>>;
    fn working_directory(&self) -> &Path;
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_directory().join(path)
        }
    }
}
