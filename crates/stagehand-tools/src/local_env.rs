use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};

use crate::environment::{DirEntry, ExecResult, ExecutionEnvironment};

/// Concrete execution environment rooted at a project directory on the local
/// file system.
pub struct LocalExecutionEnvironment {
    working_dir: PathBuf,
}

impl LocalExecutionEnvironment {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// `PATH` with the project's `node_modules/.bin` in front, so tool
    /// commands resolve to the project-local installs first.
    fn tool_path(&self) -> String {
        let local_bin = self.working_dir.join("node_modules").join(".bin");
        match std::env::var("PATH") {
            Ok(path) if !path.is_empty() => format!("{}:{}", local_bin.display(), path),
            _ => local_bin.display().to_string(),
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &Path) -> stagehand_types::Result<String> {
        let resolved = self.resolve(path);
        Ok(tokio::fs::read_to_string(&resolved).await?)
    }

    async fn write_file(&self, path: &Path, content: &str) -> stagehand_types::Result<()> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(&resolved, content).await?)
    }

    async fn file_exists(&self, path: &Path) -> stagehand_types::Result<bool> {
        let resolved = self.resolve(path);
        Ok(tokio::fs::try_exists(&resolved).await?)
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> stagehand_types::Result<()> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&from, &to).await?;
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> stagehand_types::Result<bool> {
        let resolved = self.resolve(path);
        match tokio::fs::remove_dir_all(&resolved).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_directory(
        &self,
        path: &Path,
        depth: usize,
    ) -> stagehand_types::Result<Vec<DirEntry>> {
        let resolved = self.resolve(path);
        let mut entries = Vec::new();
        list_dir_recursive(&resolved, depth, &mut entries).await?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        cwd: Option<&Path>,
        env_vars: Option<&HashMap<String, String>>,
    ) -> stagehand_types::Result<ExecResult> {
        let work_dir = cwd.map(|p| self.resolve(p)).unwrap_or_else(|| self.working_dir.clone());

        let mut cmd = tokio::process::Command::new("bash");
        cmd.args(["-c", command])
            .current_dir(&work_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("PATH", self.tool_path());

        // On Unix, use process_group for clean kill
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        if let Some(vars) = env_vars {
            cmd.envs(vars);
        }

        tracing::debug!(command = %command, cwd = %work_dir.display(), "Spawning tool command");

        let start = tokio::time::Instant::now();
        let mut child = cmd.spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| stagehand_types::StagehandError::Other("stdout not piped".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| stagehand_types::StagehandError::Other("stderr not piped".into()))?;

        // Drain both pipes concurrently with the wait so chatty tools cannot
        // block on a full pipe buffer.
        let read_out = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let read_err = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let timeout_dur = std::time::Duration::from_millis(timeout_ms);

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                let stdout_buf = read_out.await.unwrap_or_default();
                let stderr_buf = read_err.await.unwrap_or_default();

                let duration_ms = start.elapsed().as_millis() as u64;
                Ok(ExecResult {
                    stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
                    stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                    duration_ms,
                })
            }
            _ = tokio::time::sleep(timeout_dur) => {
                // Timeout: try graceful termination first
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        // Send SIGTERM to the process group
                        unsafe { libc::kill(-(pid as i32), libc::SIGTERM); }
                    }
                    tokio::select! {
                        _ = child.wait() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                            let _ = child.kill().await;
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.kill().await;
                }
                read_out.abort();
                read_err.abort();

                tracing::warn!(command = %command, timeout_ms, "Tool command timed out");
                let duration_ms = start.elapsed().as_millis() as u64;
                Ok(ExecResult {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}ms", timeout_ms),
                    exit_code: -1,
                    timed_out: true,
                    duration_ms,
                })
            }
        }
    }

    async fn glob_files(
        &self,
        pattern: &str,
        base: &Path,
    ) -> stagehand_types::Result<Vec<PathBuf>> {
        let resolved = self.resolve(base);
        let glob = Glob::new(pattern).map_err(|e| stagehand_types::StagehandError::tool("glob", e))?;
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let set = builder
            .build()
            .map_err(|e| stagehand_types::StagehandError::tool("glob", e))?;

        let mut matches = Vec::new();
        if !tokio::fs::try_exists(&resolved).await? {
            return Ok(matches);
        }
        collect_glob_matches(&resolved, &resolved, &set, &mut matches).await?;
        matches.sort();
        Ok(matches)
    }

    fn working_directory(&self) -> &Path {
        &self.working_dir
    }
}

/// Recursively list directory entries up to a given depth.
async fn list_dir_recursive(
    path: &Path,
    depth: usize,
    entries: &mut Vec<DirEntry>,
) -> stagehand_types::Result<()> {
    let mut read_dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let meta = entry.metadata().await?;
        let is_dir = meta.is_dir();
        entries.push(DirEntry {
            path: entry.path(),
            is_dir,
            size: meta.len(),
        });
        if is_dir && depth > 1 {
            Box::pin(list_dir_recursive(&entry.path(), depth - 1, entries)).await?;
        }
    }
    Ok(())
}

/// Recursively collect files matching a globset.
async fn collect_glob_matches(
    base: &Path,
    current: &Path,
    set: &globset::GlobSet,
    matches: &mut Vec<PathBuf>,
) -> stagehand_types::Result<()> {
    let meta = tokio::fs::metadata(current).await?;
    if meta.is_file() {
        if let Ok(rel) = current.strip_prefix(base) {
            if set.is_match(rel) {
                matches.push(current.to_path_buf());
            }
        }
    } else if meta.is_dir() {
        let mut read_dir = tokio::fs::read_dir(current).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            Box::pin(collect_glob_matches(base, &entry.path(), set, matches)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_env(dir: &TempDir) -> LocalExecutionEnvironment {
        LocalExecutionEnvironment::new(dir.path())
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        let path = Path::new("sub/dir/file.txt");
        env.write_file(path, "nested").await.unwrap();
        let content = env.read_file(path).await.unwrap();
        assert_eq!(content, "nested");
    }

    #[tokio::test]
    async fn copy_file_creates_destination_dirs() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        env.write_file(Path::new("src/client/app.ts"), "let a = 1;").await.unwrap();
        env.copy_file(Path::new("src/client/app.ts"), Path::new("build/tmp/client/app.ts"))
            .await
            .unwrap();
        assert_eq!(
            env.read_file(Path::new("build/tmp/client/app.ts")).await.unwrap(),
            "let a = 1;"
        );
    }

    #[tokio::test]
    async fn remove_dir_all_reports_absence() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        assert!(!env.remove_dir_all(Path::new("build")).await.unwrap());
        env.write_file(Path::new("build/x/y.js"), "").await.unwrap();
        assert!(env.remove_dir_all(Path::new("build")).await.unwrap());
        assert!(!env.file_exists(Path::new("build")).await.unwrap());
    }

    #[tokio::test]
    async fn exec_command_echo() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        let result = env
            .exec_command("echo hello", 5000, None, None)
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.success());
    }

    #[tokio::test]
    async fn exec_command_captures_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        let result = env
            .exec_command("echo oops >&2; exit 3", 5000, None, None)
            .await
            .unwrap();
        assert_eq!(result.stderr.trim(), "oops");
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn exec_command_prefers_project_bin() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        let result = env
            .exec_command("echo $PATH", 5000, None, None)
            .await
            .unwrap();
        let expected = dir.path().join("node_modules").join(".bin");
        assert!(result.stdout.starts_with(&expected.display().to_string()));
    }

    #[tokio::test]
    async fn exec_command_timeout() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        let result = env
            .exec_command("sleep 60", 100, None, None)
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(result.duration_ms >= 100);
    }

    #[tokio::test]
    async fn glob_files_supports_alternation() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        env.write_file(Path::new("src/client/a.ts"), "").await.unwrap();
        env.write_file(Path::new("src/common/deep/b.ts"), "").await.unwrap();
        env.write_file(Path::new("src/server/c.ts"), "").await.unwrap();
        env.write_file(Path::new("src/client/d.scss"), "").await.unwrap();

        let matches = env
            .glob_files("{client,common}/**/*.ts", Path::new("src"))
            .await
            .unwrap();
        let names: Vec<_> = matches
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.ts", "b.ts"]);
    }

    #[tokio::test]
    async fn glob_files_on_missing_base_is_empty() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);
        let matches = env.glob_files("**/*.js", Path::new("build")).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn list_directory_basic() {
        let dir = TempDir::new().unwrap();
        let env = make_env(&dir);

        env.write_file(Path::new("file1.txt"), "a").await.unwrap();
        env.write_file(Path::new("file2.txt"), "b").await.unwrap();

        let entries = env.list_directory(Path::new(""), 1).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].path.ends_with("file1.txt"));
    }
}
