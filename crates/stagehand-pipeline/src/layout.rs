//! Project layout: where sources live and where every stage writes.
//!
//! All paths are relative to the project root (the execution environment's
//! working directory). Values come from an optional `stagehand.json` in the
//! root; absent keys keep their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stagehand_tools::ToolCommands;
use stagehand_types::{Result, StageKind, StagehandError, TestTarget};

/// Default configuration file name looked up in the project root.
pub const CONFIG_FILE: &str = "stagehand.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLayout {
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    /// On-disk staging area for sources the compiler must see as real files.
    pub staging_dir: PathBuf,
    pub typings_dir: PathBuf,
    pub public_dir: PathBuf,
    pub declaration_dir: PathBuf,
    /// Directory holding the per-stage diagnostic files read by the editor.
    pub diagnostics_dir: PathBuf,
    pub stylesheet_name: String,
    pub style_lint_config: Option<PathBuf>,
    pub browsers: Vec<String>,
    /// File-name suffix marking compiled client files as bundle entries.
    pub entry_suffix: String,
    pub bundle_filename: String,
    pub tools: ToolCommands,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            src_dir: "src".into(),
            build_dir: "build".into(),
            staging_dir: "build/tmp".into(),
            typings_dir: "typings".into(),
            public_dir: "build/public".into(),
            declaration_dir: "build/declarations".into(),
            diagnostics_dir: "webstorm".into(),
            stylesheet_name: "main.css".into(),
            style_lint_config: Some("src/lint/sass-lint.yml".into()),
            browsers: vec![
                "> 1%".into(),
                "last 3 versions".into(),
                "Firefox ESR".into(),
                "Opera 12.1".into(),
            ],
            entry_suffix: "-entry.js".into(),
            bundle_filename: "[name].js".into(),
            tools: ToolCommands::default(),
        }
    }
}

impl ProjectLayout {
    /// Load `stagehand.json` from `root`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No layout file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load a layout from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| StagehandError::ConfigError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Where the diagnostics of `stage` are persisted, if it aggregates any.
    pub fn diagnostics_path(&self, stage: StageKind) -> Option<PathBuf> {
        stage
            .diagnostic_file()
            .map(|name| self.diagnostics_dir.join(name))
    }

    /// Compiled client output, scanned for bundle entries.
    pub fn client_output_dir(&self) -> PathBuf {
        self.build_dir.join("client")
    }

    pub fn test_dir(&self, target: TestTarget) -> PathBuf {
        self.build_dir.join(target.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = ProjectLayout::load(dir.path()).unwrap();
        assert_eq!(layout, ProjectLayout::default());
        assert_eq!(layout.entry_suffix, "-entry.js");
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"build_dir": "out", "tools": {"bundle": "npx webpack"}}"#,
        )
        .unwrap();
        let layout = ProjectLayout::load(dir.path()).unwrap();
        assert_eq!(layout.build_dir, PathBuf::from("out"));
        assert_eq!(layout.src_dir, PathBuf::from("src"));
        assert_eq!(layout.tools.bundle, "npx webpack");
        assert_eq!(layout.tools.type_compile, "tsc");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        let err = ProjectLayout::load(dir.path()).unwrap_err();
        assert!(matches!(err, StagehandError::ConfigError { .. }));
    }

    #[test]
    fn derived_paths() {
        let layout = ProjectLayout::default();
        assert_eq!(
            layout.diagnostics_path(StageKind::Style),
            Some(PathBuf::from("webstorm/style.errors"))
        );
        assert_eq!(layout.diagnostics_path(StageKind::Clean), None);
        assert_eq!(layout.client_output_dir(), PathBuf::from("build/client"));
        assert_eq!(layout.test_dir(TestTarget::Models), PathBuf::from("build/models"));
    }
}
