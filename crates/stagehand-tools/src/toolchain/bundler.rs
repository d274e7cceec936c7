//! Module bundler adapter: config rendering and result parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagehand_types::{Result, StagehandError};

use super::{shell_quote, TOOL_TIMEOUT_MS};
use crate::environment::ExecutionEnvironment;

/// A loader chain applied to modules whose path matches `test` (a regex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderRule {
    pub test: String,
    pub loaders: Vec<serde_json::Value>,
}

/// One vector-image optimizer plugin and its setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvgoPlugin {
    pub name: String,
    pub setting: serde_json::Value,
}

impl SvgoPlugin {
    fn new(name: &str, setting: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            setting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub entries: BTreeMap<String, PathBuf>,
    pub output_dir: PathBuf,
    /// Per-entry file name template, e.g. `[name].js`.
    pub filename: String,
    pub rules: Vec<LoaderRule>,
}

impl BundleConfig {
    /// Config with the fixed asset rules: vector images are optimized and
    /// inlined as raw text; stylesheets are resolved and injected at runtime.
    pub fn new(
        entries: BTreeMap<String, PathBuf>,
        output_dir: impl Into<PathBuf>,
        filename: impl Into<String>,
    ) -> Self {
        let svgo_options = serde_json::json!({
            "plugins": Self::svgo_plugins()
                .into_iter()
                .map(|p| {
                    let mut plugin = serde_json::Map::new();
                    plugin.insert(p.name, p.setting);
                    serde_json::Value::Object(plugin)
                })
                .collect::<Vec<_>>()
        });
        Self {
            entries,
            output_dir: output_dir.into(),
            filename: filename.into(),
            rules: vec![
                LoaderRule {
                    test: r"\.svg$".into(),
                    loaders: vec![
                        serde_json::json!("raw-loader"),
                        serde_json::json!({ "loader": "svgo-loader", "options": svgo_options }),
                    ],
                },
                LoaderRule {
                    test: r"\.css$".into(),
                    loaders: vec![
                        serde_json::json!("style-loader"),
                        serde_json::json!("css-loader"),
                    ],
                },
            ],
        }
    }

    /// Title removal, dimension stripping, color normalization without hex
    /// shortening, and path data left verbatim.
    pub fn svgo_plugins() -> Vec<SvgoPlugin> {
        vec![
            SvgoPlugin::new("removeTitle", serde_json::json!(true)),
            SvgoPlugin::new("removeDimensions", serde_json::json!(true)),
            SvgoPlugin::new("convertColors", serde_json::json!({ "shorthex": false })),
            SvgoPlugin::new("convertPathData", serde_json::json!(false)),
        ]
    }

    /// Render the config as a CommonJS module the bundler can load.
    pub fn render_module(&self) -> Result<String> {
        let entries = serde_json::to_string_pretty(
            &self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string_lossy().to_string()))
                .collect::<BTreeMap<_, _>>(),
        )?;
        let mut rules = Vec::new();
        for rule in &self.rules {
            rules.push(format!(
                "    {{ test: new RegExp({}), use: {} }}",
                serde_json::to_string(&rule.test)?,
                serde_json::to_string(&rule.loaders)?
            ));
        }
        Ok(format!(
            "module.exports = {{\n  entry: {},\n  output: {{ path: {}, filename: {} }},\n  module: {{\n  rules: [\n{}\n  ]\n  }}\n}};\n",
            entries,
            serde_json::to_string(&self.output_dir.to_string_lossy())?,
            serde_json::to_string(&self.filename)?,
            rules.join(",\n")
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleAsset {
    pub name: String,
    pub size: u64,
}

/// One error or warning from the bundler's result object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMessage {
    pub message: String,
    /// Module the message refers to, with any loader chain removed.
    pub module: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl BundleMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            module: None,
            line: None,
            column: None,
        }
    }

    fn from_value(value: &serde_json::Value) -> Option<Self> {
        if let Some(s) = value.as_str() {
            return Some(Self::new(s));
        }
        let mut msg = Self::new(value.get("message")?.as_str()?);
        msg.module = value
            .get("moduleName")
            .and_then(|m| m.as_str())
            .and_then(|m| m.rsplit('!').next())
            .filter(|m| !m.is_empty())
            .map(PathBuf::from);
        if let Some(loc) = value.get("loc").and_then(|l| l.as_str()) {
            let (line, column) = parse_loc(loc);
            msg.line = line;
            msg.column = column;
        }
        Some(msg)
    }
}

impl From<&str> for BundleMessage {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Start position of a `loc` such as `12:5-10`, `12:5-13:2` or `12`.
fn parse_loc(loc: &str) -> (Option<usize>, Option<usize>) {
    let start = loc.split('-').next().unwrap_or(loc);
    let mut parts = start.split(':');
    let line = parts.next().and_then(|l| l.trim().parse().ok());
    let column = parts.next().and_then(|c| c.trim().parse().ok());
    (line, column)
}

/// The bundler's own result object for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleStats {
    pub errors: Vec<BundleMessage>,
    pub warnings: Vec<BundleMessage>,
    pub assets: Vec<BundleAsset>,
    pub hash: Option<String>,
    pub time_ms: Option<u64>,
}

impl BundleStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Human-readable summary of the run.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref hash) = self.hash {
            lines.push(format!("Hash: {}", hash));
        }
        if let Some(ms) = self.time_ms {
            lines.push(format!("Time: {}ms", ms));
        }
        for asset in &self.assets {
            lines.push(format!("  {:>10}  {}", format_size(asset.size), asset.name));
        }
        lines.push(format!(
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        ));
        lines.join("\n")
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleResult {
    /// The bundler could not produce a result object at all.
    Fatal(String),
    Completed(BundleStats),
}

#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(
        &self,
        config: &BundleConfig,
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<BundleResult>;
}

/// Read error/warning entries that are either plain strings or objects with a
/// `message` field.
fn messages(value: Option<&serde_json::Value>) -> Vec<BundleMessage> {
    value
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(BundleMessage::from_value).collect())
        .unwrap_or_default()
}

/// Parse the bundler's `--json` stats output. Leading non-JSON noise is skipped.
pub fn parse_bundle_stats(stdout: &str) -> Option<BundleStats> {
    let start = stdout.find('{')?;
    let value: serde_json::Value = serde_json::from_str(stdout[start..].trim_end()).ok()?;
    let assets = value
        .get("assets")
        .and_then(|a| a.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    Some(BundleAsset {
                        name: a.get("name")?.as_str()?.to_string(),
                        size: a.get("size").and_then(|s| s.as_u64()).unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(BundleStats {
        errors: messages(value.get("errors")),
        warnings: messages(value.get("warnings")),
        assets,
        hash: value.get("hash").and_then(|h| h.as_str()).map(String::from),
        time_ms: value.get("time").and_then(|t| t.as_u64()),
    })
}

pub struct CommandBundler {
    command: String,
}

impl CommandBundler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(
        &self,
        config: &BundleConfig,
        scratch: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<BundleResult> {
        let config_path = scratch.join("bundle.config.js");
        env.write_file(&config_path, &config.render_module()?).await?;

        let command = format!("{} --config {} --json", self.command, shell_quote(&config_path));
        let result = env.exec_command(&command, TOOL_TIMEOUT_MS, None, None).await?;
        if result.timed_out {
            return Err(StagehandError::CommandTimeout {
                timeout_ms: TOOL_TIMEOUT_MS,
            });
        }
        match parse_bundle_stats(&result.stdout) {
            Some(stats) => Ok(BundleResult::Completed(stats)),
            None => {
                let detail = if result.stderr.trim().is_empty() {
                    result.stdout.trim().to_string()
                } else {
                    result.stderr.trim().to_string()
                };
                Ok(BundleResult::Fatal(format!(
                    "exited with code {}: {}",
                    result.exit_code, detail
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> BundleConfig {
        let mut entries = BTreeMap::new();
        entries.insert("app".to_string(), PathBuf::from("build/client/app-entry.js"));
        BundleConfig::new(entries, "build/public", "[name].js")
    }

    #[test]
    fn config_carries_fixed_asset_rules() {
        let config = sample_config();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].test, r"\.svg$");
        assert_eq!(config.rules[0].loaders[0], serde_json::json!("raw-loader"));
        let plugins = &config.rules[0].loaders[1]["options"]["plugins"];
        assert_eq!(plugins[0], serde_json::json!({ "removeTitle": true }));
        assert_eq!(plugins[2], serde_json::json!({ "convertColors": { "shorthex": false } }));
        assert_eq!(plugins[3], serde_json::json!({ "convertPathData": false }));
        assert_eq!(config.rules[1].loaders.len(), 2);
    }

    #[test]
    fn rendered_module_uses_regexp_tests() {
        let js = sample_config().render_module().unwrap();
        assert!(js.starts_with("module.exports = {"));
        assert!(js.contains(r#""app": "build/client/app-entry.js""#));
        assert!(js.contains(r#"test: new RegExp("\\.svg$")"#));
        assert!(js.contains(r#"filename: "[name].js""#));
    }

    #[test]
    fn parses_stats_with_string_and_object_messages() {
        let stdout = r#"some banner
{"hash":"abc123","time":420,"errors":["Module not found: ./x"],"warnings":[{"message":"asset size limit"}],"assets":[{"name":"app.js","size":2048}]}"#;
        let stats = parse_bundle_stats(stdout).unwrap();
        assert_eq!(stats.errors, vec![BundleMessage::new("Module not found: ./x")]);
        assert_eq!(stats.warnings[0].message, "asset size limit");
        assert_eq!(stats.warnings[0].module, None);
        assert_eq!(stats.assets[0].name, "app.js");
        assert!(stats.has_errors());
        let summary = stats.summary();
        assert!(summary.contains("Hash: abc123"));
        assert!(summary.contains("2.00 KiB"));
        assert!(summary.contains("1 error(s), 1 warning(s)"));
    }

    #[test]
    fn error_objects_carry_module_and_location() {
        let stdout = r#"{"errors":[
            {"message":"Module parse failed","moduleName":"./node_modules/css-loader!./src/client/a.css","loc":"12:5-10"},
            {"message":"Can't resolve './y'","moduleName":"./build/client/app-entry.js","loc":"3"}
        ],"warnings":[]}"#;
        let stats = parse_bundle_stats(stdout).unwrap();
        assert_eq!(stats.errors[0].module, Some(PathBuf::from("./src/client/a.css")));
        assert_eq!(stats.errors[0].line, Some(12));
        assert_eq!(stats.errors[0].column, Some(5));
        assert_eq!(stats.errors[1].line, Some(3));
        assert_eq!(stats.errors[1].column, None);
    }

    #[test]
    fn unparseable_output_has_no_stats() {
        assert!(parse_bundle_stats("Error: Cannot find module 'webpack'").is_none());
    }
}
