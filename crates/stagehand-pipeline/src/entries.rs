//! Entry discovery: derive bundle entries from compiled client output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stagehand_tools::ExecutionEnvironment;
use stagehand_types::Result;

/// Bundle name → entry file.
pub type EntryMapping = BTreeMap<String, PathBuf>;

/// List the files directly inside `dir` and keep those whose name ends in
/// `suffix`; each becomes an entry named by the part before the suffix.
///
/// An empty mapping is a valid result. A missing `dir` is an I/O error.
pub async fn discover_entries(
    env: &dyn ExecutionEnvironment,
    dir: &Path,
    suffix: &str,
) -> Result<EntryMapping> {
    let mut mapping = EntryMapping::new();
    for entry in env.list_directory(dir, 1).await? {
        if entry.is_dir {
            continue;
        }
        let Some(file_name) = entry.path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(name) = file_name.strip_suffix(suffix) {
            if name.is_empty() {
                continue;
            }
            mapping.insert(name.to_string(), entry.path.clone());
        }
    }
    tracing::debug!(dir = %dir.display(), entries = mapping.len(), "Entries discovered");
    Ok(mapping)
}
