//! Pipeline composer: merges independent input sources into one unit of work.
//!
//! Each file in the unit remembers which [`SourceSet`] it came from, so the
//! stage can decide which outputs to keep (ambient declarations are compiled
//! against but never emitted).

use std::collections::HashSet;
use std::path::PathBuf;

/// A named group of input files, e.g. project sources or ambient typings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    pub origin: String,
    pub files: Vec<PathBuf>,
}

impl SourceSet {
    pub fn new(origin: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
            files,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedFile {
    pub path: PathBuf,
    pub origin: String,
}

/// The merged, de-duplicated file list handed to a tool in one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    files: Vec<ComposedFile>,
}

impl UnitOfWork {
    /// Merge `sets` in order. A path present in several sets is kept once,
    /// attributed to the first set that named it.
    pub fn compose(sets: impl IntoIterator<Item = SourceSet>) -> Self {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for set in sets {
            for path in set.files {
                if seen.insert(path.clone()) {
                    files.push(ComposedFile {
                        path,
                        origin: set.origin.clone(),
                    });
                }
            }
        }
        Self { files }
    }

    pub fn files(&self) -> &[ComposedFile] {
        &self.files
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn files_from(&self, origin: &str) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.origin == origin)
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_preserves_order_and_attribution() {
        let unit = UnitOfWork::compose([
            SourceSet::new("sources", vec!["b.ts".into(), "a.ts".into()]),
            SourceSet::new("typings", vec!["typings/node.d.ts".into()]),
        ]);
        assert_eq!(
            unit.paths(),
            vec![
                PathBuf::from("b.ts"),
                PathBuf::from("a.ts"),
                PathBuf::from("typings/node.d.ts"),
            ]
        );
        assert_eq!(
            unit.files_from("sources"),
            vec![PathBuf::from("b.ts"), PathBuf::from("a.ts")]
        );
        assert_eq!(unit.files_from("typings"), vec![PathBuf::from("typings/node.d.ts")]);
        assert!(unit.files_from("vendor").is_empty());
    }

    #[test]
    fn duplicate_paths_keep_first_origin() {
        let unit = UnitOfWork::compose([
            SourceSet::new("sources", vec!["shared.d.ts".into()]),
            SourceSet::new("typings", vec!["shared.d.ts".into(), "x.d.ts".into()]),
        ]);
        assert_eq!(unit.len(), 2);
        assert_eq!(unit.files()[0].origin, "sources");
        assert_eq!(unit.files_from("typings"), vec![PathBuf::from("x.d.ts")]);
    }

    #[test]
    fn empty_sets_compose_to_empty_unit() {
        let unit = UnitOfWork::compose([SourceSet::new("sources", vec![])]);
        assert!(unit.is_empty());
    }
}
