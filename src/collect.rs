//! Artifact collection from the tool's output locations.
//!
//! After a successful generate phase the tool leaves a directory of
//! analysis documents and a single summary document behind. Each location
//! is read independently: a missing or unreadable one is logged and
//! recorded in [`Collection::skipped`], never fatal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ArtifactsConfig;
use crate::models::{Artifact, ArtifactKind, SUMMARY_ARTIFACT_NAME};

/// Where the tool writes its outputs, relative to the materialized source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub docs_dir: PathBuf,
    pub summary_file: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::from_config(&ArtifactsConfig::default())
    }
}

impl OutputLayout {
    pub fn from_config(config: &ArtifactsConfig) -> Self {
        Self {
            docs_dir: config.docs_dir.clone(),
            summary_file: config.summary_file.clone(),
        }
    }
}

/// A location or file that could not be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Sorted by name; names are unique.
    pub artifacts: Vec<Artifact>,
    pub skipped: Vec<Skipped>,
}

pub fn collect_artifacts(root: &Path, layout: &OutputLayout) -> Collection {
    let mut collection = Collection::default();
    let mut seen: HashSet<String> = HashSet::new();

    collect_docs_dir(&root.join(&layout.docs_dir), &mut collection, &mut seen);

    let summary_path = root.join(&layout.summary_file);
    match std::fs::read_to_string(&summary_path) {
        Ok(content) => {
            collection.artifacts.push(Artifact {
                name: SUMMARY_ARTIFACT_NAME.to_string(),
                kind: ArtifactKind::Readme,
                content,
                source_path: Some(summary_path.display().to_string()),
            });
        }
        Err(e) => skip(&mut collection, summary_path, e.to_string()),
    }

    collection.artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    collection
}

fn collect_docs_dir(dir: &Path, collection: &mut Collection, seen: &mut HashSet<String>) {
    if !dir.is_dir() {
        skip(collection, dir.to_path_buf(), "analysis directory not found".to_string());
        return;
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                skip(collection, path, e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let name = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_string(),
            None => continue,
        };
        if name == SUMMARY_ARTIFACT_NAME {
            skip(collection, path.to_path_buf(), "name is reserved for the summary".to_string());
            continue;
        }
        if !seen.insert(name.clone()) {
            skip(collection, path.to_path_buf(), format!("duplicate artifact name '{}'", name));
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => collection.artifacts.push(Artifact {
                name,
                kind: ArtifactKind::Analysis,
                content,
                source_path: Some(path.display().to_string()),
            }),
            Err(e) => {
                seen.remove(&name);
                skip(collection, path.to_path_buf(), e.to_string());
            }
        }
    }
}

fn skip(collection: &mut Collection, path: PathBuf, reason: String) {
    tracing::warn!(path = %path.display(), "skipping artifact location: {}", reason);
    collection.skipped.push(Skipped { path, reason });
}
