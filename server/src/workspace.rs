//! Folder indexing
//!
//! Walks a directory tree and turns matching files into documents keyed by
//! their path.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use localforge_store::{IndexReport, RawDocument, Retriever};

use crate::error::{ServerError, ServerResult};

/// Extensions indexed when the caller names none
pub const DEFAULT_EXTENSIONS: &[&str] = &[".py", ".js", ".ts", ".md", ".txt"];

/// Directory names never descended into
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "__pycache__",
    "dist",
    "build",
    "out",
    "vendor",
];

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Lowercase extensions with a leading dot
    pub extensions: Vec<String>,
    /// Glob patterns matched against paths relative to the root
    pub exclude: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
        }
    }
}

impl WalkOptions {
    /// Options for the given extensions (with or without dot); empty keeps defaults
    pub fn new(extensions: &[String], exclude: &[String]) -> Self {
        let mut options = Self {
            exclude: exclude.to_vec(),
            ..Default::default()
        };
        if !extensions.is_empty() {
            options.extensions = extensions
                .iter()
                .map(|e| {
                    let e = e.trim().to_ascii_lowercase();
                    if e.starts_with('.') {
                        e
                    } else {
                        format!(".{}", e)
                    }
                })
                .collect();
        }
        options
    }

    fn exclude_set(&self) -> ServerResult<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }

    fn accepts(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = format!(".{}", ext.to_ascii_lowercase());
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }
}

/// Documents found under a root
#[derive(Debug, Default)]
pub struct FolderScan {
    pub documents: Vec<RawDocument>,
    /// Matching files that could not be read
    pub unreadable: usize,
}

/// Collect every matching file under `root`, sorted by path
pub fn collect_documents(root: &Path, options: &WalkOptions) -> ServerResult<FolderScan> {
    if !root.exists() {
        return Err(ServerError::PathNotFound(root.to_path_buf()));
    }
    let excludes = options.exclude_set()?;

    let mut files = Vec::new();
    if root.is_file() {
        if options.accepts(root) {
            files.push(root.to_path_buf());
        }
    } else {
        walk(root, root, options, &excludes, &mut files);
    }
    files.sort();

    let mut scan = FolderScan::default();
    for path in files {
        match fs::read(&path) {
            Ok(bytes) => scan.documents.push(to_document(&path, &bytes)),
            Err(e) => {
                tracing::warn!("Skipping unreadable file {:?}: {}", path, e);
                scan.unreadable += 1;
            }
        }
    }

    tracing::debug!(
        "Found {} files under {:?} ({} unreadable)",
        scan.documents.len(),
        root,
        scan.unreadable
    );
    Ok(scan)
}

fn walk(root: &Path, dir: &Path, options: &WalkOptions, excludes: &GlobSet, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read directory {:?}: {}", dir, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // Skip hidden files/directories and common exclusions
        if name.starts_with('.') {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path);
        if excludes.is_match(relative) {
            continue;
        }

        // Symlinks are not followed
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if !SKIPPED_DIRS.contains(&name) {
                walk(root, &path, options, excludes, out);
            }
        } else if file_type.is_file() && options.accepts(&path) {
            out.push(path);
        }
    }
}

fn to_document(path: &Path, bytes: &[u8]) -> RawDocument {
    let path_str = path.to_string_lossy().into_owned();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default();

    RawDocument::new(path_str.clone(), String::from_utf8_lossy(bytes).into_owned())
        .with_metadata("path", path_str)
        .with_metadata("extension", extension)
        .with_metadata("size", bytes.len() as u64)
}

/// Walk `root` and index everything found
pub async fn index_folder(
    retriever: &Retriever,
    root: &Path,
    options: &WalkOptions,
) -> ServerResult<IndexReport> {
    let root_owned = root.to_path_buf();
    let options_owned = options.clone();
    let scan = tokio::task::spawn_blocking(move || collect_documents(&root_owned, &options_owned))
        .await
        .map_err(|e| ServerError::Io(std::io::Error::other(e)))??;

    if scan.documents.is_empty() {
        tracing::info!("No matching files under {:?}", root);
        return Ok(IndexReport::default());
    }

    tracing::info!("Indexing {} files from {:?}", scan.documents.len(), root);
    Ok(retriever.index_documents(scan.documents).await?)
}
