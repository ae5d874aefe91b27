//! File listing and hashing

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, TrellisError, VersionError};

/// A file with the hash of its contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the scanned directory, `/`-separated
    pub path: String,
    /// SHA-256 hex digest of the contents
    pub hash: String,
}

/// Lists the files making up a unit of source code
#[async_trait]
pub trait FileScanner: Send + Sync {
    /// List files under `path` matching the include globs (all files when
    /// `None`) and none of the exclude globs
    async fn get_files(
        &self,
        path: &Path,
        include: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> Result<Vec<FileEntry>>;
}

/// Scanner walking the file system directly
#[derive(Debug, Clone)]
pub struct WalkdirScanner {
    /// Directory names never descended into
    ignored_dirs: Vec<String>,
}

impl Default for WalkdirScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl WalkdirScanner {
    pub fn new() -> Self {
        Self {
            ignored_dirs: vec![".git".to_string()],
        }
    }

    /// Skip directories with this name
    pub fn with_ignored_dir(mut self, name: impl Into<String>) -> Self {
        self.ignored_dirs.push(name.into());
        self
    }

    fn scan(
        &self,
        root: &Path,
        include: Option<&GlobSet>,
        exclude: Option<&GlobSet>,
    ) -> Result<Vec<FileEntry>> {
        if !root.is_dir() {
            debug!(path = %root.display(), "scan root does not exist");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter();

        for entry in walker.filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && self
                    .ignored_dirs
                    .iter()
                    .any(|d| e.file_name().to_string_lossy() == d.as_str()))
        }) {
            let entry = entry.map_err(|e| VersionError::ScanFailed {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = relative_path(root, entry.path());
            if let Some(include) = include {
                if !include.is_match(&relative) {
                    continue;
                }
            }
            if let Some(exclude) = exclude {
                if exclude.is_match(&relative) {
                    continue;
                }
            }

            let contents = fs::read(entry.path())?;
            let hash = format!("{:x}", Sha256::digest(&contents));
            files.push(FileEntry {
                path: relative,
                hash,
            });
        }

        Ok(files)
    }
}

#[async_trait]
impl FileScanner for WalkdirScanner {
    async fn get_files(
        &self,
        path: &Path,
        include: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> Result<Vec<FileEntry>> {
        let include = include.map(build_globset).transpose()?;
        let exclude = exclude.map(build_globset).transpose()?;
        let root: PathBuf = path.to_path_buf();
        let scanner = self.clone();

        tokio::task::spawn_blocking(move || scanner.scan(&root, include.as_ref(), exclude.as_ref()))
            .await
            .map_err(|e| TrellisError::other(format!("file scan task failed: {}", e)))?
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| VersionError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        VersionError::InvalidPattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        }
        .into()
    })
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn test_lists_and_hashes_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/main.rs", "fn main() {}");
        write(temp.path(), "README.md", "hello");

        let mut files = WalkdirScanner::new()
            .get_files(temp.path(), None, None)
            .await
            .unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "README.md");
        assert_eq!(files[1].path, "src/main.rs");
        assert_eq!(files[0].hash.len(), 64);
    }

    #[tokio::test]
    async fn test_include_and_exclude() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/lib.rs", "a");
        write(temp.path(), "src/gen/out.rs", "b");
        write(temp.path(), "docs/index.md", "c");

        let include = vec!["src/**".to_string()];
        let exclude = vec!["src/gen/**".to_string()];
        let files = WalkdirScanner::new()
            .get_files(temp.path(), Some(include.as_slice()), Some(exclude.as_slice()))
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/lib.rs");
    }

    #[tokio::test]
    async fn test_skips_git_directory() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), ".git/HEAD", "ref");
        write(temp.path(), "a.txt", "a");

        let files = WalkdirScanner::new()
            .get_files(temp.path(), None, None)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let files = WalkdirScanner::new()
            .get_files(&temp.path().join("nope"), None, None)
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let include = vec!["src/[".to_string()];
        let err = WalkdirScanner::new()
            .get_files(temp.path(), Some(include.as_slice()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrellisError::Version(VersionError::InvalidPattern { .. })
        ));
    }
}
