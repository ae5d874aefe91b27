//! Content-hash based versioning
//!
//! A tree version identifies the files of one directory. A module version
//! folds the module's tree version, its build-relevant configuration and the
//! versions of its build dependencies into a single string, so that any
//! change to any of them yields a new version.

mod cache;
mod files;
mod scanner;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::config::{defaults, ModuleConfig};
use crate::error::Result;
use crate::graph::{ConfigGraph, NodeType};
use crate::lock::KeyedLock;

pub use cache::TreeCache;
pub use files::{
    is_version_file_name, read_module_version_file, read_tree_version_file,
    write_module_version_file, write_tree_version_file, MODULE_VERSION_FILENAME,
    TREE_VERSION_FILENAME,
};
pub use scanner::{FileEntry, FileScanner, WalkdirScanner};

/// Content hash of a tree with no files
pub const NULL_HASH: &str = "0000000000";

/// Length of truncated hashes
const HASH_LENGTH: usize = 10;

/// Hash a list of strings: SHA-256 over the `.`-joined inputs, hex encoded
/// and truncated to 10 characters
pub fn hash_strings<S: AsRef<str>>(inputs: &[S]) -> String {
    let joined = inputs
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(".");
    let digest = format!("{:x}", Sha256::digest(joined.as_bytes()));
    digest[..HASH_LENGTH].to_string()
}

/// Version of a set of source files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeVersion {
    pub content_hash: String,
    /// Sorted relative file paths
    pub files: Vec<String>,
}

impl TreeVersion {
    /// Version for a tree with no files
    pub fn empty() -> Self {
        Self {
            content_hash: NULL_HASH.to_string(),
            files: Vec::new(),
        }
    }
}

/// Version of a module, including its build dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleVersion {
    pub version_string: String,
    /// Build dependency name to version string
    pub dependency_versions: BTreeMap<String, String>,
    pub files: Vec<String>,
}

/// Compute a module's version string.
///
/// The result does not depend on the order of `dependencies`.
pub fn hash_module_version<N, V>(
    config: &ModuleConfig,
    tree: &TreeVersion,
    dependencies: impl IntoIterator<Item = (N, V)>,
) -> Result<String>
where
    N: AsRef<str>,
    V: AsRef<str>,
{
    let config_string = match &config.build_config {
        Some(build_config) => serde_json::to_string(build_config)?,
        None => {
            let mut value = serde_json::to_value(config)?;
            if let Some(map) = value.as_object_mut() {
                map.remove("path");
                map.remove("outputs");
            }
            serde_json::to_string(&value)?
        }
    };

    let mut versions: Vec<(String, String)> = dependencies
        .into_iter()
        .map(|(n, v)| (n.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    versions.push((config.name.clone(), tree.content_hash.clone()));
    versions.sort();

    let mut inputs = Vec::with_capacity(versions.len() + 1);
    inputs.push(config_string);
    inputs.extend(versions.into_iter().map(|(_, v)| v));

    Ok(format!("v-{}", hash_strings(&inputs)))
}

/// Computes and caches tree and module versions
pub struct VcsHandler {
    scanner: Arc<dyn FileScanner>,
    cache: Mutex<TreeCache>,
    locks: KeyedLock,
    file_count_warning_threshold: usize,
}

impl std::fmt::Debug for VcsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcsHandler")
            .field("file_count_warning_threshold", &self.file_count_warning_threshold)
            .finish_non_exhaustive()
    }
}

impl Default for VcsHandler {
    fn default() -> Self {
        Self::new(Arc::new(WalkdirScanner::new()))
    }
}

impl VcsHandler {
    pub fn new(scanner: Arc<dyn FileScanner>) -> Self {
        Self {
            scanner,
            cache: Mutex::new(TreeCache::new()),
            locks: KeyedLock::new(),
            file_count_warning_threshold: 10_000,
        }
    }

    /// Warn when a tree contains more files than this
    pub fn with_file_count_warning_threshold(mut self, threshold: usize) -> Self {
        self.file_count_warning_threshold = threshold;
        self
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, TreeCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the version of the files under `path`
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn get_tree_version(
        &self,
        path: &Path,
        include: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> Result<TreeVersion> {
        let key = cache_key(path, include, exclude);
        let _guard = self.locks.acquire(&key).await;

        if let Some(version) = self.cache().get(&key) {
            debug!("tree version cache hit");
            return Ok(version);
        }

        let mut entries = self.scanner.get_files(path, include, exclude).await?;
        entries.retain(|entry| {
            let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
            !defaults::is_config_file_name(name) && !is_version_file_name(name)
        });
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        if entries.len() > self.file_count_warning_threshold {
            warn!(
                path = %path.display(),
                files = entries.len(),
                threshold = self.file_count_warning_threshold,
                "large number of files in module, consider narrowing it with include/exclude filters"
            );
        }

        let version = if entries.is_empty() {
            TreeVersion::empty()
        } else {
            let hashes: Vec<&str> = entries.iter().map(|e| e.hash.as_str()).collect();
            TreeVersion {
                content_hash: hash_strings(&hashes),
                files: entries.into_iter().map(|e| e.path).collect(),
            }
        };

        debug!(hash = %version.content_hash, files = version.files.len(), "computed tree version");
        self.cache().set(key, path, version.clone());
        Ok(version)
    }

    /// Get a module's tree version, preferring a pinned version file
    pub async fn resolve_tree_version(&self, module: &ModuleConfig) -> Result<TreeVersion> {
        let pinned = module.path.join(TREE_VERSION_FILENAME);
        if let Some(version) = read_tree_version_file(&pinned)? {
            debug!(module = %module.name, "using pinned tree version");
            return Ok(version);
        }

        self.get_tree_version(
            &module.path,
            module.include.as_deref(),
            module.exclude.as_deref(),
        )
        .await
    }

    /// Compute a module's version given the versions of its build dependencies
    pub async fn resolve_module_version(
        &self,
        module: &ModuleConfig,
        resolved: &BTreeMap<String, ModuleVersion>,
    ) -> Result<ModuleVersion> {
        let tree = self.resolve_tree_version(module).await?;

        let dependency_versions: BTreeMap<String, String> = module
            .build
            .dependencies
            .iter()
            .filter_map(|dep| {
                resolved
                    .get(&dep.name)
                    .map(|v| (dep.name.clone(), v.version_string.clone()))
            })
            .collect();

        let version_string = hash_module_version(module, &tree, &dependency_versions)?;

        Ok(ModuleVersion {
            version_string,
            dependency_versions,
            files: tree.files,
        })
    }

    /// Compute the version of every module, build dependencies first
    #[instrument(skip_all)]
    pub async fn resolve_module_versions(
        &self,
        graph: &ConfigGraph,
    ) -> Result<BTreeMap<String, ModuleVersion>> {
        self.resolve_in_order(graph, graph.build_order().iter()).await
    }

    /// Compute the versions of the given modules and their build dependencies
    pub async fn resolve_module_versions_for(
        &self,
        graph: &ConfigGraph,
        modules: &[String],
    ) -> Result<BTreeMap<String, ModuleVersion>> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        for name in modules {
            graph.get_module(name, true)?;
            needed.insert(name);
            let deps = graph.get_dependencies(NodeType::Build, name, true)?;
            needed.extend(deps.build.iter().map(|m| m.name.as_str()));
        }

        let order = graph
            .build_order()
            .iter()
            .filter(|name| needed.contains(name.as_str()));
        self.resolve_in_order(graph, order).await
    }

    async fn resolve_in_order<'a>(
        &self,
        graph: &ConfigGraph,
        order: impl Iterator<Item = &'a String>,
    ) -> Result<BTreeMap<String, ModuleVersion>> {
        let mut versions = BTreeMap::new();
        for name in order {
            let module = graph.get_module(name, true)?;
            let version = self.resolve_module_version(module, &versions).await?;
            debug!(module = %name, version = %version.version_string, "resolved module version");
            versions.insert(name.clone(), version);
        }
        Ok(versions)
    }

    /// Drop cached tree versions for `path` and its ancestors
    pub fn invalidate(&self, path: &Path) {
        self.cache().invalidate_up(path);
    }

    /// Drop every cached tree version
    pub fn clear_cache(&self) {
        self.cache().clear();
    }
}

fn cache_key(path: &Path, include: Option<&[String]>, exclude: Option<&[String]>) -> String {
    let mut parts: Vec<String> = vec![path.display().to_string()];
    if let Some(include) = include {
        parts.push(format!("include:{}", hash_strings(include)));
    }
    if let Some(exclude) = exclude {
        parts.push(format!("exclude:{}", hash_strings(exclude)));
    }
    parts.join("|")
}

/// Path of a module's pinned module version file
pub fn module_version_file_path(module: &ModuleConfig) -> PathBuf {
    module.path.join(MODULE_VERSION_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeEntityConfig;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Scanner counting its calls, slow enough to overlap concurrent callers
    struct CountingScanner {
        inner: WalkdirScanner,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FileScanner for CountingScanner {
        async fn get_files(
            &self,
            path: &Path,
            include: Option<&[String]>,
            exclude: Option<&[String]>,
        ) -> Result<Vec<FileEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inner.get_files(path, include, exclude).await
        }
    }

    fn counting() -> Arc<CountingScanner> {
        Arc::new(CountingScanner {
            inner: WalkdirScanner::new(),
            calls: AtomicUsize::new(0),
        })
    }

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_hash_strings() {
        let hash = hash_strings(&["a", "b"]);
        assert_eq!(hash.len(), 10);
        assert_eq!(hash, hash_strings(&["a".to_string(), "b".to_string()]));
        assert_ne!(hash, hash_strings(&["b", "a"]));
        // sha256("a.b")
        assert_eq!(hash, "2e7336dc8e");
    }

    #[tokio::test]
    async fn test_tree_version_idempotent() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/lib.rs", "pub fn a() {}");

        let vcs = VcsHandler::default();
        let v1 = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        vcs.clear_cache();
        let v2 = vcs.get_tree_version(temp.path(), None, None).await.unwrap();

        assert_eq!(v1, v2);
        assert_eq!(v1.files, vec!["src/lib.rs"]);
    }

    #[tokio::test]
    async fn test_tree_version_changes_with_content() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "one");

        let vcs = VcsHandler::default();
        let v1 = vcs.get_tree_version(temp.path(), None, None).await.unwrap();

        write(temp.path(), "a.txt", "two");
        // still cached until invalidated
        let cached = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        assert_eq!(v1, cached);

        vcs.invalidate(&temp.path().join("a.txt"));
        let v2 = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        assert_ne!(v1.content_hash, v2.content_hash);
    }

    #[tokio::test]
    async fn test_empty_tree_uses_null_hash() {
        let temp = TempDir::new().unwrap();
        let vcs = VcsHandler::default();
        let version = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        assert_eq!(version.content_hash, NULL_HASH);
        assert!(version.files.is_empty());
    }

    #[tokio::test]
    async fn test_config_and_version_files_excluded() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "trellis.yaml", "modules: []");
        write(temp.path(), "sub/.trellis-module-version", "");
        write(temp.path(), "main.go", "package main");

        let vcs = VcsHandler::default();
        let version = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        assert_eq!(version.files, vec!["main.go"]);
    }

    #[tokio::test]
    async fn test_concurrent_scans_share_one_call() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "a");

        let scanner = counting();
        let vcs = VcsHandler::new(scanner.clone());
        let (a, b) = tokio::join!(
            vcs.get_tree_version(temp.path(), None, None),
            vcs.get_tree_version(temp.path(), None, None)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_include_filters_use_separate_cache_entries() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/a.rs", "a");
        write(temp.path(), "docs/b.md", "b");

        let scanner = counting();
        let vcs = VcsHandler::new(scanner.clone());
        let include = vec!["src/**".to_string()];

        let all = vcs.get_tree_version(temp.path(), None, None).await.unwrap();
        let src = vcs
            .get_tree_version(temp.path(), Some(include.as_slice()), None)
            .await
            .unwrap();

        assert_eq!(all.files.len(), 2);
        assert_eq!(src.files, vec!["src/a.rs"]);
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pinned_tree_version_preferred() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "vendor.c", "int x;");
        let pinned = TreeVersion {
            content_hash: "pinned1234".to_string(),
            files: vec!["vendor.c".to_string()],
        };
        write_tree_version_file(&temp.path().join(TREE_VERSION_FILENAME), &pinned).unwrap();

        let module = ModuleConfig::new("vendored").with_path(temp.path());
        let vcs = VcsHandler::default();
        assert_eq!(vcs.resolve_tree_version(&module).await.unwrap(), pinned);
    }

    #[tokio::test]
    async fn test_malformed_pinned_version_is_error() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), TREE_VERSION_FILENAME, "not json");

        let module = ModuleConfig::new("vendored").with_path(temp.path());
        let vcs = VcsHandler::default();
        let err = vcs.resolve_tree_version(&module).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_module_version_independent_of_dependency_order() {
        let module = ModuleConfig::new("api")
            .with_build_dependency("a")
            .with_build_dependency("b");
        let tree = TreeVersion {
            content_hash: "abcdef0123".to_string(),
            files: Vec::new(),
        };

        let forward = hash_module_version(&module, &tree, [("a", "v-1"), ("b", "v-2")]).unwrap();
        let reverse = hash_module_version(&module, &tree, [("b", "v-2"), ("a", "v-1")]).unwrap();
        assert_eq!(forward, reverse);
        assert!(forward.starts_with("v-"));
        assert_eq!(forward.len(), 12);

        let changed = hash_module_version(&module, &tree, [("a", "v-1"), ("b", "v-3")]).unwrap();
        assert_ne!(forward, changed);
    }

    #[test]
    fn test_module_version_ignores_path_and_outputs() {
        let tree = TreeVersion::empty();
        let deps: [(&str, &str); 0] = [];

        let mut a = ModuleConfig::new("api").with_path("/home/alice/api");
        let mut b = ModuleConfig::new("api").with_path("/ci/checkout/api");
        a.outputs = vec!["dist/**".to_string()];
        b.outputs = vec!["build/**".to_string()];
        assert_eq!(
            hash_module_version(&a, &tree, deps).unwrap(),
            hash_module_version(&b, &tree, deps).unwrap()
        );

        let c = ModuleConfig::new("api").with_build_command("make release");
        assert_ne!(
            hash_module_version(&a, &tree, deps).unwrap(),
            hash_module_version(&c, &tree, deps).unwrap()
        );
    }

    #[test]
    fn test_module_version_uses_build_config_when_set() {
        let tree = TreeVersion::empty();
        let deps: [(&str, &str); 0] = [];

        let mut a = ModuleConfig::new("api").with_service(RuntimeEntityConfig::new("api"));
        let mut b = ModuleConfig::new("api").with_service(RuntimeEntityConfig::new("api").with_command("serve"));
        a.build_config = Some(serde_json::json!({"dockerfile": "Dockerfile"}));
        b.build_config = Some(serde_json::json!({"dockerfile": "Dockerfile"}));
        assert_eq!(
            hash_module_version(&a, &tree, deps).unwrap(),
            hash_module_version(&b, &tree, deps).unwrap()
        );
    }

    #[tokio::test]
    async fn test_resolve_module_versions_folds_dependencies() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "base/lib.txt", "base");
        write(temp.path(), "api/main.txt", "api");

        let modules = vec![
            ModuleConfig::new("base").with_path(temp.path().join("base")),
            ModuleConfig::new("api")
                .with_path(temp.path().join("api"))
                .with_build_dependency("base"),
        ];
        let graph = ConfigGraph::build(modules).unwrap();
        let vcs = VcsHandler::default();

        let before = vcs.resolve_module_versions(&graph).await.unwrap();
        assert_eq!(
            before["api"].dependency_versions["base"],
            before["base"].version_string
        );

        write(temp.path(), "base/lib.txt", "base v2");
        vcs.invalidate(&temp.path().join("base/lib.txt"));
        let after = vcs
            .resolve_module_versions_for(&graph, &["api".to_string()])
            .await
            .unwrap();

        assert_eq!(after.len(), 2);
        assert_ne!(before["base"].version_string, after["base"].version_string);
        assert_ne!(before["api"].version_string, after["api"].version_string);
    }
}
