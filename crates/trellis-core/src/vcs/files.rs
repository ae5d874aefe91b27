//! Version file persistence
//!
//! Version files pin a version for code that is not under version control,
//! such as vendored sources. An empty file counts as absent.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, VersionError};

use super::{ModuleVersion, TreeVersion};

/// File pinning a tree version
pub const TREE_VERSION_FILENAME: &str = ".trellis-version";

/// File pinning a module version
pub const MODULE_VERSION_FILENAME: &str = ".trellis-module-version";

/// Whether a file name is one of the version files
pub fn is_version_file_name(name: &str) -> bool {
    name == TREE_VERSION_FILENAME || name == MODULE_VERSION_FILENAME
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents).map(Some).map_err(|e| {
        VersionError::MalformedVersionFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    debug!(path = %path.display(), "wrote version file");
    Ok(())
}

/// Read a tree version file
pub fn read_tree_version_file(path: &Path) -> Result<Option<TreeVersion>> {
    read_json(path)
}

/// Write a tree version file
pub fn write_tree_version_file(path: &Path, version: &TreeVersion) -> Result<()> {
    write_json(path, version)
}

/// Read a module version file
pub fn read_module_version_file(path: &Path) -> Result<Option<ModuleVersion>> {
    read_json(path)
}

/// Write a module version file
pub fn write_module_version_file(path: &Path, version: &ModuleVersion) -> Result<()> {
    write_json(path, version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrellisError;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_empty_files_are_absent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TREE_VERSION_FILENAME);
        assert!(read_tree_version_file(&path).unwrap().is_none());

        fs::write(&path, "  \n\t").unwrap();
        assert!(read_tree_version_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TREE_VERSION_FILENAME);
        fs::write(&path, "{ not json").unwrap();

        let err = read_tree_version_file(&path).unwrap_err();
        assert!(matches!(
            err,
            TrellisError::Version(VersionError::MalformedVersionFile { .. })
        ));
    }

    #[test]
    fn test_write_then_read_module_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MODULE_VERSION_FILENAME);

        let mut deps = BTreeMap::new();
        deps.insert("base".to_string(), "v-abc".to_string());
        let version = ModuleVersion {
            version_string: "v-0123456789".to_string(),
            dependency_versions: deps,
            files: vec!["src/lib.rs".to_string()],
        };
        write_module_version_file(&path, &version).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"versionString\""));
        assert!(raw.contains("\"dependencyVersions\""));

        assert_eq!(read_module_version_file(&path).unwrap(), Some(version));
    }

    #[test]
    fn test_tree_version_camel_case() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TREE_VERSION_FILENAME);
        fs::write(&path, r#"{"contentHash": "abc", "files": ["a"]}"#).unwrap();

        let version = read_tree_version_file(&path).unwrap().unwrap();
        assert_eq!(version.content_hash, "abc");
        assert_eq!(version.files, vec!["a"]);
    }
}
