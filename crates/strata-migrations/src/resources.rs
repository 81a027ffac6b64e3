//! Named text resources that make up a roadmap.
//!
//! A roadmap is a flat set of resources: `<version>.json` phase documents
//! and `<version>[_label].sql` DDL scripts. Anything else is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};

/// Enumerates and reads roadmap resources.
pub trait ResourceLoader: Send + Sync {
    /// Lists resource names.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::RoadmapUnavailable`] when the resource set
    /// cannot be enumerated.
    fn list(&self) -> MigrationResult<Vec<String>>;

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::RoadmapUnavailable`] when the resource
    /// cannot be read.
    fn read(&self, name: &str) -> MigrationResult<String>;

    /// Where the resources come from, for log messages.
    fn describe(&self) -> String;
}

/// Reads resources from the files of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryResourceLoader {
    root: PathBuf,
}

impl DirectoryResourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceLoader for DirectoryResourceLoader {
    fn list(&self) -> MigrationResult<Vec<String>> {
        let unavailable =
            |e: std::io::Error| MigrationError::RoadmapUnavailable(format!("{}: {e}", self.root.display()));
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(unavailable)? {
            let entry = entry.map_err(unavailable)?;
            if entry.file_type().map_err(unavailable)?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> MigrationResult<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path)
            .map_err(|e| MigrationError::RoadmapUnavailable(format!("{}: {e}", path.display())))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Serves resources held in memory, such as `include_str!` embeds.
#[derive(Debug, Clone, Default)]
pub struct StaticResourceLoader {
    entries: Vec<(String, String)>,
}

impl StaticResourceLoader {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }
}

impl ResourceLoader for StaticResourceLoader {
    fn list(&self) -> MigrationResult<Vec<String>> {
        Ok(self.entries.iter().map(|(name, _)| name.clone()).collect())
    }

    fn read(&self, name: &str) -> MigrationResult<String> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| MigrationError::RoadmapUnavailable(format!("no resource named {name}")))
    }

    fn describe(&self) -> String {
        format!("{} static resources", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_loader_lists_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2.0.json"), "{}").unwrap();
        fs::write(dir.path().join("1.0.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let loader = DirectoryResourceLoader::new(dir.path());
        assert_eq!(loader.list().unwrap(), ["1.0.json", "2.0.json"]);
        assert_eq!(loader.read("1.0.json").unwrap(), "{}");
        assert!(loader.read("3.0.json").is_err());
    }

    #[test]
    fn test_directory_loader_missing_root() {
        let loader = DirectoryResourceLoader::new("/definitely/not/here");
        assert!(matches!(
            loader.list(),
            Err(MigrationError::RoadmapUnavailable(_))
        ));
    }

    #[test]
    fn test_static_loader() {
        let loader = StaticResourceLoader::new(vec![("1.json".into(), "x".into())]);
        assert_eq!(loader.list().unwrap(), ["1.json"]);
        assert_eq!(loader.read("1.json").unwrap(), "x");
        assert!(loader.read("2.json").is_err());
        assert_eq!(loader.describe(), "1 static resources");
    }
}
