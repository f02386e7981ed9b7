//! Read-only registry of named data sources.
//!
//! The registry is built once per run and shared (via `Arc`) by every boundary
//! invocation. Nothing in the engine mutates source data.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    /// File path relative to the registry root.
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRegistry {
    root: PathBuf,
    sources: BTreeMap<String, DataSource>,
}

impl DatasetRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: BTreeMap::new(),
        }
    }

    /// Build a registry from explicit entries. Duplicate names are rejected.
    pub fn from_sources(root: impl Into<PathBuf>, sources: Vec<DataSource>) -> Result<Self> {
        let mut registry = Self::new(root);
        for source in sources {
            registry.register(source)?;
        }
        Ok(registry)
    }

    /// Register every `*.csv` and `*.json` file directly under `root`, named by file stem.
    pub fn discover(root: &Path) -> Result<Self> {
        let mut registry = Self::new(root);
        let mut entries: Vec<PathBuf> = fs::read_dir(root)
            .with_context(|| format!("read dataset dir {}", root.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("csv" | "json")
                )
            })
            .collect();
        entries.sort();
        for path in entries {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some(file_name) = path.file_name() else {
                continue;
            };
            registry.register(DataSource {
                name: name.to_string(),
                path: PathBuf::from(file_name),
                description: String::new(),
            })?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: DataSource) -> Result<()> {
        if source.name.trim().is_empty() {
            bail!("data source name must be non-empty");
        }
        if self.sources.contains_key(&source.name) {
            bail!("duplicate data source '{}'", source.name);
        }
        self.sources.insert(source.name.clone(), source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DataSource> {
        self.sources.get(name)
    }

    /// Absolute location of a source's file.
    pub fn resolve_path(&self, source: &DataSource) -> PathBuf {
        self.root.join(&source.path)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
