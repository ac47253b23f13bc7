//! Directory-backed namespaces
//!
//! Networks and volumes are plain named directories: creating one is
//! idempotent and existence is their only state.

use super::{fs as store_fs, validate_name};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// A named namespace directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name
    pub name: String,
    /// Directory backing the namespace
    pub path: PathBuf,
    /// Creation time, from the directory metadata when available
    pub created_at: Option<DateTime<Utc>>,
}

/// Root directory holding one subdirectory per namespace
#[derive(Debug, Clone)]
pub struct NamespaceRoot {
    root: PathBuf,
}

impl NamespaceRoot {
    /// Open (and create if needed) a namespace root
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Create a namespace; creating an existing one is not an error
    pub fn create(&self, name: &str) -> Result<Namespace> {
        validate_name(name)?;
        let path = self.root.join(name);
        fs::create_dir_all(&path)?;
        Ok(self.describe(name, path))
    }

    /// Look up a namespace by name
    pub fn get(&self, name: &str) -> Result<Option<Namespace>> {
        validate_name(name)?;
        let path = self.root.join(name);
        if !path.is_dir() {
            return Ok(None);
        }
        Ok(Some(self.describe(name, path)))
    }

    /// All namespaces, sorted by name
    pub fn list(&self) -> Result<Vec<Namespace>> {
        let names = store_fs::list_dirs(&self.root)?;
        Ok(names
            .into_iter()
            .map(|name| {
                let path = self.root.join(&name);
                self.describe(&name, path)
            })
            .collect())
    }

    fn describe(&self, name: &str, path: PathBuf) -> Namespace {
        let created_at = fs::metadata(&path)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .ok()
            .map(DateTime::<Utc>::from);

        Namespace {
            name: name.to_string(),
            path,
            created_at,
        }
    }
}
