//! Network management module
//!
//! Networks are directory-backed namespaces; no bridge or address
//! management takes place.

use crate::error::{RamaError, Result};
use crate::storage::{Namespace, NamespaceRoot};
use std::path::PathBuf;
use tracing::info;

/// Network manager
pub struct NetworkManager {
    root: NamespaceRoot,
}

impl NetworkManager {
    /// Create a new network manager
    pub fn new(base_path: PathBuf) -> Result<Self> {
        Ok(Self {
            root: NamespaceRoot::new(base_path)?,
        })
    }

    /// Create a network; an existing network is returned unchanged
    pub fn create(&self, name: &str) -> Result<Namespace> {
        let network = self.root.create(name)?;
        info!(network = name, "network created");
        Ok(network)
    }

    /// Get a network by name
    pub fn get(&self, name: &str) -> Result<Namespace> {
        self.root
            .get(name)?
            .ok_or_else(|| RamaError::NetworkNotFound(name.to_string()))
    }

    /// List all networks
    pub fn list(&self) -> Result<Vec<Namespace>> {
        self.root.list()
    }
}
