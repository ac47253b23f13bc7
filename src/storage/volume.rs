//! Volume management

use super::namespace::{Namespace, NamespaceRoot};
use crate::error::{RamaError, Result};
use std::path::PathBuf;
use tracing::info;

/// Volume manager
pub struct VolumeManager {
    root: NamespaceRoot,
}

impl VolumeManager {
    /// Create a new volume manager
    pub fn new(base_path: PathBuf) -> Result<Self> {
        Ok(Self {
            root: NamespaceRoot::new(base_path)?,
        })
    }

    /// Create a volume; an existing volume is returned unchanged
    pub fn create(&self, name: &str) -> Result<Namespace> {
        let volume = self.root.create(name)?;
        info!(volume = name, path = %volume.path.display(), "volume created");
        Ok(volume)
    }

    /// Get a volume by name
    pub fn get(&self, name: &str) -> Result<Namespace> {
        self.root
            .get(name)?
            .ok_or_else(|| RamaError::VolumeNotFound(name.to_string()))
    }

    /// List all volumes
    pub fn list(&self) -> Result<Vec<Namespace>> {
        self.root.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("test-volume").unwrap();
        assert_eq!(volume.name, "test-volume");
        assert!(volume.path.exists());
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let err = manager.get("data").unwrap_err();
        assert!(matches!(err, RamaError::VolumeNotFound(_)));
    }
}
