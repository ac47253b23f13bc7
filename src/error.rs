//! Error types for Rama

use thiserror::Error;

/// Result type for Rama operations
pub type Result<T> = std::result::Result<T, RamaError>;

/// Rama error types
#[derive(Error, Debug)]
pub enum RamaError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image already exists: {0} (use --overwrite to replace it)")]
    ImageExists(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Process {pid} recorded for container {name} was replaced by another process")]
    ProcessReused { name: String, pid: u32 },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Corrupt state record for container {name}: {reason}")]
    StateCorruption { name: String, reason: String },

    #[error("Invalid name {0:?}: names must match [A-Za-z0-9][A-Za-z0-9_.-]*")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RamaError {
    /// True for the "something named X does not exist" family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RamaError::ContainerNotFound(_)
                | RamaError::ImageNotFound(_)
                | RamaError::NetworkNotFound(_)
                | RamaError::VolumeNotFound(_)
        )
    }

    /// True for name collisions on create
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RamaError::ContainerExists(_) | RamaError::ImageExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RamaError::ContainerNotFound("c1".into()).is_not_found());
        assert!(RamaError::VolumeNotFound("v".into()).is_not_found());
        assert!(!RamaError::Transfer("boom".into()).is_not_found());
        assert!(RamaError::ImageExists("web".into()).is_duplicate());
        assert!(!RamaError::Process("x".into()).is_duplicate());
    }

    #[test]
    fn test_error_messages() {
        let err = RamaError::StateCorruption {
            name: "c1".into(),
            reason: "expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt state record for container c1: expected value"
        );
    }
}
