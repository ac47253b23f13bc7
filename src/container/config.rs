//! Container configuration

use crate::runtime::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Working directory claimed, process not started yet
    Created,
    /// Process is running
    Running,
    /// Process is gone; working directory kept until removal
    Stopped,
    /// Working directory deleted
    Removed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name
    pub name: String,
    /// Image name
    pub image: String,
    /// Command to run; the configured default when empty
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Network namespace to join
    pub network: Option<String>,
    /// Volume namespaces to link into the working directory
    pub volumes: Vec<String>,
}

impl ContainerConfig {
    /// Create a new container configuration
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            cmd: Vec::new(),
            env: HashMap::new(),
            network: None,
            volumes: Vec::new(),
        }
    }

    /// Set command to run
    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Join a network
    pub fn network(mut self, name: &str) -> Self {
        self.network = Some(name.to_string());
        self
    }

    /// Attach a volume
    pub fn volume(mut self, name: &str) -> Self {
        self.volumes.push(name.to_string());
        self
    }
}

/// Point-in-time view of a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub status: ContainerStatus,
    /// Image, when a state record names it
    pub image: Option<String>,
    /// Supervised process, when a state record exists
    pub handle: Option<ProcessHandle>,
    pub working_dir: PathBuf,
    /// When the current process was started
    pub started_at: Option<DateTime<Utc>>,
}
