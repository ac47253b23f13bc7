//! Rama configuration
//!
//! A single [`Config`] is built once per process (defaults, optionally
//! overlaid by a TOML file) and handed to every component.

use crate::error::{RamaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "RAMA_CONFIG";

/// Default registry port
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// On-disk locations of every store
    pub paths: PathsConfig,
    /// Container lifecycle settings
    pub lifecycle: LifecycleConfig,
    /// Registry server settings
    pub registry: RegistryConfig,
    /// Push/pull settings
    pub transfer: TransferConfig,
}

/// Store locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Image store root (one subdirectory per image)
    pub images: PathBuf,
    /// Container storage root (one working directory per container)
    pub containers: PathBuf,
    /// State store directory (one record per running container)
    pub state: PathBuf,
    /// Network namespace root
    pub networks: PathBuf,
    /// Volume namespace root
    pub volumes: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(&default_data_root())
    }
}

impl PathsConfig {
    /// Lay out every store under a single data root
    pub fn under(root: &Path) -> Self {
        Self {
            images: root.join("images"),
            containers: root.join("containers"),
            state: root.join("state"),
            networks: root.join("networks"),
            volumes: root.join("volumes"),
        }
    }
}

/// Container lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Command started in a container's working directory when `run` is not
    /// given one
    pub command: Vec<String>,
    /// Seconds to wait for a graceful exit after SIGTERM
    pub stop_timeout_secs: u64,
    /// Seconds to wait for the process to disappear after SIGKILL
    pub kill_timeout_secs: u64,
    /// Liveness polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Copy the image tree into the working directory on `run`
    pub seed_workdir: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "http.server".to_string(),
            ],
            stop_timeout_secs: 10,
            kill_timeout_secs: 5,
            poll_interval_ms: 50,
            seed_workdir: true,
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Registry server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address the registry listens on
    pub bind: String,
    /// Seconds in-flight transfers may continue after shutdown begins
    pub shutdown_grace_secs: u64,
    /// Accept `PUT` uploads; the registry is read-only otherwise
    pub accept_push: bool,
    /// Largest accepted upload in MiB; 0 disables the limit
    pub max_upload_mib: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_REGISTRY_PORT),
            shutdown_grace_secs: 10,
            accept_push: false,
            max_upload_mib: 1024,
        }
    }
}

impl RegistryConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn max_upload_bytes(&self) -> Option<u64> {
        match self.max_upload_mib {
            0 => None,
            mib => Some(mib.saturating_mul(1024 * 1024)),
        }
    }
}

/// Push/pull settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Replace an existing image of the same name instead of failing
    pub overwrite: bool,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Remote-copy program for `host:/path` remotes
    pub scp_program: String,
    /// Remote shell program used to publish pushed images
    pub ssh_program: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            request_timeout_secs: 300,
            scp_program: "scp".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }
}

impl TransferConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Configuration with every store under `root`
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig::under(root),
            ..Default::default()
        }
    }

    /// Load a TOML configuration file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RamaError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse a TOML configuration document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| RamaError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for a CLI invocation: an explicit file, then
    /// `RAMA_CONFIG`, then defaults. `root` rebases every store path.
    pub fn load(file: Option<&Path>, root: Option<&Path>) -> Result<Self> {
        let env_file = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match file.map(Path::to_path_buf).or(env_file) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(root) = root {
            config.paths = PathsConfig::under(root);
        }

        Ok(config)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.command.is_empty() {
            return Err(RamaError::InvalidConfig(
                "lifecycle.command must not be empty".to_string(),
            ));
        }
        if self.registry.bind.trim().is_empty() {
            return Err(RamaError::InvalidConfig(
                "registry.bind must not be empty".to_string(),
            ));
        }
        if self.transfer.scp_program.is_empty() || self.transfer.ssh_program.is_empty() {
            return Err(RamaError::InvalidConfig(
                "transfer.scp_program and transfer.ssh_program must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default data root: the platform data directory, falling back to /var/lib
fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("rama")
}
