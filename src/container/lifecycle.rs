//! Container lifecycle management
//!
//! Every operation on a container name runs under that name's exclusive key
//! lock, so `run`, `stop` and `rm` on one name are linearizable across
//! threads and processes while different names proceed in parallel.

use super::config::{ContainerConfig, ContainerInfo, ContainerStatus};
use super::state::{StateRecord, StateStore};
use crate::config::{Config, LifecycleConfig};
use crate::error::{RamaError, Result};
use crate::image::ImageStore;
use crate::network::NetworkManager;
use crate::runtime::{self, Liveness, ProcessConfig, StopPolicy, Termination};
use crate::storage::{fs as store_fs, validate_name, KeyLocks, Namespace, VolumeManager};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File inside the working directory receiving the process output
pub const LOG_FILE: &str = ".rama.log";
/// Directory inside the working directory holding volume links
pub const VOLUMES_DIR: &str = "volumes";

const LOCKS_DIR: &str = ".locks";
const TRASH_DIR: &str = ".trash";

/// Container manager for handling container lifecycle
pub struct ContainerManager {
    /// Base path for container working directories
    base_path: PathBuf,
    state: StateStore,
    images: Arc<ImageStore>,
    networks: NetworkManager,
    volumes: VolumeManager,
    locks: KeyLocks,
    config: LifecycleConfig,
}

impl ContainerManager {
    /// Create a new container manager
    pub fn new(config: &Config, images: Arc<ImageStore>) -> Result<Self> {
        let base_path = config.paths.containers.clone();
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            locks: KeyLocks::new(base_path.join(LOCKS_DIR))?,
            state: StateStore::open(config.paths.state.clone())?,
            networks: NetworkManager::new(config.paths.networks.clone())?,
            volumes: VolumeManager::new(config.paths.volumes.clone())?,
            images,
            base_path,
            config: config.lifecycle.clone(),
        })
    }

    /// Working directory of a container
    pub fn working_dir(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            grace: self.config.stop_timeout(),
            kill_timeout: self.config.kill_timeout(),
            poll_interval: self.config.poll_interval(),
        }
    }

    /// Start a container from an image. Returns once the process exists.
    pub fn run(&self, config: ContainerConfig) -> Result<StateRecord> {
        let name = config.name.as_str();
        validate_name(name)?;
        validate_name(&config.image)?;
        let _lock = self.locks.acquire(name)?;

        let image_path = self.images.path_for(&config.image)?;
        if self.state.contains(name)? {
            return Err(RamaError::ContainerExists(name.to_string()));
        }
        let network = match &config.network {
            Some(network) => Some(self.networks.get(network)?),
            None => None,
        };
        let volumes = config
            .volumes
            .iter()
            .map(|volume| self.volumes.get(volume))
            .collect::<Result<Vec<_>>>()?;

        let workdir = self.working_dir(name);
        match fs::create_dir(&workdir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RamaError::ContainerExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(container = name, workdir = %workdir.display(), "working directory created");

        let mut process = ProcessConfig::new(self.command_for(&config), workdir.clone())
            .env("RAMA_CONTAINER", name)
            .env("RAMA_IMAGE", &config.image)
            .log_file(workdir.join(LOG_FILE));
        for (key, value) in &config.env {
            process = process.env(key, value);
        }
        if let Some(network) = &network {
            process = process
                .env("RAMA_NETWORK", &network.name)
                .env("RAMA_NETWORK_DIR", &network.path.to_string_lossy());
        }

        let prepared = self.prepare_workdir(&config.image, &image_path, &workdir, &volumes);
        let handle = match prepared.and_then(|()| runtime::spawn(&process)) {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_workdir(name, &workdir);
                return Err(e);
            }
        };

        match self.state.insert(name, &config.image, handle) {
            Ok(record) => {
                info!(container = name, image = %config.image, %handle, "container started");
                Ok(record)
            }
            Err(e) => {
                warn!(container = name, error = %e, "failed to record container, rolling back");
                if let Err(kill_err) = handle.terminate(self.stop_policy()) {
                    warn!(container = name, error = %kill_err, "failed to stop orphaned process");
                }
                self.discard_workdir(name, &workdir);
                Err(e)
            }
        }
    }

    fn command_for(&self, config: &ContainerConfig) -> Vec<String> {
        if config.cmd.is_empty() {
            self.config.command.clone()
        } else {
            config.cmd.clone()
        }
    }

    fn prepare_workdir(
        &self,
        image: &str,
        image_path: &Path,
        workdir: &Path,
        volumes: &[Namespace],
    ) -> Result<()> {
        if self.config.seed_workdir {
            // Shared image lock: an overwrite cannot swap the tree mid-copy
            let _image_lock = self.images.read_lock(image)?;
            store_fs::copy_tree(image_path, workdir)?;
        }

        if !volumes.is_empty() {
            let links = workdir.join(VOLUMES_DIR);
            fs::create_dir_all(&links)?;
            for volume in volumes {
                std::os::unix::fs::symlink(&volume.path, links.join(&volume.name))?;
            }
        }
        Ok(())
    }

    fn discard_workdir(&self, name: &str, workdir: &Path) {
        if let Err(e) = fs::remove_dir_all(workdir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(container = name, error = %e, "failed to remove working directory");
            }
        }
    }

    /// Stop a running container and clear its record
    pub fn stop(&self, name: &str) -> Result<Termination> {
        validate_name(name)?;
        let _lock = self.locks.acquire(name)?;
        self.stop_locked(name)
    }

    fn stop_locked(&self, name: &str) -> Result<Termination> {
        let record = self.state.lookup(name)?;
        let outcome = record.handle.terminate(self.stop_policy())?;

        self.state.remove(name)?;
        match outcome {
            Termination::Reused => {
                warn!(container = name, pid = record.handle.pid, "recorded pid was reused; record cleared");
                Err(RamaError::ProcessReused {
                    name: name.to_string(),
                    pid: record.handle.pid,
                })
            }
            outcome => {
                info!(container = name, ?outcome, "container stopped");
                Ok(outcome)
            }
        }
    }

    /// Stop a container if it is running, then delete its working directory
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _lock = self.locks.acquire(name)?;

        let stopped = match self.stop_locked(name) {
            Ok(_) => true,
            Err(RamaError::ContainerNotFound(_)) => false,
            Err(e @ RamaError::ProcessReused { .. }) => {
                warn!(container = name, error = %e, "treating container as exited");
                true
            }
            Err(e) => return Err(e),
        };

        let workdir = self.working_dir(name);
        match store_fs::remove_dir_atomic(&workdir, &self.base_path.join(TRASH_DIR)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && stopped => {
                debug!(container = name, "working directory was already gone");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RamaError::ContainerNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(container = name, "container removed");
        Ok(())
    }

    /// Running containers in start order
    pub fn list(&self) -> Result<Vec<StateRecord>> {
        self.state.list_all()
    }

    /// Describe one container
    pub fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        validate_name(name)?;
        let record = match self.state.lookup(name) {
            Ok(record) => Some(record),
            Err(RamaError::ContainerNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let working_dir = self.working_dir(name);
        if record.is_none() && !working_dir.is_dir() {
            return Err(RamaError::ContainerNotFound(name.to_string()));
        }
        Ok(describe(name, record, working_dir))
    }

    /// Every known container: those with a record plus those whose working
    /// directory remains after their process stopped
    pub fn list_all(&self) -> Result<Vec<ContainerInfo>> {
        let mut records: BTreeMap<String, StateRecord> = self
            .state
            .list_all()?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let mut containers = Vec::new();
        for name in store_fs::list_dirs(&self.base_path)? {
            let record = records.remove(&name);
            let working_dir = self.working_dir(&name);
            containers.push(describe(&name, record, working_dir));
        }
        // Records whose working directory has vanished
        for (name, record) in records {
            let working_dir = self.working_dir(&name);
            containers.push(describe(&name, Some(record), working_dir));
        }

        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }
}

fn describe(name: &str, record: Option<StateRecord>, working_dir: PathBuf) -> ContainerInfo {
    let status = match &record {
        Some(record) if record.handle.liveness() == Liveness::Alive => ContainerStatus::Running,
        _ => ContainerStatus::Stopped,
    };

    ContainerInfo {
        name: name.to_string(),
        status,
        image: record.as_ref().map(|r| r.image.clone()),
        handle: record.as_ref().map(|r| r.handle),
        working_dir,
        started_at: record.as_ref().map(|r| r.inserted_at),
    }
}
