//! Container management module
//!
//! A container is a named working directory plus a supervised process
//! started from an image. Running containers are tracked in the state
//! store; lifecycle operations are serialized per name.

pub mod config;
pub mod lifecycle;
pub mod state;

pub use config::{ContainerConfig, ContainerInfo, ContainerStatus};
pub use lifecycle::{ContainerManager, LOG_FILE, VOLUMES_DIR};
pub use state::{StateRecord, StateStore};
