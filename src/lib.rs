//! Rama - a minimal container tool
//!
//! Rama keeps named image trees in a local store, moves them between hosts
//! through a small HTTP registry or over scp, and runs containers as
//! supervised processes in per-container working directories:
//!
//! - Image store and transfer archives
//! - Registry server and push/pull client
//! - Container lifecycle (run, stop, rm, ps) backed by a durable state store
//! - Directory-backed network and volume namespaces

pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod network;
pub mod registry;
pub mod runtime;
pub mod storage;

pub use config::Config;
pub use error::{RamaError, Result};
