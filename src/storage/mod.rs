//! Storage management module
//!
//! Filesystem primitives shared by the image, state and namespace stores:
//! name validation, per-key advisory locks and write-temp-then-rename
//! publication.

pub mod fs;
pub mod lock;
pub mod namespace;
pub mod volume;

pub use lock::{KeyLock, KeyLocks};
pub use namespace::{Namespace, NamespaceRoot};
pub use volume::VolumeManager;

use crate::error::{RamaError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Longest accepted image/container/namespace name
pub const MAX_NAME_LEN: usize = 128;

/// Validate a user-supplied name so it is always a single, visible path
/// component. Names starting with `.` are reserved for store internals.
pub fn validate_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("name pattern is valid")
    });

    if name.len() > MAX_NAME_LEN || !re.is_match(name) {
        return Err(RamaError::InvalidName(name.to_string()));
    }
    Ok(())
}
