//! Image store - manages local images
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<name>/            published image trees
//! <root>/.staging/          trees being assembled, never visible
//! <root>/.trash/            trees being deleted
//! <root>/.locks/<name>.lock per-image advisory locks
//! ```
//!
//! An image appears under its name only through a single `rename` of a fully
//! assembled staging tree, so readers see the whole image or nothing. A
//! replaced or removed tree is renamed into the trash before it is deleted;
//! a failed delete only leaves garbage in the trash.

use super::archive::{self, ImageArchive};
use crate::error::{RamaError, Result};
use crate::storage::{fs as store_fs, validate_name, KeyLock, KeyLocks};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGING_DIR: &str = ".staging";
const TRASH_DIR: &str = ".trash";
const LOCKS_DIR: &str = ".locks";

/// Summary of a stored image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    pub name: String,
    pub path: PathBuf,
    /// Number of regular files
    pub files: u64,
    /// Total size of regular files in bytes
    pub bytes: u64,
}

/// A tree being assembled for publication. Dropping it unpublished deletes
/// the tree.
#[derive(Debug)]
pub struct StagedImage {
    name: String,
    path: PathBuf,
    published: bool,
}

impl StagedImage {
    /// Directory to fill
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if !self.published && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(image = %self.name, error = %e, "failed to discard staging tree");
            }
        }
    }
}

/// Image store for managing local images
#[derive(Debug, Clone)]
pub struct ImageStore {
    /// Storage path
    storage_path: PathBuf,
    locks: KeyLocks,
    /// Deletes trashed trees
    purge: fn(&Path) -> io::Result<()>,
}

impl ImageStore {
    /// Create a new image store
    pub fn new(storage_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(storage_path.join(STAGING_DIR))?;
        fs::create_dir_all(storage_path.join(TRASH_DIR))?;
        let locks = KeyLocks::new(storage_path.join(LOCKS_DIR))?;

        Ok(Self {
            storage_path,
            locks,
            purge: |p: &Path| fs::remove_dir_all(p),
        })
    }

    /// Get storage path
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Directory for temporary files such as packed archives
    pub fn scratch_path(&self) -> PathBuf {
        self.storage_path.join(STAGING_DIR)
    }

    fn image_path(&self, name: &str) -> PathBuf {
        self.storage_path.join(name)
    }

    fn trash_path(&self) -> PathBuf {
        self.storage_path.join(TRASH_DIR)
    }

    /// Delete a tree already moved to the trash
    fn discard(&self, name: &str, trashed: &Path) {
        if let Err(e) = (self.purge)(trashed) {
            warn!(
                image = name,
                path = %trashed.display(),
                error = %e,
                "failed to delete trashed image tree"
            );
        }
    }

    /// True if `name` is published
    pub fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.image_path(name).is_dir())
    }

    /// Directory holding the image
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let path = self.image_path(name);
        if !path.is_dir() {
            return Err(RamaError::ImageNotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Describe a stored image
    pub fn get(&self, name: &str) -> Result<ImageContent> {
        let path = self.path_for(name)?;
        let (files, bytes) = store_fs::tree_stats(&path).map_err(|e| not_found_or(e, name))?;
        Ok(ImageContent {
            name: name.to_string(),
            path,
            files,
            bytes,
        })
    }

    /// Names of all published images, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(store_fs::list_dirs(&self.storage_path)?)
    }

    /// Hold a shared lock on `name` while reading it; writers wait
    pub fn read_lock(&self, name: &str) -> Result<KeyLock> {
        validate_name(name)?;
        self.locks.acquire_shared(name)
    }

    /// Pack the image into its transfer archive
    pub fn archive(&self, name: &str) -> Result<ImageArchive> {
        let _lock = self.read_lock(name)?;
        let path = self.path_for(name)?;
        let archive =
            ImageArchive::pack(&path, &self.scratch_path()).map_err(|e| not_found_or(e, name))?;
        debug!(image = name, digest = %archive.digest, size = archive.size, "packed image");
        Ok(archive)
    }

    /// Start assembling a new tree for `name`
    pub fn stage(&self, name: &str) -> Result<StagedImage> {
        validate_name(name)?;
        let path = self
            .scratch_path()
            .join(format!("{}-{}", name, uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&path)?;

        Ok(StagedImage {
            name: name.to_string(),
            path,
            published: false,
        })
    }

    /// Publish a staged tree under its name. Without `overwrite` an existing
    /// image is left untouched and `ImageExists` is returned.
    pub fn publish(&self, mut staged: StagedImage, overwrite: bool) -> Result<ImageContent> {
        let name = staged.name.clone();
        let _lock = self.locks.acquire(&name)?;
        let target = self.image_path(&name);

        let mut replaced = None;
        if target.exists() {
            if !overwrite {
                return Err(RamaError::ImageExists(name));
            }
            // Readers holding a shared lock are done by now
            replaced = Some(store_fs::move_to_trash(&target, &self.trash_path())?);
        }

        if let Err(e) = fs::rename(&staged.path, &target) {
            if let Some(previous) = &replaced {
                if let Err(restore) = fs::rename(previous, &target) {
                    warn!(image = %name, error = %restore, "failed to restore previous image");
                }
            }
            return Err(e.into());
        }
        staged.published = true;
        info!(image = %name, "image published");

        if let Some(previous) = replaced {
            self.discard(&name, &previous);
            debug!(image = %name, "replaced previous image");
        }

        let (files, bytes) = store_fs::tree_stats(&target)?;
        Ok(ImageContent {
            name,
            path: target,
            files,
            bytes,
        })
    }

    /// Store a copy of the directory `src` as `name`
    pub fn put_dir(&self, name: &str, src: &Path, overwrite: bool) -> Result<ImageContent> {
        if !overwrite && self.exists(name)? {
            return Err(RamaError::ImageExists(name.to_string()));
        }
        if !src.is_dir() {
            return Err(RamaError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", src.display()),
            )));
        }

        let staged = self.stage(name)?;
        store_fs::copy_tree(src, staged.path())?;
        self.publish(staged, overwrite)
    }

    /// Store the tar.gz archive read from `reader` as `name`. A corrupt or
    /// truncated archive leaves the store unchanged.
    pub fn put_archive<R: Read>(&self, name: &str, reader: R, overwrite: bool) -> Result<ImageContent> {
        if !overwrite && self.exists(name)? {
            return Err(RamaError::ImageExists(name.to_string()));
        }

        let staged = self.stage(name)?;
        archive::unpack(reader, staged.path()).map_err(|e| {
            RamaError::Transfer(format!("Invalid archive for image {}: {}", name, e))
        })?;
        self.publish(staged, overwrite)
    }

    /// Delete an image
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _lock = self.locks.acquire(name)?;
        let trashed = store_fs::move_to_trash(&self.image_path(name), &self.trash_path())
            .map_err(|e| not_found_or(e, name))?;
        info!(image = name, "image removed");
        self.discard(name, &trashed);
        Ok(())
    }
}

fn not_found_or(err: io::Error, name: &str) -> RamaError {
    if err.kind() == io::ErrorKind::NotFound {
        RamaError::ImageNotFound(name.to_string())
    } else {
        RamaError::Io(err)
    }
}
