//! Atomic publication and directory-tree helpers

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Unique, hidden name for a temporary sibling entry
pub fn tmp_name(prefix: &str) -> String {
    format!(".{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Write `data` to a temporary file next to `target`, then publish it at
/// `target` only if nothing is there yet. Fails with `AlreadyExists` if the
/// target exists; readers never observe a partially written file.
pub fn publish_new(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = parent_of(target)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

/// Write `data` to a temporary file next to `target`, then rename it over
/// `target`
pub fn publish_replace(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = parent_of(target)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically take `target` out of view by renaming it to a hidden
/// tombstone, then delete the tombstone. Fails with `NotFound` if `target`
/// is absent, so of two concurrent removers exactly one succeeds.
pub fn remove_file_atomic(target: &Path) -> io::Result<()> {
    let dir = parent_of(target)?;
    let tombstone = dir.join(tmp_name("removed"));
    fs::rename(target, &tombstone)?;
    fs::remove_file(&tombstone)
}

/// Move a directory tree out of view into `trash_dir` and return its new
/// path. Fails with `NotFound` if `target` is absent.
pub fn move_to_trash(target: &Path, trash_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(trash_dir)?;
    let trashed = trash_dir.join(tmp_name("trash"));
    fs::rename(target, &trashed)?;
    Ok(trashed)
}

/// Move a directory tree out of view into `trash_dir`, then delete it
pub fn remove_dir_atomic(target: &Path, trash_dir: &Path) -> io::Result<()> {
    let trashed = move_to_trash(target, trash_dir)?;
    fs::remove_dir_all(&trashed)
}

/// Recursively copy `src` into `dst` (which must already exist). Symlinks
/// are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Number of regular files and their total size under `root`
pub fn tree_stats(root: &Path) -> io::Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry.metadata().map_err(io::Error::other)?.len();
        }
    }
    Ok((files, bytes))
}

/// Visible child directory names of `root`, sorted
pub fn list_dirs(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    if !root.exists() {
        return Ok(names);
    }

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

fn parent_of(path: &Path) -> io::Result<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_publish_new_refuses_existing() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("record.json");

        publish_new(&target, b"first").unwrap();
        let err = publish_new(&target, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&target).unwrap(), b"first");
    }

    #[test]
    fn test_publish_replace_overwrites() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("counter");

        publish_replace(&target, b"1").unwrap();
        publish_replace(&target, b"2").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"2");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_file_atomic_once() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("record.json");
        fs::write(&target, b"x").unwrap();

        remove_file_atomic(&target).unwrap();
        let err = remove_file_atomic(&target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_move_to_trash_hides_tree() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("web");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("index.html"), b"hi").unwrap();

        let trashed = move_to_trash(&target, &temp.path().join(".trash")).unwrap();
        assert!(!target.exists());
        assert_eq!(fs::read(trashed.join("index.html")).unwrap(), b"hi");
        assert_eq!(
            move_to_trash(&target, &temp.path().join(".trash")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_copy_tree_and_stats() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested/deeper")).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::write(src.join("nested/deeper/b.bin"), [0u8, 1, 2]).unwrap();
        std::os::unix::fs::symlink("a.txt", src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        fs::create_dir(&dst).unwrap();
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dst.join("nested/deeper/b.bin")).unwrap(), [0u8, 1, 2]);
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), PathBuf::from("a.txt"));
        assert_eq!(tree_stats(&dst).unwrap(), (2, 8));
    }

    #[test]
    fn test_list_dirs_hides_internal_entries() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("web")).unwrap();
        fs::create_dir(temp.path().join("api")).unwrap();
        fs::create_dir(temp.path().join(".staging")).unwrap();
        fs::write(temp.path().join("file"), b"").unwrap();

        assert_eq!(list_dirs(temp.path()).unwrap(), vec!["api", "web"]);
        assert!(list_dirs(&temp.path().join("missing")).unwrap().is_empty());
    }
}
