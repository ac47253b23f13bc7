//! Image archive codec
//!
//! An image travels as a gzip-compressed tar of its directory tree. Packing
//! is deterministic (sorted entries, zeroed timestamps and owners), so the
//! same tree always yields the same bytes and digest. Archives are spooled to
//! unnamed temporary files rather than held in memory.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder as TarBuilder, EntryType, Header};
use walkdir::WalkDir;

/// Prefix of every image digest
pub const DIGEST_PREFIX: &str = "sha256:";

/// Packed image: an unnamed temporary file positioned at its start
#[derive(Debug)]
pub struct ImageArchive {
    pub file: File,
    pub digest: String,
    pub size: u64,
}

impl ImageArchive {
    /// Pack the tree under `root` into a temporary file created in `scratch`
    pub fn pack(root: &Path, scratch: &Path) -> io::Result<Self> {
        let spool = BufWriter::new(tempfile::tempfile_in(scratch)?);
        let (spool, digest, size) = pack_tree(root, DigestWriter::new(spool))?.finish();
        let mut file = spool.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self { file, digest, size })
    }

    /// Read the whole archive into memory
    #[cfg(test)]
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Render a finished hash as `sha256:<hex>`
pub fn format_digest(hasher: Sha256) -> String {
    format!("{}{:x}", DIGEST_PREFIX, hasher.finalize())
}

/// Writer that hashes and counts everything passing through it
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// The inner writer, the digest and the number of bytes written
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, format_digest(self.hasher), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Pack `root` into a tar.gz written to `writer`, returning the writer
pub fn pack_tree<W: Write>(root: &Path, writer: W) -> io::Result<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        entries.push(entry.path().to_path_buf());
    }
    entries.sort();

    for path in entries {
        let rel = path
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        let md = fs::symlink_metadata(&path)?;
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(md.permissions().mode());

        if md.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if md.file_type().is_symlink() {
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(fs::read_link(&path)?)?;
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if md.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_size(md.len());
            builder.append_data(&mut header, &rel, File::open(&path)?)?;
        }
        // Sockets, fifos and devices are not part of an image
    }

    builder.into_inner()?.finish()
}

/// Unpack a tar.gz stream into `dest`, which must exist. Entries escaping
/// `dest` are rejected by the tar reader. Fails on truncated or corrupt
/// input; the caller discards `dest` in that case.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(false);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            let path = entry.path()?.display().to_string();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("archive entry escapes image root: {}", path),
            ));
        }
    }
    Ok(())
}
