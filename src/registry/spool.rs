//! Received archives, written to disk as they arrive

use crate::image::format_digest;
use sha2::{Digest, Sha256};
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

/// An archive being received into an unnamed temporary file, hashed chunk by
/// chunk
pub struct ArchiveSpool {
    writer: BufWriter<File>,
    hasher: Sha256,
    size: u64,
}

impl ArchiveSpool {
    /// Start a spool in `dir`; the file has no name and vanishes when closed
    pub fn create(dir: &Path) -> io::Result<Self> {
        let file = File::from_std(tempfile::tempfile_in(dir)?);
        Ok(Self {
            writer: BufWriter::new(file),
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Bytes received so far
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush and rewind. Returns the file and the digest of its content.
    pub async fn finish(mut self) -> io::Result<(std::fs::File, String)> {
        self.writer.flush().await?;
        let mut file = self.writer.into_inner();
        file.seek(SeekFrom::Start(0)).await?;
        Ok((file.into_std().await, format_digest(self.hasher)))
    }
}
