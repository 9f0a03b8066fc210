use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Error unless `path` names an existing regular file.
pub(crate) fn require_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    if !path.is_file() {
        bail!("Path exists but is not a file: {}", path.display());
    }
    Ok(())
}

/// Lowercased file extension, if any.
pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase)
}

/// Hex-encoded SHA-256 digest.
pub(crate) fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write-then-rename wrapper so a half-written output never replaces a good one.
pub(crate) struct PendingWrite {
    target: PathBuf,
    tmp: Option<NamedTempFile>,
}

impl PendingWrite {
    /// Stage a write to `target`, creating parent directories as needed.
    pub(crate) fn open(target: &Path) -> Result<Self> {
        let parent = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
        let tmp = NamedTempFile::new_in(parent).context("create temp file")?;
        Ok(Self { target: target.to_path_buf(), tmp: Some(tmp) })
    }

    fn file(&mut self) -> io::Result<&mut NamedTempFile> {
        self.tmp.as_mut()
            .ok_or_else(|| io::Error::other("pending write already finalized"))
    }

    /// Flush, then atomically move the temporary file into place.
    pub(crate) fn finalize(mut self) -> Result<()> {
        let tmp = self.tmp.take().context("pending write already finalized")?;
        tmp.as_file().sync_all().ok();
        tmp.persist(&self.target)
            .with_context(|| format!("rename to {}", self.target.display()))?;
        if let Some(dir) = self.target.parent() {
            let _ = File::open(dir).and_then(|f| f.sync_all());
        }
        Ok(())
    }
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Seek for PendingWrite {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file()?.as_file_mut().seek(pos)
    }
}

/// Write `bytes` to `path` through a [`PendingWrite`].
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut pending = PendingWrite::open(path)?;
    pending.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    pending.finalize()
}
