// Filesystem abstraction for the media tree
//
// LocalFs: the real data directory (tokio::fs)
// MemoryFs: in-process map, for tests that should not touch disk

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;

/// Media files never change in place for readers: every write replaces the
/// whole file.
#[async_trait]
pub trait MediaFs: Send + Sync {
    /// Write the full contents, replacing any existing file atomically.
    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn read(&self, path: &Path) -> Result<Bytes>;

    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Recursively delete a directory.
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// File names directly inside `path`. `NotFound` when the directory is absent.
    async fn list_files(&self, path: &Path) -> Result<Vec<String>>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

/// Temp file names are unique per process so concurrent writers of the same
/// target never share one.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaFs for LocalFs {
    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = temp_path_for(path);
        let size = data.len();
        if let Err(e) = fs::write(&temp, &data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        tracing::trace!(path = %path.display(), size, "Wrote media file");
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(path).await?))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await
    }

    async fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await
    }
}

#[derive(Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, Bytes>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory media tree. Parent directories are implied by the files in them.
#[derive(Clone, Default)]
pub struct MemoryFs {
    inner: Arc<RwLock<MemoryTree>>,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All file paths currently stored, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.read().files.keys().cloned().collect()
    }
}

fn not_found(path: &Path) -> Error {
    Error::new(ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[async_trait]
impl MediaFs for MemoryFs {
    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<()> {
        let mut tree = self.inner.write();
        if let Some(parent) = path.parent() {
            tree.dirs.insert(parent.to_path_buf());
        }
        tree.files.insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        self.inner
            .read()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner
            .write()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut tree = self.inner.write();
        let had_files = tree.files.keys().any(|p| p.starts_with(path));
        let had_dir = tree.dirs.iter().any(|p| p.starts_with(path));
        if !had_files && !had_dir {
            return Err(not_found(path));
        }
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.write().dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        let tree = self.inner.read();
        let names: Vec<String> = tree
            .files
            .keys()
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let dir_known = tree.dirs.iter().any(|p| p.starts_with(path));
        if names.is_empty() && !dir_known {
            return Err(not_found(path));
        }
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let tree = self.inner.read();
        Ok(tree.files.contains_key(path) || tree.dirs.iter().any(|p| p.starts_with(path)))
    }
}
