use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Durable per-entry content files, one `<id>.txt` per filter under `dir`.
#[derive(Debug)]
pub struct ContentStore {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl ContentStore {
    /// Opens the store, creating `dir` if it does not exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.txt", id))
    }

    /// Replaces `path` with `content`; readers see either the old file or the
    /// complete new one.
    pub async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        self.stage(path, content).await?.persist()
    }

    /// Writes `content` next to `path` without touching `path` itself.
    pub async fn stage(&self, path: &Path, content: &[u8]) -> io::Result<StagedContent> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", seq));

        // From here on the guard owns the temp file and removes it on failure.
        let staged = StagedContent {
            tmp: PathBuf::from(tmp),
            target: path.to_path_buf(),
            persisted: false,
        };

        let mut file = fs::File::create(&staged.tmp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        Ok(staged)
    }

    /// Removing a path that does not exist is not an error.
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Content written to a temporary file, waiting to be renamed into place.
/// Dropping it unpersisted deletes the temporary file.
#[derive(Debug)]
pub struct StagedContent {
    tmp: PathBuf,
    target: PathBuf,
    persisted: bool,
}

impl StagedContent {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically renames the staged file over its target.
    pub fn persist(mut self) -> io::Result<()> {
        std::fs::rename(&self.tmp, &self.target)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for StagedContent {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", self.tmp.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("filters");
        let store = ContentStore::open(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.path_for(7), dir.join("7.txt"));
    }

    #[tokio::test]
    async fn test_write_replaces_content_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let path = store.path_for(1);

        store.write(&path, b"first\n").await.unwrap();
        store.write(&path, b"second\n").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second\n");
        assert_eq!(file_names(tmp.path()), vec!["1.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_target_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let path = store.path_for(3);
        store.write(&path, b"old").await.unwrap();

        let staged = store.stage(&path, b"new").await.unwrap();
        assert_eq!(file_names(tmp.path()).len(), 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        drop(staged);

        assert_eq!(file_names(tmp.path()), vec!["3.txt".to_string()]);
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let path = store.path_for(9);
        store.write(&path, b"x").await.unwrap();

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path().join("gone")).await.unwrap();
        std::fs::remove_dir(store.dir()).unwrap();

        let err = store.write(&store.path_for(1), b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
