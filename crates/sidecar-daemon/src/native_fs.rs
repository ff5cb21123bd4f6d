//! Native vault store implementation using tokio::fs.

use async_trait::async_trait;
use sidecar_core::store::{is_hidden, FileHandle, Result, Store, StoreError, TRASH_DIR};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Store backed by a vault directory on disk.
///
/// The disk is both index and medium here, so `lookup` and `exists` agree
/// apart from `lookup` only reporting regular files.
pub struct NativeStore {
    base_path: PathBuf,
}

impl NativeStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.base_path.join(path))
    }

    async fn create_parent(full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(&parent.to_string_lossy(), e))?;
        }
        Ok(())
    }

    async fn trash_path(&self, path: &str) -> Result<PathBuf> {
        let base = format!("{}/{}", TRASH_DIR, path);
        let mut candidate = base.clone();
        let mut n = 1;
        while self.exists(&candidate).await? {
            candidate = format!("{} {}", base, n);
            n += 1;
        }
        self.full_path(&candidate)
    }
}

/// Reject paths that could escape the vault root.
fn validate_path(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\0')
        || path.split('/').any(|segment| segment.is_empty() || segment == "..")
        || escapes_on_windows(path);
    if invalid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Backslashes and drive prefixes are separators only on Windows.
#[cfg(windows)]
fn escapes_on_windows(path: &str) -> bool {
    path.contains('\\') || (path.len() >= 2 && path.chars().nth(1) == Some(':'))
}

#[cfg(not(windows))]
fn escapes_on_windows(_path: &str) -> bool {
    false
}

fn io_error(path: &str, e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_string()),
        _ => StoreError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl Store for NativeStore {
    async fn list(&self) -> Result<Vec<FileHandle>> {
        let mut files = Vec::new();
        let mut dirs_to_visit = vec![String::new()];

        while let Some(dir) = dirs_to_visit.pop() {
            let full_dir = self.base_path.join(&dir);
            let mut entries = fs::read_dir(&full_dir)
                .await
                .map_err(|e| io_error(&dir, e))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    warn!("Skipping non-UTF-8 name in {:?}", full_dir);
                    continue;
                };
                let path = if dir.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir, name)
                };

                // Skip .trash, .obsidian and other hidden entries
                if is_hidden(&path) {
                    continue;
                }

                let file_type = entry.file_type().await.map_err(|e| io_error(&path, e))?;
                if file_type.is_dir() {
                    dirs_to_visit.push(path);
                } else if file_type.is_file() {
                    files.push(FileHandle::new(path));
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn lookup(&self, path: &str) -> Result<Option<FileHandle>> {
        let full_path = self.full_path(path)?;
        match fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(FileHandle::new(path))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn read(&self, file: &FileHandle) -> Result<String> {
        let full_path = self.full_path(&file.path)?;
        fs::read_to_string(&full_path)
            .await
            .map_err(|e| io_error(&file.path, e))
    }

    async fn create(&self, path: &str, content: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        Self::create_parent(&full_path).await?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error(path, e))?;
        file.flush().await.map_err(|e| io_error(path, e))
    }

    async fn modify(&self, file: &FileHandle, content: &str) -> Result<()> {
        if self.lookup(&file.path).await?.is_none() {
            return Err(StoreError::NotFound(file.path.clone()));
        }
        let full_path = self.full_path(&file.path)?;
        fs::write(&full_path, content)
            .await
            .map_err(|e| io_error(&file.path, e))
    }

    async fn rename(&self, file: &FileHandle, new_path: &str) -> Result<()> {
        let from = self.full_path(&file.path)?;
        let to = self.full_path(new_path)?;
        if from == to {
            return Ok(());
        }
        // fs::rename silently replaces an existing file on Unix.
        if self.exists(new_path).await? {
            return Err(StoreError::AlreadyExists(new_path.to_string()));
        }

        Self::create_parent(&to).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(&file.path, e))
    }

    async fn delete(&self, file: &FileHandle) -> Result<()> {
        let full_path = self.full_path(&file.path)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| io_error(&file.path, e))
    }

    async fn trash(&self, file: &FileHandle) -> Result<()> {
        let from = self.full_path(&file.path)?;
        if !self.exists(&file.path).await? {
            return Err(StoreError::NotFound(file.path.clone()));
        }

        let to = self.trash_path(&file.path).await?;
        Self::create_parent(&to).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(&file.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, NativeStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = NativeStore::new(temp_dir.path().to_path_buf());
        (temp_dir, store)
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("a/b.png").is_ok());
        assert!(validate_path("a(1) [x].png").is_ok());
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "a//b", "a\0b"] {
            assert!(validate_path(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_validate_path_allows_unix_names() {
        assert!(validate_path("1:2.png").is_ok());
        assert!(validate_path("C:x.png").is_ok());
        assert!(validate_path("a\\b.png").is_ok());
    }

    #[cfg(windows)]
    #[test]
    fn test_validate_path_rejects_windows_escapes() {
        assert!(validate_path("a\\b").is_err());
        assert!(validate_path("C:x").is_err());
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_reconcile_names_legal_on_unix() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("1:2.png"), b"png").unwrap();

        let report = sidecar_core::reconcile(&store, 2).await.unwrap();

        assert_eq!(report.created, vec!["1:2.png".to_string()]);
        assert!(dir.path().join("1:2.png.md.md").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (dir, store) = store();
        let odd = OsStr::from_bytes(b"bad\xff.png");
        if std::fs::write(dir.path().join(odd), b"png").is_err() {
            // Some filesystems refuse non-UTF-8 names outright
            return;
        }
        std::fs::write(dir.path().join("good.png"), b"png").unwrap();

        let paths: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();

        assert_eq!(paths, vec!["good.png".to_string()]);
    }

    #[tokio::test]
    async fn test_create_read_modify() {
        let (_dir, store) = store();

        store.create("img/a.png.md.md", "one").await.unwrap();
        let handle = store.lookup("img/a.png.md.md").await.unwrap().unwrap();
        assert_eq!(store.read(&handle).await.unwrap(), "one");

        store.modify(&handle, "two").await.unwrap();
        assert_eq!(store.read(&handle).await.unwrap(), "two");

        let err = store.create("img/a.png.md.md", "three").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_list_skips_hidden_and_directories() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("img/empty")).unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        std::fs::write(dir.path().join("img/a.png"), b"png").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"pdf").unwrap();
        std::fs::write(dir.path().join(".obsidian/app.json"), b"{}").unwrap();

        let paths: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();

        assert_eq!(paths, vec!["b.pdf".to_string(), "img/a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::write(dir.path().join("b.png"), b"b").unwrap();

        let err = store
            .rename(&FileHandle::new("a.png"), "b.png")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(std::fs::read(dir.path().join("b.png")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_rename_into_new_folder() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();

        store
            .rename(&FileHandle::new("a.png"), "new/dir/a.png")
            .await
            .unwrap();

        assert!(dir.path().join("new/dir/a.png").exists());
        assert!(!dir.path().join("a.png").exists());
    }

    #[tokio::test]
    async fn test_trash_and_delete() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("a.png.md.md"), b"first").unwrap();
        store.trash(&FileHandle::new("a.png.md.md")).await.unwrap();
        std::fs::write(dir.path().join("a.png.md.md"), b"second").unwrap();
        store.trash(&FileHandle::new("a.png.md.md")).await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join(".trash/a.png.md.md")).unwrap(),
            b"first"
        );
        assert_eq!(
            std::fs::read(dir.path().join(".trash/a.png.md.md 1")).unwrap(),
            b"second"
        );

        std::fs::write(dir.path().join("b.png"), b"b").unwrap();
        store.delete(&FileHandle::new("b.png")).await.unwrap();
        assert!(!store.exists("b.png").await.unwrap());

        let err = store.delete(&FileHandle::new("b.png")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
