//! Where a client remembers the thread id it learned, so the conversation
//! resumes after a restart.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ThreadIdStore: Send + Sync {
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, thread_id: &str) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

/// Keeps the id for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryThreadIdStore {
    thread_id: Mutex<Option<String>>,
}

impl MemoryThreadIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Mutex::new(Some(thread_id.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.thread_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ThreadIdStore for MemoryThreadIdStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.slot().clone())
    }

    fn save(&self, thread_id: &str) -> io::Result<()> {
        *self.slot() = Some(thread_id.to_string());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// Persists the id as a one-line text file.
#[derive(Debug, Clone)]
pub struct FileThreadIdStore {
    path: PathBuf,
}

impl FileThreadIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ThreadIdStore for FileThreadIdStore {
    fn load(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, thread_id: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{thread_id}\n"))
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_survives_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coach").join("thread");

        FileThreadIdStore::new(&path).save("T1").unwrap();
        let reopened = FileThreadIdStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Some("T1".to_string()));
    }

    #[test]
    fn test_file_store_clear_forgets_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadIdStore::new(dir.path().join("thread"));

        assert_eq!(store.load().unwrap(), None);
        store.save("T1").unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryThreadIdStore::with_thread("T9");
        assert_eq!(store.load().unwrap().as_deref(), Some("T9"));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
