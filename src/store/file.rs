/// Directory-backed record store
///
/// One pretty-printed JSON document per record, `<dir>/<id>.json`. Every write
/// goes through temp file + fsync + rename + directory fsync so a crash never
/// leaves a half-written record behind.
use crate::config::types::{ExecutionRecord, Result, SandboxError};
use crate::store::{check_update, ExecutionStore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes read-check-write in `update` within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            SandboxError::Store(format!("failed to create store {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SandboxError::Store(format!("invalid record id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn read(&self, path: &Path) -> Result<Option<ExecutionRecord>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SandboxError::Store(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SandboxError::Store(format!("corrupt record {}: {}", path.display(), e)))
    }

    fn write(&self, path: &Path, record: &ExecutionRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| SandboxError::Store(format!("failed to encode {}: {}", record.id, e)))?;
        atomic_write(path, &json).map_err(|e| {
            SandboxError::Store(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

impl ExecutionStore for FileStore {
    fn create(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let _guard = self.write_lock.lock().map_err(|_| lock_poisoned())?;
        if path.exists() {
            return Err(SandboxError::Store(format!(
                "record {} already exists",
                record.id
            )));
        }
        self.write(&path, record)
    }

    fn update(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let _guard = self.write_lock.lock().map_err(|_| lock_poisoned())?;
        let current = self
            .read(&path)?
            .ok_or_else(|| SandboxError::Store(format!("unknown record {}", record.id)))?;
        check_update(&current, record)?;
        self.write(&path, record)
    }

    fn get(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let path = self.record_path(id)?;
        self.read(&path)
    }
}

fn lock_poisoned() -> SandboxError {
    SandboxError::Store("file store lock poisoned".to_string())
}

/// Write to a sibling temp file, fsync, rename over the target, fsync the dir
fn atomic_write(target: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    let name = target.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = parent.join(format!(".{}.tmp.{}", name, uuid::Uuid::new_v4().simple()));

    let written = (|| {
        let mut f = fs::File::create(&temp_path)?;
        f.write_all(content)?;
        f.sync_all()?;
        fs::rename(&temp_path, target)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
        return written;
    }

    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
