/// Run-scoped build context directory
///
/// Each context lives in its own uuid-named directory under the configured
/// root. The directory is removed exactly once: by `cleanup()` or, failing
/// that, on drop, so every exit path (errors and panics included) tears it down.
use crate::config::types::{Result, SandboxError};
use crate::observability::get_metrics;
use crate::validate::validate_relative_path;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the generated build script inside the context
pub const BUILD_SCRIPT_NAME: &str = "Dockerfile";

/// Exclusively owned, ephemeral build context
#[derive(Debug)]
pub struct BuildContext {
    id: String,
    dir: PathBuf,
    released: bool,
}

impl BuildContext {
    /// Create a fresh context directory under `root`
    pub fn create(root: &Path) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let dir = root.join(format!("testbox-ctx-{}", id));

        fs::create_dir_all(root).map_err(|e| io_context(e, "create context root", root))?;
        // create_dir (not _all) so an existing directory is never reused
        fs::create_dir(&dir).map_err(|e| io_context(e, "create build context", &dir))?;

        log::debug!("Created build context {}", dir.display());
        Ok(Self {
            id,
            dir,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` at a validated relative path, creating parents on demand
    pub fn write_file(&self, relative: &str, content: &[u8]) -> Result<PathBuf> {
        validate_relative_path(relative)?;
        let target = self.dir.join(relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_context(e, "create directory", parent))?;
        }
        fs::write(&target, content).map_err(|e| io_context(e, "write file", &target))?;
        Ok(target)
    }

    /// Write the generated build script at the context root
    pub fn write_build_script(&self, rendered: &str) -> Result<PathBuf> {
        let target = self.dir.join(BUILD_SCRIPT_NAME);
        fs::write(&target, rendered).map_err(|e| io_context(e, "write build script", &target))?;
        Ok(target)
    }

    /// Remove the context directory (idempotent)
    pub fn cleanup(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let outcome = match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_context(e, "remove build context", &self.dir)),
        };

        get_metrics().record_cleanup(outcome.is_ok());
        match &outcome {
            Ok(()) => log::debug!("Removed build context {}", self.dir.display()),
            Err(e) => log::warn!("{}", e),
        }
        outcome
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn io_context(e: std::io::Error, action: &str, path: &Path) -> SandboxError {
    SandboxError::Io(std::io::Error::new(
        e.kind(),
        format!("failed to {} {}: {}", action, path.display(), e),
    ))
}
