use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Exclusive claim on one base name inside an output directory.
///
/// Held for the lifetime of a job so two workers never scan, encode or
/// rewrite the same renditions at once. The lease file is removed on drop.
#[derive(Debug)]
pub struct OutputLease {
    path: PathBuf,
}

impl OutputLease {
    pub fn acquire(output_dir: &Path, base: &str, stale_after: Duration) -> PipelineResult<Self> {
        std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;
        let path = output_dir.join(format!(".{}.lock", base));

        match Self::create(&path) {
            Ok(lease) => Ok(lease),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(&path, stale_after) {
                    warn!("Reclaiming stale lease {:?}", path);
                    std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
                    Self::create(&path).map_err(|e| match e.kind() {
                        ErrorKind::AlreadyExists => PipelineError::Concurrency(base.to_string()),
                        _ => PipelineError::io(&path, e),
                    })
                } else {
                    Err(PipelineError::Concurrency(base.to_string()))
                }
            }
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired lease {:?}", path);
        Ok(OutputLease {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLease {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lease {:?}: {}", self.path, e);
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}
