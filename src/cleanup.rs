use std::path::Path;

use log::{debug, info, warn};

use crate::artifact::ArtifactKey;
use crate::source::AcquiredSource;

/// Removes every artifact produced for `base` from `output_dir`, except
/// `keep`. Other files are left alone even when they share the prefix.
/// Returns how many files were deleted. Errors are only logged.
pub async fn remove_local_artifacts(output_dir: &Path, base: &str, keep: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cleanup: cannot list {:?}: {}", output_dir, e);
            return 0;
        }
    };

    let keep = std::fs::canonicalize(keep).unwrap_or_else(|_| keep.to_path_buf());
    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Cleanup: error reading {:?}: {}", output_dir, e);
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if ArtifactKey::parse(base, &name).is_none() {
            continue;
        }
        let path = entry.path();
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if canonical == keep {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => {}
            _ => continue,
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Cleanup: removed {:?}", path);
                removed += 1;
            }
            Err(e) => warn!("Cleanup: failed to delete {:?}: {}", path, e),
        }
    }
    info!("Cleanup: removed {} local artifact(s) from {:?}", removed, output_dir);
    removed
}

/// Deletes the source when it was downloaded for this job.
pub async fn remove_temp_source(source: &AcquiredSource) {
    if !source.temporary {
        return;
    }
    match tokio::fs::remove_file(&source.path).await {
        Ok(()) => debug!("Cleanup: removed temporary source {:?}", source.path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Cleanup: failed to delete temporary source {:?}: {}",
            source.path, e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_job_files_but_keeps_source_and_strangers() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "clip.mp4",
            "clip_720p.m3u8",
            "clip_720p_000.ts",
            "clip_master.m3u8",
            "clip_thumbnail.jpg",
            "other_720p.m3u8",
            "clip_final.mp4",
            "clip2_720p_000.ts",
            "clipboard.png",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let removed =
            remove_local_artifacts(dir.path(), "clip", &dir.path().join("clip.mp4")).await;
        assert_eq!(removed, 4);
        assert!(!dir.path().join("clip_720p_000.ts").exists());
        assert!(!dir.path().join("clip_thumbnail.jpg").exists());
        for kept in [
            "clip.mp4",
            "other_720p.m3u8",
            "clip_final.mp4",
            "clip2_720p_000.ts",
            "clipboard.png",
        ] {
            assert!(dir.path().join(kept).exists(), "{} was deleted", kept);
        }
    }

    #[tokio::test]
    async fn temp_source_is_removed_only_when_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_clip.mp4");
        std::fs::write(&path, b"x").unwrap();

        remove_temp_source(&AcquiredSource {
            path: path.clone(),
            temporary: false,
        })
        .await;
        assert!(path.exists());

        remove_temp_source(&AcquiredSource {
            path: path.clone(),
            temporary: true,
        })
        .await;
        assert!(!path.exists());
    }
}
