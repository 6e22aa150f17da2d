use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::artifact::Artifact;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::{StorageDriver, StorageLocation};
use crate::store::{ArtifactMetadata, AssetStore};

/// Registers produced files with the asset store at most once per
/// (filename, storage, folder).
pub struct ArtifactPublisher {
    store: Arc<dyn AssetStore>,
    target: StorageLocation,
    /// Directory the target storage root maps to on local disk, used to
    /// compute in-place disk paths.
    target_dir: Option<std::path::PathBuf>,
    folder: Option<String>,
    published: HashMap<String, String>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn AssetStore>, target: StorageLocation) -> PipelineResult<Self> {
        let target_dir = match target.driver {
            StorageDriver::Local => Some(target.local_dir()?),
            StorageDriver::Remote => None,
        };
        Ok(Self {
            store,
            target,
            target_dir,
            folder: None,
            published: HashMap::new(),
        })
    }

    /// Finds or creates folder `name` under `parent` and publishes into it
    /// from now on.
    pub async fn ensure_folder(&mut self, name: &str, parent: Option<&str>) -> PipelineResult<String> {
        let id = match self.store.find_folder(name, parent).await? {
            Some(id) => {
                debug!("Reusing folder '{}' ({})", name, id);
                id
            }
            None => {
                let id = self.store.create_folder(name, parent).await?;
                info!("Created folder '{}' ({}) under {:?}", name, id, parent);
                id
            }
        };
        if self.folder.as_deref() != Some(id.as_str()) {
            self.published.clear();
        }
        self.folder = Some(id.clone());
        Ok(id)
    }

    /// Returns the store identifier for `artifact`, registering it if the
    /// store does not know it yet.
    pub async fn publish(&mut self, artifact: &Artifact) -> PipelineResult<String> {
        if let Some(id) = self.published.get(&artifact.filename) {
            return Ok(id.clone());
        }

        if let Some(id) = self
            .store
            .find_artifact(&artifact.filename, &self.target.name, self.folder.as_deref())
            .await?
        {
            debug!(
                "{} {} already stored as {}",
                artifact.kind(),
                artifact.filename,
                id
            );
            self.published.insert(artifact.filename.clone(), id.clone());
            return Ok(id);
        }

        let metadata = self.metadata_for(artifact).await?;
        let upload = match self.target.driver {
            StorageDriver::Local => None,
            StorageDriver::Remote => Some(artifact.path.as_path()),
        };
        let id = self.store.register_artifact(&metadata, upload).await?;
        debug!(
            "Registered {} {} ({} bytes, {}) as {}",
            artifact.kind(),
            artifact.filename,
            metadata.filesize,
            metadata.mime_type,
            id
        );
        self.published.insert(artifact.filename.clone(), id.clone());
        Ok(id)
    }

    async fn metadata_for(&self, artifact: &Artifact) -> PipelineResult<ArtifactMetadata> {
        let filesize = tokio::fs::metadata(&artifact.path)
            .await
            .map_err(|e| PipelineError::io(&artifact.path, e))?
            .len();

        let filename_disk = match &self.target_dir {
            Some(dir) => disk_path(dir, &artifact.path),
            None => artifact.filename.clone(),
        };

        let title = Path::new(&artifact.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.filename.clone());

        Ok(ArtifactMetadata {
            storage: self.target.name.clone(),
            filename_disk,
            filename_download: artifact.filename.clone(),
            title,
            mime_type: artifact.mime_type().to_string(),
            filesize,
            width: artifact.width,
            height: artifact.height,
            folder: self.folder.clone(),
        })
    }
}

/// Path of `file` relative to the storage root, with forward slashes.
fn disk_path(root: &Path, file: &Path) -> String {
    match file.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}
