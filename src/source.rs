use std::path::{Path, PathBuf};

use futures::StreamExt;
use log::{debug, error, info};
use reqwest::Client;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

use crate::error::{PipelineError, PipelineResult};
use crate::storage::{StorageDriver, StorageLocation};

/// The video a job transcodes, as recorded in the asset store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMedia {
    /// Identifier of the source artifact in the store.
    pub id: String,
    /// Display filename, e.g. `holiday.mov`.
    pub filename: String,
    /// Filename of the bytes inside the storage root.
    pub filename_disk: String,
    pub storage: StorageLocation,
    /// `filename` without its extension; prefix of every produced file.
    pub base_name: String,
}

impl SourceMedia {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        filename_disk: Option<String>,
        storage: StorageLocation,
    ) -> Self {
        let filename = filename.into();
        let filename_disk = filename_disk
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| filename.clone());
        let base_name = base_name_of(&filename);
        SourceMedia {
            id: id.into(),
            filename,
            filename_disk,
            storage,
            base_name,
        }
    }

    pub fn driver(&self) -> StorageDriver {
        self.storage.driver
    }
}

pub fn base_name_of(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// A local path holding the source bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSource {
    pub path: PathBuf,
    /// Set when the bytes were downloaded and must be removed after the job.
    pub temporary: bool,
}

pub struct SourceAcquirer {
    client: Client,
    public_base_url: String,
    access_token: Option<String>,
    temp_dir: PathBuf,
}

impl SourceAcquirer {
    pub fn new(
        public_base_url: impl Into<String>,
        access_token: Option<String>,
        temp_dir: PathBuf,
    ) -> PipelineResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("hls-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            access_token,
            temp_dir,
        })
    }

    pub async fn acquire(&self, source: &SourceMedia) -> PipelineResult<AcquiredSource> {
        match source.driver() {
            StorageDriver::Local => {
                let path = source.storage.local_dir()?.join(&source.filename_disk);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    error!("Source file not found: {:?}", path);
                    return Err(PipelineError::NotFound { path });
                }
                debug!("Using local source {:?}", path);
                Ok(AcquiredSource {
                    path,
                    temporary: false,
                })
            }
            StorageDriver::Remote => {
                let path = self.download(source).await?;
                Ok(AcquiredSource {
                    path,
                    temporary: true,
                })
            }
        }
    }

    pub fn asset_url(&self, id: &str) -> String {
        let mut url = format!("{}/assets/{}?download", self.public_base_url, id);
        if let Some(token) = &self.access_token {
            url.push_str("&access_token=");
            url.push_str(token);
        }
        url
    }

    async fn download(&self, source: &SourceMedia) -> PipelineResult<PathBuf> {
        if !self.temp_dir.exists() {
            tokio::fs::create_dir_all(&self.temp_dir)
                .await
                .map_err(|e| PipelineError::io(&self.temp_dir, e))?;
        }
        let download_path = self
            .temp_dir
            .join(format!("{}_{}", source.id, base_file_name(&source.filename)));
        let url = self.asset_url(&source.id);

        info!("Downloading source {} to {:?}", source.id, download_path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            PipelineError::Network(format!("GET asset {} failed: {}", source.id, e))
        })?;
        if response.status() != reqwest::StatusCode::OK {
            let err_msg = format!("GET asset {} returned {}", source.id, response.status());
            error!("{}", err_msg);
            return Err(PipelineError::Network(err_msg));
        }

        let mut file = TokioFile::create(&download_path)
            .await
            .map_err(|e| PipelineError::io(&download_path, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&download_path).await;
                    return Err(PipelineError::Network(format!(
                        "error reading body of asset {}: {}",
                        source.id, e
                    )));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&download_path).await;
                return Err(PipelineError::io(&download_path, e));
            }
            bytes_written += chunk.len() as u64;
        }
        if let Err(e) = file.flush().await {
            drop(file);
            let _ = tokio::fs::remove_file(&download_path).await;
            return Err(PipelineError::io(&download_path, e));
        }

        debug!(
            "Downloaded {} bytes for asset {} to {:?}",
            bytes_written, source.id, download_path
        );
        Ok(download_path)
    }
}

fn base_file_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}
