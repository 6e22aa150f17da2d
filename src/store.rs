use std::path::Path;

use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{PipelineError, PipelineResult};

/// Record sent to the store when registering a new artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactMetadata {
    pub storage: String,
    /// Path of the bytes relative to the storage root.
    pub filename_disk: String,
    pub filename_download: String,
    pub title: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub filesize: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// The hosted content service that persists artifacts and folders.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn find_artifact(
        &self,
        filename: &str,
        storage: &str,
        folder: Option<&str>,
    ) -> PipelineResult<Option<String>>;

    /// Registers an artifact. With `upload` set, the file's bytes are sent
    /// along; otherwise the record points at bytes already in place.
    async fn register_artifact(
        &self,
        metadata: &ArtifactMetadata,
        upload: Option<&Path>,
    ) -> PipelineResult<String>;

    async fn find_folder(&self, name: &str, parent: Option<&str>) -> PipelineResult<Option<String>>;

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> PipelineResult<String>;
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewFolder<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

/// REST client for the asset store (`/files`, `/folders`).
#[derive(Debug, Clone)]
pub struct HttpAssetStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpAssetStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> PipelineResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("hls-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Asset store client targeting {}", base_url);
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn first_id(&self, path: &str, query: Vec<(String, String)>) -> PipelineResult<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .authorized(self.client.get(&url))
            .query(&query)
            .query(&[("limit", "1"), ("fields", "id")]);
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("GET {} failed: {}", url, e)))?;
        let body: DataEnvelope<Vec<IdRecord>> = read_json(response, &url).await?;
        Ok(body.data.into_iter().next().map(|r| r.id))
    }

    async fn created_id(&self, request: RequestBuilder, url: &str) -> PipelineResult<String> {
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("POST {} failed: {}", url, e)))?;
        let body: DataEnvelope<IdRecord> = read_json(response, url).await?;
        Ok(body.data.id)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    url: &str,
) -> PipelineResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let err_msg = format!("{} returned {}: {}", url, status, text.trim());
        error!("Store: {}", err_msg);
        return Err(PipelineError::Persistence(err_msg));
    }
    if status == StatusCode::NO_CONTENT {
        return Err(PipelineError::Persistence(format!("{} returned no content", url)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| PipelineError::Persistence(format!("unexpected response from {}: {}", url, e)))
}

fn parent_filter(query: &mut Vec<(String, String)>, parent: Option<&str>) {
    match parent {
        Some(parent) => query.push(("filter[parent][_eq]".into(), parent.into())),
        None => query.push(("filter[parent][_null]".into(), "true".into())),
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn find_artifact(
        &self,
        filename: &str,
        storage: &str,
        folder: Option<&str>,
    ) -> PipelineResult<Option<String>> {
        let mut query = vec![
            ("filter[filename_download][_eq]".to_string(), filename.to_string()),
            ("filter[storage][_eq]".to_string(), storage.to_string()),
        ];
        match folder {
            Some(folder) => query.push(("filter[folder][_eq]".into(), folder.into())),
            None => query.push(("filter[folder][_null]".into(), "true".into())),
        }
        self.first_id("/files", query).await
    }

    async fn register_artifact(
        &self,
        metadata: &ArtifactMetadata,
        upload: Option<&Path>,
    ) -> PipelineResult<String> {
        let url = format!("{}/files", self.base_url);

        let Some(path) = upload else {
            debug!("Store: registering {} in place", metadata.filename_disk);
            let request = self.authorized(self.client.post(&url)).json(metadata);
            return self.created_id(request, &url).await;
        };

        debug!("Store: uploading {:?} as {}", path, metadata.filename_download);
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| PipelineError::io(path, e))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, length)
            .file_name(metadata.filename_download.clone())
            .mime_str(&metadata.mime_type)
            .map_err(|e| PipelineError::Persistence(format!("invalid mime type: {}", e)))?;

        // Metadata fields must precede the file part.
        let mut form = multipart::Form::new()
            .text("storage", metadata.storage.clone())
            .text("filename_download", metadata.filename_download.clone())
            .text("title", metadata.title.clone())
            .text("type", metadata.mime_type.clone());
        if let Some(folder) = &metadata.folder {
            form = form.text("folder", folder.clone());
        }
        if let Some(width) = metadata.width {
            form = form.text("width", width.to_string());
        }
        if let Some(height) = metadata.height {
            form = form.text("height", height.to_string());
        }
        let form = form.part("file", part);

        let request = self.authorized(self.client.post(&url)).multipart(form);
        self.created_id(request, &url).await
    }

    async fn find_folder(&self, name: &str, parent: Option<&str>) -> PipelineResult<Option<String>> {
        let mut query = vec![("filter[name][_eq]".to_string(), name.to_string())];
        parent_filter(&mut query, parent);
        self.first_id("/folders", query).await
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> PipelineResult<String> {
        let url = format!("{}/folders", self.base_url);
        let request = self
            .authorized(self.client.post(&url))
            .json(&NewFolder { name, parent });
        self.created_id(request, &url).await
    }
}
