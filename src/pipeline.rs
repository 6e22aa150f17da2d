use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::artifact::{
    Artifact, ArtifactKey, ArtifactRegistry, PublishedFile, collect_segments,
    quality_manifest_name,
};
use crate::cleanup::{remove_local_artifacts, remove_temp_source};
use crate::command::CommandRunner;
use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::lease::OutputLease;
use crate::options::TranscodeOptions;
use crate::playlist::build_master;
use crate::probe::{MetadataProbe, ProbeResult};
use crate::publisher::ArtifactPublisher;
use crate::quality::QualityPlan;
use crate::rewrite::PlaylistRewriter;
use crate::source::{AcquiredSource, SourceAcquirer, SourceMedia};
use crate::storage::{StorageDriver, StorageLocation, resolve_storage};
use crate::store::AssetStore;
use crate::transcoder::{TranscodeEngine, TranscodeOutcome};

pub const NO_QUALITIES_ERROR: &str = "no quality levels selected";

/// One source video to turn into a published HLS ladder.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: String,
    /// Store identifier of the source video.
    pub file_id: String,
    pub filename: String,
    pub filename_disk: Option<String>,
    /// Storage location holding the source.
    pub storage: String,
    /// Parent folder for the job's output folder.
    pub folder: Option<String>,
    pub options: TranscodeOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterRef {
    pub id: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub is_vertical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub available_qualities: Vec<u32>,
    pub dimensions: Option<Dimensions>,
    pub duration_ms: u64,
    pub thumbnail: Option<String>,
}

/// Result payload handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PublishedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn failure(message: impl Into<String>) -> Self {
        JobReport {
            master: None,
            metadata: None,
            files: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Transcodes one source and publishes the result. Collaborators are
/// injected so tests can script the encoder and the store.
pub struct Pipeline {
    config: Arc<WorkerConfig>,
    store: Arc<dyn AssetStore>,
    acquirer: SourceAcquirer,
    probe: MetadataProbe,
    engine: TranscodeEngine,
}

impl Pipeline {
    pub fn new(
        config: Arc<WorkerConfig>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn AssetStore>,
    ) -> PipelineResult<Self> {
        let acquirer = SourceAcquirer::new(
            config.public_base_url(),
            config.store_token.clone(),
            config.temp_dir.clone(),
        )?;
        let probe = MetadataProbe::new(
            runner.clone(),
            config.ffprobe_path.clone(),
            config.probe_timeout,
        );
        let engine = TranscodeEngine::new(
            runner,
            config.ffmpeg_path.clone(),
            config.encoder_timeout,
        );
        Ok(Self {
            config,
            store,
            acquirer,
            probe,
            engine,
        })
    }

    /// Runs a job. Invalid requests are rejected with `Err` before anything
    /// is touched; every later failure is reported in the returned payload.
    pub async fn run(&self, request: &JobRequest) -> PipelineResult<JobReport> {
        validate(request)?;

        match self.process(request).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("[Job {}] Failed: {}", request.job_id, e);
                Ok(JobReport::failure(e.to_string()))
            }
        }
    }

    async fn process(&self, request: &JobRequest) -> PipelineResult<JobReport> {
        let job_id = &request.job_id;
        let options = &request.options;

        let source_location = resolve_storage(&self.config, &request.storage)?;
        let target_name =
            options.target_storage_name(&request.storage, &self.config.default_target_storage);
        let target = resolve_storage(&self.config, target_name)?;
        info!(
            "[Job {}] Source '{}' on {} ({}), target {} ({})",
            job_id,
            request.filename,
            source_location.name,
            source_location.driver,
            target.name,
            target.driver
        );

        let source = SourceMedia::new(
            request.file_id.clone(),
            request.filename.clone(),
            request.filename_disk.clone(),
            source_location,
        );
        let acquired = self.acquirer.acquire(&source).await?;

        let result = self
            .process_acquired(request, &source, &acquired, &target)
            .await;
        remove_temp_source(&acquired).await;
        result
    }

    async fn process_acquired(
        &self,
        request: &JobRequest,
        source: &SourceMedia,
        acquired: &AcquiredSource,
        target: &StorageLocation,
    ) -> PipelineResult<JobReport> {
        let job_id = &request.job_id;
        let options = &request.options;
        let base = source.base_name.as_str();

        let probe = self.probe.probe_or_fallback(job_id, &acquired.path).await;
        let plan = QualityPlan::compute(&options.qualities, probe.height);
        if plan.is_empty() {
            warn!(
                "[Job {}] No planned quality fits a {}px source",
                job_id, probe.height
            );
            return Ok(JobReport::failure(NO_QUALITIES_ERROR));
        }
        info!("[Job {}] Quality plan: {:?}", job_id, plan.ids());

        let output_dir = self.output_dir(request, acquired, target)?;
        let lease = OutputLease::acquire(&output_dir, base, self.config.lease_stale_after)?;
        debug!("[Job {}] Holding lease {:?}", job_id, lease.path());

        let settings = options.encode_settings();
        let outcome = self
            .engine
            .transcode(job_id, &acquired.path, &output_dir, base, &plan, &probe, &settings)
            .await?;
        if outcome == TranscodeOutcome::Skipped {
            info!("[Job {}] Reusing renditions from a previous run", job_id);
        }
        let thumbnail = self
            .engine
            .thumbnail(job_id, &acquired.path, &output_dir, base, &plan, &probe, &settings)
            .await;
        let master = build_master(&output_dir, base, &plan).await?;

        let mut publisher = ArtifactPublisher::new(self.store.clone(), target.clone())?;
        let folder = publisher
            .ensure_folder(base, request.folder.as_deref())
            .await?;
        info!("[Job {}] Publishing into folder {}", job_id, folder);

        let mut registry = ArtifactRegistry::new();

        // Segments and the thumbnail may fail individually.
        let segments = collect_segments(&output_dir, base, &plan).await?;
        let mut failed_segments = 0usize;
        for segment in &segments {
            match publisher.publish(segment).await {
                Ok(id) => registry.insert(segment.key, published(segment, id)),
                Err(e) => {
                    failed_segments += 1;
                    warn!(
                        "[Job {}] Skipping segment {}: {}",
                        job_id, segment.filename, e
                    );
                }
            }
        }
        info!(
            "[Job {}] Published {} of {} segments",
            job_id,
            segments.len() - failed_segments,
            segments.len()
        );

        let mut thumbnail_id = None;
        if let Some(thumbnail) = &thumbnail {
            match publisher.publish(thumbnail).await {
                Ok(id) => {
                    registry.insert(thumbnail.key, published(thumbnail, id.clone()));
                    thumbnail_id = Some(id);
                }
                Err(e) => warn!("[Job {}] Skipping thumbnail: {}", job_id, e),
            }
        }
        if registry.is_empty() {
            warn!(
                "[Job {}] Nothing below the manifests was published, references keep their filenames",
                job_id
            );
        }

        let public_base = self.config.public_base_url();
        let rewriter = PlaylistRewriter::new(base, options.reference_mode, &public_base);

        for quality in plan.levels().iter().filter(|q| master.qualities.contains(&q.id)) {
            let path = output_dir.join(quality_manifest_name(base, quality));
            rewriter.rewrite_file(&path, &registry).await?;
            let artifact = Artifact::new(ArtifactKey::QualityManifest { quality: quality.id }, path)?;
            let id = publisher.publish(&artifact).await?;
            registry.insert(artifact.key, published(&artifact, id));
        }

        rewriter.rewrite_file(&master.path, &registry).await?;
        let master_artifact = Artifact::new(ArtifactKey::MasterManifest, master.path.clone())?;
        let master_id = publisher.publish(&master_artifact).await?;
        registry.insert(
            master_artifact.key,
            published(&master_artifact, master_id.clone()),
        );
        info!(
            "[Job {}] Master manifest published as {} ({} artifacts)",
            job_id,
            master_id,
            registry.len()
        );

        if target.driver.is_remote() {
            remove_local_artifacts(&output_dir, base, &acquired.path).await;
        }
        drop(lease);
        if output_dir == self.scratch_dir(request) {
            // only succeeds once the scratch directory is empty
            let _ = tokio::fs::remove_dir(&output_dir).await;
        }

        Ok(JobReport {
            master: Some(MasterRef {
                id: master_id,
                filename: master_artifact.filename.clone(),
            }),
            metadata: Some(JobMetadata {
                available_qualities: master.qualities.clone(),
                dimensions: dimensions_of(&probe),
                duration_ms: probe.duration_ms,
                thumbnail: thumbnail_id,
            }),
            files: registry.files(),
            error: None,
        })
    }

    /// Where renditions are written for this job.
    fn output_dir(
        &self,
        request: &JobRequest,
        acquired: &AcquiredSource,
        target: &StorageLocation,
    ) -> PipelineResult<PathBuf> {
        if target.driver == StorageDriver::Local {
            return target.local_dir();
        }
        if let Some(parent) = acquired.path.parent().filter(|_| !acquired.temporary) {
            return Ok(parent.to_path_buf());
        }
        Ok(self.scratch_dir(request))
    }

    fn scratch_dir(&self, request: &JobRequest) -> PathBuf {
        self.config.temp_dir.join(&request.job_id)
    }
}

fn published(artifact: &Artifact, id: String) -> PublishedFile {
    PublishedFile {
        filename: artifact.filename.clone(),
        id,
    }
}

fn dimensions_of(probe: &ProbeResult) -> Option<Dimensions> {
    probe.is_known().then_some(Dimensions {
        width: probe.width,
        height: probe.height,
        is_vertical: probe.is_vertical,
    })
}

fn validate(request: &JobRequest) -> PipelineResult<()> {
    let required = [
        ("job_id", &request.job_id),
        ("file_id", &request.file_id),
        ("filename", &request.filename),
        ("storage", &request.storage),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(PipelineError::Validation(format!("missing {}", field)));
        }
    }
    if !is_plain_component(&request.job_id) {
        return Err(PipelineError::Validation(format!(
            "job_id {:?} must be a single path component",
            request.job_id
        )));
    }
    request.options.validate()
}

/// The job id names a scratch directory under the temp dir.
fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
