use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::quality::{QualityLevel, QualityPlan, quality_by_id};

pub const MASTER_SUFFIX: &str = "master";
pub const THUMBNAIL_SUFFIX: &str = "thumbnail";
pub const MANIFEST_EXTENSION: &str = "m3u8";
pub const SEGMENT_EXTENSION: &str = "ts";
pub const THUMBNAIL_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Segment,
    QualityManifest,
    MasterManifest,
    Thumbnail,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKind::Segment => "segment",
            ArtifactKind::QualityManifest => "quality manifest",
            ArtifactKind::MasterManifest => "master manifest",
            ArtifactKind::Thumbnail => "thumbnail",
        };
        f.write_str(name)
    }
}

/// Structural identity of a produced file within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    Segment { quality: u32, index: u32 },
    QualityManifest { quality: u32 },
    MasterManifest,
    Thumbnail,
}

impl ArtifactKey {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactKey::Segment { .. } => ArtifactKind::Segment,
            ArtifactKey::QualityManifest { .. } => ArtifactKind::QualityManifest,
            ArtifactKey::MasterManifest => ArtifactKind::MasterManifest,
            ArtifactKey::Thumbnail => ArtifactKind::Thumbnail,
        }
    }

    /// Recovers the key from a filename produced for `base`.
    ///
    /// Returns `None` for files that do not belong to this job or do not
    /// follow the naming scheme.
    pub fn parse(base: &str, filename: &str) -> Option<Self> {
        let rest = filename.strip_prefix(base)?.strip_prefix('_')?;
        let (stem, ext) = rest.rsplit_once('.')?;

        match ext {
            MANIFEST_EXTENSION if stem == MASTER_SUFFIX => Some(ArtifactKey::MasterManifest),
            THUMBNAIL_EXTENSION if stem == THUMBNAIL_SUFFIX => Some(ArtifactKey::Thumbnail),
            MANIFEST_EXTENSION => {
                let quality = parse_quality_label(stem)?;
                Some(ArtifactKey::QualityManifest { quality })
            }
            SEGMENT_EXTENSION => {
                let (label, index) = stem.rsplit_once('_')?;
                if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let quality = parse_quality_label(label)?;
                Some(ArtifactKey::Segment {
                    quality,
                    index: index.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

fn parse_quality_label(label: &str) -> Option<u32> {
    let digits = label.strip_suffix('p')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = digits.parse().ok()?;
    quality_by_id(id).map(|q| q.id)
}

pub fn quality_manifest_name(base: &str, quality: &QualityLevel) -> String {
    format!("{}_{}.{}", base, quality.label(), MANIFEST_EXTENSION)
}

/// ffmpeg output pattern for a quality's segments.
pub fn segment_pattern(base: &str, quality: &QualityLevel) -> String {
    format!("{}_{}_%03d.{}", base, quality.label(), SEGMENT_EXTENSION)
}

pub fn master_manifest_name(base: &str) -> String {
    format!("{}_{}.{}", base, MASTER_SUFFIX, MANIFEST_EXTENSION)
}

pub fn thumbnail_name(base: &str) -> String {
    format!("{}_{}.{}", base, THUMBNAIL_SUFFIX, THUMBNAIL_EXTENSION)
}

pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "m4s" => "video/iso.segment",
        "mp4" => "video/mp4",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// A file produced on disk by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub path: PathBuf,
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Artifact {
    pub fn new(key: ArtifactKey, path: PathBuf) -> PipelineResult<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PipelineError::Validation(format!("artifact path {:?} has no file name", path))
            })?;
        Ok(Artifact {
            key,
            path,
            filename,
            width: None,
            height: None,
        })
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.key.kind()
    }

    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.filename)
    }
}

/// Lists the segment files of the planned qualities that exist in `dir`,
/// ordered by quality then segment index.
pub async fn collect_segments(
    dir: &Path,
    base: &str,
    plan: &QualityPlan,
) -> PipelineResult<Vec<Artifact>> {
    let planned = plan.ids();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))?;

    let mut segments = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(key @ ArtifactKey::Segment { quality, .. }) = ArtifactKey::parse(base, &name) {
            if planned.contains(&quality) {
                segments.push(Artifact::new(key, entry.path())?);
            }
        }
    }
    segments.sort_by_key(|a| a.key);
    Ok(segments)
}

/// Identifier assigned by the store to a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedFile {
    pub filename: String,
    pub id: String,
}

/// Store identifiers of everything published so far, keyed structurally.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    entries: HashMap<ArtifactKey, PublishedFile>,
    order: Vec<ArtifactKey>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ArtifactKey, file: PublishedFile) {
        if self.entries.insert(key, file).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&PublishedFile> {
        self.entries.get(key)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&PublishedFile> {
        self.entries.values().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published files in publication order, for the job report.
    pub fn files(&self) -> Vec<PublishedFile> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_artifact_shape() {
        let base = "my_clip";
        assert_eq!(
            ArtifactKey::parse(base, "my_clip_720p.m3u8"),
            Some(ArtifactKey::QualityManifest { quality: 720 })
        );
        assert_eq!(
            ArtifactKey::parse(base, "my_clip_720p_007.ts"),
            Some(ArtifactKey::Segment {
                quality: 720,
                index: 7
            })
        );
        assert_eq!(
            ArtifactKey::parse(base, "my_clip_master.m3u8"),
            Some(ArtifactKey::MasterManifest)
        );
        assert_eq!(
            ArtifactKey::parse(base, "my_clip_thumbnail.jpg"),
            Some(ArtifactKey::Thumbnail)
        );
    }

    #[test]
    fn rejects_foreign_or_malformed_names() {
        let base = "clip";
        assert_eq!(ArtifactKey::parse(base, "other_720p.m3u8"), None);
        assert_eq!(ArtifactKey::parse(base, "clip_360p.m3u8"), None);
        assert_eq!(ArtifactKey::parse(base, "clip_720p_x1.ts"), None);
        assert_eq!(ArtifactKey::parse(base, "clip.mp4"), None);
        assert_eq!(ArtifactKey::parse(base, "clip_720p.mp4"), None);
    }

    #[test]
    fn kinds_follow_keys() {
        let segment = ArtifactKey::parse("v", "v_480p_002.ts").unwrap();
        assert_eq!(segment.kind(), ArtifactKind::Segment);
        assert_eq!(segment.kind().to_string(), "segment");
        assert_eq!(
            ArtifactKey::QualityManifest { quality: 480 }.kind().to_string(),
            "quality manifest"
        );
        assert_eq!(ArtifactKey::MasterManifest.kind().to_string(), "master manifest");
    }

    #[test]
    fn same_segment_name_in_different_qualities_is_distinct() {
        let a = ArtifactKey::parse("v", "v_240p_000.ts").unwrap();
        let b = ArtifactKey::parse("v", "v_720p_000.ts").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn names_round_trip_through_parse() {
        let q = quality_by_id(1080).unwrap();
        assert_eq!(
            ArtifactKey::parse("a", &quality_manifest_name("a", q)),
            Some(ArtifactKey::QualityManifest { quality: 1080 })
        );
        assert_eq!(segment_pattern("a", q), "a_1080p_%03d.ts");
        assert_eq!(master_manifest_name("a"), "a_master.m3u8");
    }

    #[test]
    fn mime_table_defaults_to_octet_stream() {
        assert_eq!(mime_type_for("x.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(mime_type_for("x_001.ts"), "video/mp2t");
        assert_eq!(mime_type_for("x.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("x.bin"), "application/octet-stream");
        assert_eq!(mime_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn registry_keeps_publication_order() {
        let mut registry = ArtifactRegistry::new();
        registry.insert(
            ArtifactKey::Thumbnail,
            PublishedFile {
                filename: "t.jpg".into(),
                id: "1".into(),
            },
        );
        registry.insert(
            ArtifactKey::MasterManifest,
            PublishedFile {
                filename: "m.m3u8".into(),
                id: "2".into(),
            },
        );
        let names: Vec<_> = registry.files().into_iter().map(|f| f.filename).collect();
        assert_eq!(names, vec!["t.jpg", "m.m3u8"]);
        assert_eq!(
            registry.get(&ArtifactKey::MasterManifest).map(|f| f.id.as_str()),
            Some("2")
        );
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn collects_only_planned_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "v_720p_001.ts",
            "v_240p_001.ts",
            "v_240p_000.ts",
            "v_480p_000.ts",
            "v_720p.m3u8",
            "other_240p_000.ts",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let plan = QualityPlan::compute(
            &crate::quality::QualitySelection::from_tokens(["240p", "720p"]),
            1080,
        );
        let segments = collect_segments(dir.path(), "v", &plan).await.unwrap();
        let names: Vec<_> = segments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["v_240p_000.ts", "v_240p_001.ts", "v_720p_001.ts"]);
    }
}
