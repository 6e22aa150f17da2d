use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::artifact::{
    Artifact, ArtifactKey, quality_manifest_name, segment_pattern, thumbnail_name,
};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{PipelineError, PipelineResult};
use crate::probe::ProbeResult;
use crate::quality::{
    AUDIO_SAMPLE_RATE, QualityLevel, QualityPlan, SEGMENT_DURATION_SECS,
    VIDEO_PROFILE,
};

pub const MANIFEST_HEADER: &str = "#EXTM3U";
const VIDEO_CODEC: &str = "libx264";
const AUDIO_CODEC: &str = "aac";
const PRESET: &str = "veryfast";
const THUMBNAIL_MAX_SEEK_MS: u64 = 1000;

/// Per-job encoder knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Passed to `-threads`; 0 lets the encoder use every core.
    pub threads: u32,
    /// `nice` level for the encoder process.
    pub priority: Option<u8>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        EncodeSettings {
            threads: 1,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Encoded,
    /// Renditions from an earlier run were found and reused.
    Skipped,
}

pub struct TranscodeEngine {
    runner: Arc<dyn CommandRunner>,
    ffmpeg: PathBuf,
    timeout: Option<Duration>,
}

impl TranscodeEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, ffmpeg: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            ffmpeg,
            timeout,
        }
    }

    /// Encodes every planned quality in order, stopping at the first failure.
    pub async fn transcode(
        &self,
        job_id: &str,
        input_path: &Path,
        output_dir: &Path,
        base: &str,
        plan: &QualityPlan,
        probe: &ProbeResult,
        settings: &EncodeSettings,
    ) -> PipelineResult<TranscodeOutcome> {
        if has_existing_renditions(output_dir, base).await? {
            info!(
                "[Job {}] Renditions for '{}' already present in {:?}, skipping transcode",
                job_id, base, output_dir
            );
            return Ok(TranscodeOutcome::Skipped);
        }

        if !output_dir.exists() {
            tokio::fs::create_dir_all(output_dir)
                .await
                .map_err(|e| PipelineError::io(output_dir, e))?;
            info!("[Job {}] Created output directory: {:?}", job_id, output_dir);
        }

        for quality in plan.levels() {
            info!(
                "[Job {}] Starting {} rendition: {:?} -> {:?}",
                job_id,
                quality.label(),
                input_path,
                output_dir
            );
            let mut spec = build_encode_command(
                &self.ffmpeg,
                input_path,
                output_dir,
                base,
                quality,
                probe,
                settings,
            );
            spec.timeout(self.timeout);
            let spec = spec.with_priority(settings.priority);

            let output = self.runner.run(&spec).await?;
            if !output.success() {
                let err_msg = format!(
                    "{} rendition exited with status {:?}: {}",
                    quality.label(),
                    output.code,
                    last_lines(&output.stderr, 5)
                );
                error!("[Job {}] {}", job_id, err_msg);
                return Err(PipelineError::tool(spec.tool_name(), err_msg));
            }

            let manifest = output_dir.join(quality_manifest_name(base, quality));
            verify_manifest(&manifest).await?;
            info!(
                "[Job {}] {} rendition complete: {:?}",
                job_id,
                quality.label(),
                manifest
            );
        }

        Ok(TranscodeOutcome::Encoded)
    }

    /// Extracts a single JPEG frame. Failures are logged and yield `None`.
    pub async fn thumbnail(
        &self,
        job_id: &str,
        input_path: &Path,
        output_dir: &Path,
        base: &str,
        plan: &QualityPlan,
        probe: &ProbeResult,
        settings: &EncodeSettings,
    ) -> Option<Artifact> {
        let path = output_dir.join(thumbnail_name(base));
        let bounds = plan.highest()?;
        let dimensions = fit_within(probe, bounds);

        if !is_non_empty_file(&path).await {
            let seek_ms = (probe.duration_ms / 2).min(THUMBNAIL_MAX_SEEK_MS);
            let mut spec = CommandSpec::new(&self.ffmpeg);
            spec.args(["-y", "-ss"])
                .arg(format!("{:.3}", seek_ms as f64 / 1000.0))
                .arg("-i")
                .path_arg(input_path)
                .args(["-frames:v", "1", "-vf"])
                .arg(scale_filter(bounds, probe.high_bit_depth))
                .args(["-q:v", "3"])
                .path_arg(&path)
                .timeout(self.timeout);
            let spec = spec.with_priority(settings.priority);

            match self.runner.run(&spec).await {
                Ok(output) if output.success() && is_non_empty_file(&path).await => {
                    debug!("[Job {}] Thumbnail written to {:?}", job_id, path);
                }
                Ok(output) => {
                    warn!(
                        "[Job {}] Thumbnail extraction failed with status {:?}: {}",
                        job_id,
                        output.code,
                        last_lines(&output.stderr, 3)
                    );
                    return None;
                }
                Err(e) => {
                    warn!("[Job {}] Thumbnail extraction failed: {}", job_id, e);
                    return None;
                }
            }
        }

        let artifact = Artifact::new(ArtifactKey::Thumbnail, path).ok()?;
        Some(match dimensions {
            Some((w, h)) => artifact.with_dimensions(w, h),
            None => artifact,
        })
    }
}

/// True if `dir` holds a rendition (quality manifest or segment) named for
/// `base`. Files of other sources sharing the prefix do not count.
pub async fn has_existing_renditions(dir: &Path, base: &str) -> PipelineResult<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if matches!(
            ArtifactKey::parse(base, &name),
            Some(ArtifactKey::Segment { .. } | ArtifactKey::QualityManifest { .. })
        ) {
            debug!("Found existing rendition file {:?}", name);
            return Ok(true);
        }
    }
    Ok(false)
}

/// `scale` filter that fits the frame inside the quality's box, keeping the
/// aspect ratio and even dimensions.
pub fn scale_filter(quality: &QualityLevel, high_bit_depth: bool) -> String {
    let scale = format!(
        "scale=w={}:h={}:force_original_aspect_ratio=decrease:force_divisible_by=2",
        quality.width,
        quality.height()
    );
    if high_bit_depth {
        format!("format=yuv420p,{}", scale)
    } else {
        scale
    }
}

pub fn build_encode_command(
    ffmpeg: &Path,
    input_path: &Path,
    output_dir: &Path,
    base: &str,
    quality: &QualityLevel,
    probe: &ProbeResult,
    settings: &EncodeSettings,
) -> CommandSpec {
    let mut cmd = CommandSpec::new(ffmpeg);
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.arg("-i").path_arg(input_path);
    cmd.args(["-threads", &settings.threads.to_string()]);
    cmd.args(["-vf", &scale_filter(quality, probe.high_bit_depth)]);
    cmd.args(["-c:v", VIDEO_CODEC, "-profile:v", VIDEO_PROFILE, "-preset", PRESET]);
    cmd.args(["-crf", &quality.crf.to_string()]);
    cmd.args(["-b:v", &format!("{}k", quality.video_kbps)]);
    cmd.args(["-maxrate", &format!("{}k", quality.maxrate_kbps())]);
    cmd.args(["-bufsize", &format!("{}k", quality.bufsize_kbps())]);
    cmd.args(["-pix_fmt", "yuv420p"]);
    cmd.args(["-c:a", AUDIO_CODEC, "-ar", &AUDIO_SAMPLE_RATE.to_string()]);
    cmd.args(["-b:a", &format!("{}k", quality.audio_kbps)]);
    cmd.args(["-f", "hls", "-hls_time", &SEGMENT_DURATION_SECS.to_string()]);
    cmd.args(["-hls_playlist_type", "vod"]);
    cmd.arg("-hls_segment_filename")
        .path_arg(&output_dir.join(segment_pattern(base, quality)));
    cmd.path_arg(&output_dir.join(quality_manifest_name(base, quality)));
    cmd
}

/// A rendition counts only if its manifest exists, is non-empty and starts
/// with the playlist header.
pub async fn verify_manifest(path: &Path) -> PipelineResult<()> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        PipelineError::tool("ffmpeg", format!("manifest {:?} missing: {}", path, e))
    })?;
    if contents.trim().is_empty() {
        return Err(PipelineError::tool(
            "ffmpeg",
            format!("manifest {:?} is empty", path),
        ));
    }
    if !contents.trim_start().starts_with(MANIFEST_HEADER) {
        return Err(PipelineError::tool(
            "ffmpeg",
            format!("manifest {:?} lacks {} header", path, MANIFEST_HEADER),
        ));
    }
    Ok(())
}

pub async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Output size of fitting the source into `quality`'s box.
fn fit_within(probe: &ProbeResult, quality: &QualityLevel) -> Option<(u32, u32)> {
    if !probe.is_known() {
        return None;
    }
    let (sw, sh) = (probe.width as f64, probe.height as f64);
    let ratio = (quality.width as f64 / sw).min(quality.height() as f64 / sh);
    let even = |v: f64| ((v * ratio / 2.0).round() as u32 * 2).max(2);
    Some((even(sw), even(sh)))
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(count)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{QualitySelection, quality_by_id};

    fn probe(width: u32, height: u32, high_bit_depth: bool) -> ProbeResult {
        ProbeResult {
            width,
            height,
            duration_ms: 10_000,
            is_vertical: height > width,
            high_bit_depth,
        }
    }

    #[test]
    fn scale_filter_prepends_format_for_high_bit_depth() {
        let q = quality_by_id(720).unwrap();
        assert_eq!(
            scale_filter(q, false),
            "scale=w=1280:h=720:force_original_aspect_ratio=decrease:force_divisible_by=2"
        );
        assert!(scale_filter(q, true).starts_with("format=yuv420p,scale=w=1280"));
    }

    #[test]
    fn encode_command_carries_ladder_parameters() {
        let q = quality_by_id(480).unwrap();
        let spec = build_encode_command(
            Path::new("ffmpeg"),
            Path::new("/in/clip.mov"),
            Path::new("/out"),
            "clip",
            q,
            &probe(1920, 1080, false),
            &EncodeSettings {
                threads: 0,
                priority: None,
            },
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("-threads 0"));
        assert!(joined.contains("-b:v 1400k"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-hls_time 4"));
        assert!(joined.contains("-hls_playlist_type vod"));
        assert!(joined.contains("/out/clip_480p_%03d.ts"));
        assert_eq!(spec.args.last().unwrap(), "/out/clip_480p.m3u8");
    }

    #[tokio::test]
    async fn existing_rendition_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mov"), b"src").unwrap();
        assert!(!has_existing_renditions(dir.path(), "clip").await.unwrap());
        std::fs::write(dir.path().join("clip_720p_000.ts"), b"x").unwrap();
        assert!(has_existing_renditions(dir.path(), "clip").await.unwrap());
        assert!(!has_existing_renditions(dir.path(), "other").await.unwrap());
    }

    #[tokio::test]
    async fn renditions_of_similarly_named_sources_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "clip.mov",
            "clip2_720p.m3u8",
            "clip2_720p_000.ts",
            "clip_final.mp4",
            "clip_master.m3u8",
            "clip_thumbnail.jpg",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert!(!has_existing_renditions(dir.path(), "clip").await.unwrap());
        assert!(has_existing_renditions(dir.path(), "clip2").await.unwrap());
    }

    #[tokio::test]
    async fn missing_dir_has_no_renditions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_existing_renditions(&dir.path().join("nope"), "clip").await.unwrap());
    }

    #[tokio::test]
    async fn verify_manifest_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.m3u8");
        assert!(verify_manifest(&path).await.is_err());
        std::fs::write(&path, "").unwrap();
        assert!(verify_manifest(&path).await.is_err());
        std::fs::write(&path, "garbage\n").unwrap();
        assert!(verify_manifest(&path).await.is_err());
        std::fs::write(&path, "#EXTM3U\n#EXT-X-VERSION:3\n").unwrap();
        assert!(verify_manifest(&path).await.is_ok());
    }

    #[test]
    fn fit_within_keeps_aspect_and_even_sizes() {
        let q = quality_by_id(720).unwrap();
        assert_eq!(fit_within(&probe(1920, 1080, false), q), Some((1280, 720)));
        assert_eq!(fit_within(&probe(1080, 1920, false), q), Some((406, 720)));
        assert_eq!(fit_within(&ProbeResult::unknown(), q), None);
        let plan = QualityPlan::compute(&QualitySelection::default(), 720);
        assert_eq!(plan.highest().map(|q| q.id), Some(720));
    }

    #[test]
    fn last_lines_keeps_tail() {
        assert_eq!(last_lines("a\nb\nc\n", 2), "b | c");
        assert_eq!(last_lines("", 2), "");
    }
}
