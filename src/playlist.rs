use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::artifact::{master_manifest_name, quality_manifest_name};
use crate::error::{PipelineError, PipelineResult};
use crate::quality::{QualityLevel, QualityPlan};
use crate::transcoder::{MANIFEST_HEADER, is_non_empty_file};

pub const MASTER_VERSION_LINE: &str = "#EXT-X-VERSION:3";

/// A written master manifest and the qualities it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterPlaylist {
    pub path: PathBuf,
    pub qualities: Vec<u32>,
}

/// Renders master manifest text for the given renditions, in the order given.
pub fn render_master(base: &str, qualities: &[QualityLevel]) -> String {
    let mut playlist = String::new();
    playlist.push_str(MANIFEST_HEADER);
    playlist.push('\n');
    playlist.push_str(MASTER_VERSION_LINE);
    playlist.push('\n');
    for quality in qualities {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            quality.bandwidth,
            quality.resolution()
        ));
        playlist.push_str(&quality_manifest_name(base, quality));
        playlist.push('\n');
    }
    playlist
}

/// Writes `<base>_master.m3u8` listing every planned quality whose manifest
/// was actually produced.
pub async fn build_master(
    output_dir: &Path,
    base: &str,
    plan: &QualityPlan,
) -> PipelineResult<MasterPlaylist> {
    let mut available = Vec::new();
    for quality in plan.levels() {
        let manifest = output_dir.join(quality_manifest_name(base, quality));
        if is_non_empty_file(&manifest).await {
            available.push(*quality);
        } else {
            warn!(
                "{} manifest {:?} missing or empty, leaving it out of the master",
                quality.label(),
                manifest
            );
        }
    }

    if available.is_empty() {
        return Err(PipelineError::tool(
            "ffmpeg",
            format!("no quality manifests were produced for '{}'", base),
        ));
    }

    let path = output_dir.join(master_manifest_name(base));
    tokio::fs::write(&path, render_master(base, &available))
        .await
        .map_err(|e| PipelineError::io(&path, e))?;

    let qualities: Vec<u32> = available.iter().map(|q| q.id).collect();
    info!("Master manifest {:?} written with qualities {:?}", path, qualities);
    Ok(MasterPlaylist { path, qualities })
}
