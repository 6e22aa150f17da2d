use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{PipelineError, PipelineResult};

/// Geometry and format facts about the source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub is_vertical: bool,
    pub high_bit_depth: bool,
}

impl ProbeResult {
    /// Stand-in used when the prober fails: no rendition gets excluded by
    /// the upscale filter and the duration is unknown.
    pub fn unknown() -> Self {
        ProbeResult {
            width: u32::MAX,
            height: u32::MAX,
            duration_ms: 0,
            is_vertical: false,
            high_bit_depth: false,
        }
    }

    pub fn is_known(&self) -> bool {
        self.height != u32::MAX
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    // ffprobe prints durations as strings
    duration: Option<String>,
}

pub struct MetadataProbe {
    runner: Arc<dyn CommandRunner>,
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl MetadataProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, ffprobe: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            ffprobe,
            timeout,
        }
    }

    /// Probes the source, absorbing failures into [`ProbeResult::unknown`].
    pub async fn probe_or_fallback(&self, job_id: &str, input: &Path) -> ProbeResult {
        match self.probe(input).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "[Job {}] Probing {:?} failed, continuing without source dimensions: {}",
                    job_id, input, e
                );
                ProbeResult::unknown()
            }
        }
    }

    pub async fn probe(&self, input: &Path) -> PipelineResult<ProbeResult> {
        let (width, height, duration_ms) = self.probe_geometry(input).await?;
        let high_bit_depth = match self.probe_pixel_format(input).await {
            Ok(Some(pix_fmt)) => is_high_bit_depth(&pix_fmt),
            Ok(None) => false,
            Err(e) => {
                debug!("Pixel format probe failed for {:?}, assuming 8-bit: {}", input, e);
                false
            }
        };

        let result = ProbeResult {
            width,
            height,
            duration_ms,
            is_vertical: height > width,
            high_bit_depth,
        };
        debug!("Probe result for {:?}: {:?}", input, result);
        Ok(result)
    }

    async fn probe_geometry(&self, input: &Path) -> PipelineResult<(u32, u32, u64)> {
        let mut spec = CommandSpec::new(&self.ffprobe);
        spec.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "json",
        ])
        .path_arg(input)
        .timeout(self.timeout);

        let parsed = self.run_json(&spec).await?;
        parse_geometry(&parsed)
    }

    async fn probe_pixel_format(&self, input: &Path) -> PipelineResult<Option<String>> {
        let mut spec = CommandSpec::new(&self.ffprobe);
        spec.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=pix_fmt",
            "-of",
            "json",
        ])
        .path_arg(input)
        .timeout(self.timeout);

        let parsed = self.run_json(&spec).await?;
        Ok(parsed.streams.into_iter().find_map(|s| s.pix_fmt))
    }

    async fn run_json(&self, spec: &CommandSpec) -> PipelineResult<ProbeOutput> {
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(PipelineError::tool(
                spec.tool_name(),
                format!("exited with {:?}: {}", output.code, output.stderr.trim()),
            ));
        }
        serde_json::from_str(&output.stdout).map_err(|e| {
            PipelineError::tool(spec.tool_name(), format!("unparseable output: {}", e))
        })
    }
}

fn parse_geometry(parsed: &ProbeOutput) -> PipelineResult<(u32, u32, u64)> {
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| PipelineError::tool("ffprobe", "no video stream with dimensions"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(PipelineError::tool("ffprobe", "video stream has zero dimensions")),
    };

    let duration_ms = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| match d.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => Some((secs * 1000.0).round() as u64),
            _ => {
                warn!("Ignoring unparseable duration {:?}", d);
                None
            }
        })
        .unwrap_or(0);

    Ok((width, height, duration_ms))
}

/// True when the pixel format carries more than 8 bits per component,
/// e.g. `yuv420p10le`, `p010le` or `yuv444p12be`.
pub fn is_high_bit_depth(pix_fmt: &str) -> bool {
    let fmt = pix_fmt.to_ascii_lowercase();
    [
        "10le", "10be", "12le", "12be", "16le", "16be", "p010", "p016", "p210", "p410",
    ]
        .iter()
        .any(|marker| fmt.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<PipelineResult<CommandOutput>>>,
    }

    #[async_trait]
    impl CommandRunner for Scripted {
        async fn run(&self, _spec: &CommandSpec) -> PipelineResult<CommandOutput> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn ok(stdout: &str) -> PipelineResult<CommandOutput> {
        Ok(CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn probe_with(replies: Vec<PipelineResult<CommandOutput>>) -> MetadataProbe {
        MetadataProbe::new(
            Arc::new(Scripted {
                replies: Mutex::new(replies),
            }),
            PathBuf::from("ffprobe"),
            None,
        )
    }

    #[tokio::test]
    async fn parses_geometry_duration_and_bit_depth() {
        let probe = probe_with(vec![
            ok(r#"{"streams":[{"width":1080,"height":1920}],"format":{"duration":"12.345"}}"#),
            ok(r#"{"streams":[{"pix_fmt":"yuv420p10le"}]}"#),
        ]);
        let result = probe.probe(Path::new("in.mov")).await.unwrap();
        assert_eq!(result.width, 1080);
        assert_eq!(result.height, 1920);
        assert_eq!(result.duration_ms, 12345);
        assert!(result.is_vertical);
        assert!(result.high_bit_depth);
    }

    #[tokio::test]
    async fn pixel_format_failure_defaults_to_eight_bit() {
        let probe = probe_with(vec![
            ok(r#"{"streams":[{"width":1920,"height":1080}],"format":{"duration":"1.0"}}"#),
            Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "boom".into(),
            }),
        ]);
        let result = probe.probe(Path::new("in.mp4")).await.unwrap();
        assert!(!result.high_bit_depth);
        assert!(!result.is_vertical);
    }

    #[tokio::test]
    async fn geometry_failure_falls_back_to_unknown() {
        let probe = probe_with(vec![ok("not json")]);
        let result = probe.probe_or_fallback("job-1", Path::new("in.mp4")).await;
        assert_eq!(result, ProbeResult::unknown());
        assert!(!result.is_known());
    }

    #[test]
    fn bit_depth_markers() {
        assert!(is_high_bit_depth("yuv420p10le"));
        assert!(is_high_bit_depth("p010le"));
        assert!(is_high_bit_depth("yuv444p12be"));
        assert!(!is_high_bit_depth("yuv420p"));
        assert!(is_high_bit_depth("gray10le"));
        assert!(!is_high_bit_depth("nv12"));
    }
}
