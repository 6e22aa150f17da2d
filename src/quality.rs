use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const SEGMENT_DURATION_SECS: u32 = 4;
pub const VIDEO_PROFILE: &str = "main";
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Encoder parameters for one rung of the bitrate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityLevel {
    /// Target height in pixels, also the quality's identifier.
    pub id: u32,
    pub width: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub crf: u8,
    /// `BANDWIDTH` advertised in the master manifest.
    pub bandwidth: u32,
}

impl QualityLevel {
    pub fn height(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> String {
        format!("{}p", self.id)
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.id)
    }

    pub fn maxrate_kbps(&self) -> u32 {
        self.video_kbps * 107 / 100
    }

    pub fn bufsize_kbps(&self) -> u32 {
        self.video_kbps * 3 / 2
    }
}

/// The fixed ladder, ascending by resolution.
pub const QUALITY_CATALOG: [QualityLevel; 5] = [
    QualityLevel {
        id: 240,
        width: 426,
        video_kbps: 400,
        audio_kbps: 64,
        crf: 28,
        bandwidth: 464_000,
    },
    QualityLevel {
        id: 480,
        width: 854,
        video_kbps: 1400,
        audio_kbps: 128,
        crf: 26,
        bandwidth: 1_528_000,
    },
    QualityLevel {
        id: 720,
        width: 1280,
        video_kbps: 2800,
        audio_kbps: 128,
        crf: 23,
        bandwidth: 2_928_000,
    },
    QualityLevel {
        id: 1080,
        width: 1920,
        video_kbps: 5000,
        audio_kbps: 192,
        crf: 22,
        bandwidth: 5_192_000,
    },
    QualityLevel {
        id: 2160,
        width: 3840,
        video_kbps: 20000,
        audio_kbps: 192,
        crf: 20,
        bandwidth: 20_192_000,
    },
];

pub fn quality_by_id(id: u32) -> Option<&'static QualityLevel> {
    QUALITY_CATALOG.iter().find(|q| q.id == id)
}

/// Requested qualities as sent by the caller.
///
/// Accepts either a list of tokens (`["720p", "1080p"]`) or a single string
/// that holds a JSON array, a comma separated list, or `all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualitySelection {
    List(Vec<serde_json::Value>),
    Encoded(String),
}

impl Default for QualitySelection {
    fn default() -> Self {
        QualitySelection::Encoded("all".to_string())
    }
}

impl QualitySelection {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QualitySelection::List(
            tokens
                .into_iter()
                .map(|t| serde_json::Value::String(t.into()))
                .collect(),
        )
    }

    /// Normalises the selection to catalog heights. `None` means "all".
    fn requested_heights(&self) -> Option<Vec<u32>> {
        let tokens: Vec<String> = match self {
            QualitySelection::List(values) => values.iter().map(value_token).collect(),
            QualitySelection::Encoded(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
                    return None;
                }
                if trimmed.starts_with('[') {
                    match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
                        Ok(values) => values.iter().map(value_token).collect(),
                        Err(e) => {
                            warn!(
                                "Malformed quality selection {:?} ({}), using all qualities",
                                raw, e
                            );
                            return None;
                        }
                    }
                } else {
                    trimmed.split(',').map(|s| s.to_string()).collect()
                }
            }
        };

        if tokens.is_empty() || tokens.iter().any(|t| t.trim().eq_ignore_ascii_case("all")) {
            return None;
        }

        Some(tokens.iter().filter_map(|t| parse_height(t)).collect())
    }
}

fn value_token(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses `"720p"`, `"720"` or `"720P "` into `720`.
pub fn parse_height(token: &str) -> Option<u32> {
    let digits = token
        .trim()
        .trim_end_matches(|c: char| !c.is_ascii_digit());
    match digits.parse::<u32>() {
        Ok(h) => Some(h),
        Err(_) => {
            debug!("Discarding unparseable quality token {:?}", token);
            None
        }
    }
}

/// Ordered, immutable list of renditions to produce for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPlan {
    levels: Vec<QualityLevel>,
}

impl QualityPlan {
    /// Intersects the selection with the catalog and drops every quality
    /// taller than the source. Equal heights are kept.
    pub fn compute(selection: &QualitySelection, source_height: u32) -> Self {
        let requested = selection.requested_heights();
        let levels = QUALITY_CATALOG
            .iter()
            .filter(|q| requested.as_ref().is_none_or(|ids| ids.contains(&q.id)))
            .filter(|q| q.height() <= source_height)
            .copied()
            .collect();
        QualityPlan { levels }
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn ids(&self) -> Vec<u32> {
        self.levels.iter().map(|q| q.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn highest(&self) -> Option<&QualityLevel> {
        self.levels.last()
    }
}
