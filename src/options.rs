use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::quality::QualitySelection;
use crate::rewrite::ReferenceMode;
use crate::transcoder::EncodeSettings;

pub const MAX_PRIORITY: u8 = 19;

/// Where published artifacts are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetStorageMode {
    /// The worker's configured default location.
    #[default]
    Default,
    /// Same location as the source video.
    #[serde(alias = "source")]
    SourceSame,
    /// The location named in `custom_storage`.
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    pub qualities: QualitySelection,
    /// Encoder threads; 0 means all cores.
    pub threads: u32,
    /// Process priority hint (0-19).
    pub priority: Option<u8>,
    pub reference_mode: ReferenceMode,
    pub target_storage: TargetStorageMode,
    pub custom_storage: Option<String>,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        TranscodeOptions {
            qualities: QualitySelection::default(),
            threads: 1,
            priority: None,
            reference_mode: ReferenceMode::Identifier,
            target_storage: TargetStorageMode::Default,
            custom_storage: None,
        }
    }
}

impl TranscodeOptions {
    pub fn validate(&self) -> PipelineResult<()> {
        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(PipelineError::Validation(format!(
                    "priority must be between 0 and {}, got {}",
                    MAX_PRIORITY, priority
                )));
            }
        }
        if self.target_storage == TargetStorageMode::Custom
            && self
                .custom_storage
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
        {
            return Err(PipelineError::Validation(
                "custom target storage selected but no custom_storage given".to_string(),
            ));
        }
        Ok(())
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            threads: self.threads,
            priority: self.priority,
        }
    }

    /// Name of the location artifacts are published to.
    pub fn target_storage_name<'a>(&'a self, source_storage: &'a str, default: &'a str) -> &'a str {
        match self.target_storage {
            TargetStorageMode::Default => default,
            TargetStorageMode::SourceSame => source_storage,
            TargetStorageMode::Custom => self.custom_storage.as_deref().unwrap_or(default),
        }
    }
}
