use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("source file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("job already running for {0}")]
    Concurrency(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(source: std::io::Error) -> Self {
        PipelineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        PipelineError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
