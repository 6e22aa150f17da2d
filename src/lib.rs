use log::{error, info};
use redis::{AsyncCommands, RedisError, RedisResult, aio::MultiplexedConnection};

pub mod artifact;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod lease;
pub mod options;
pub mod pipeline;
pub mod playlist;
pub mod probe;
pub mod publisher;
pub mod quality;
pub mod rewrite;
pub mod source;
pub mod storage;
pub mod store;
pub mod transcoder;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{JobReport, JobRequest, Pipeline};

// Helper to get hostname or a default
pub fn get_consumer_hostname() -> String {
    hostname::get()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

pub async fn ensure_consumer_group_exists(
    con: &mut MultiplexedConnection,
    stream_key: &str,
    group_name: &str,
) -> RedisResult<()> {
    // "0" replays the whole stream for a new group; MKSTREAM creates the stream.
    let result: Result<(), RedisError> = con
        .xgroup_create_mkstream(stream_key, group_name, "0")
        .await;

    match result {
        Ok(()) => {
            info!(
                "Consumer group '{}' created for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            info!(
                "Consumer group '{}' already exists for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Failed to create consumer group '{}' for stream '{}': {}",
                group_name, stream_key, e
            );
            Err(e)
        }
    }
}
