use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use tokio::signal;
use tokio::time::sleep;
use uuid::Uuid;

use hls_worker::command::ProcessRunner;
use hls_worker::config::WorkerConfig;
use hls_worker::job::{
    JOB_CONSUMER_GROUP, Job, RESULT_STREAM_KEY, TRANSCODING_JOB_STREAM_KEY, parse_job_from_map,
};
use hls_worker::store::HttpAssetStore;
use hls_worker::{JobReport, Pipeline, ensure_consumer_group_exists, get_consumer_hostname};

const WORKER_LOOP_DELAY_MS: u64 = 1000;
const STREAM_BLOCK_TIMEOUT_MS: usize = 5000;

async fn process_single_job(pipeline: &Pipeline, job: &Job) -> JobReport {
    let request = &job.request;
    info!(
        "[Job {}] Processing '{}' ({}) from storage '{}'",
        request.job_id, request.filename, request.file_id, request.storage
    );
    debug!("[Job {}] Options: {:?}", request.job_id, request.options);

    match pipeline.run(request).await {
        Ok(report) => report,
        Err(e) => {
            error!("[Job {}] Rejected: {}", request.job_id, e);
            JobReport::failure(e.to_string())
        }
    }
}

async fn publish_result(valkey_con: &mut MultiplexedConnection, job_id: &str, report: &JobReport) {
    let payload = match serde_json::to_string(report) {
        Ok(json) => json,
        Err(e) => {
            error!("[Job {}] Failed to serialize result: {}", job_id, e);
            return;
        }
    };
    let added: RedisResult<String> = valkey_con
        .xadd(
            RESULT_STREAM_KEY,
            "*",
            &[("job_id", job_id), ("result", payload.as_str())],
        )
        .await;
    match added {
        Ok(id) => debug!("[Job {}] Result appended to '{}' as {}", job_id, RESULT_STREAM_KEY, id),
        Err(e) => error!("[Job {}] Failed to append result: {}", job_id, e),
    }
}

async fn jobs_processing_loop(
    mut valkey_con: MultiplexedConnection,
    pipeline: Pipeline,
    stream_key: &str,
    group_name: &str,
    consumer_name: &str,
) {
    info!(
        "Worker '{}' starting to process jobs from stream '{}', group '{}'",
        consumer_name, stream_key, group_name
    );

    loop {
        let read_opts = StreamReadOptions::default()
            .group(group_name, consumer_name)
            .count(1)
            .block(STREAM_BLOCK_TIMEOUT_MS);

        let result: RedisResult<Option<StreamReadReply>> = valkey_con
            .xread_options(&[stream_key], &[">"], &read_opts)
            .await;

        match result {
            Ok(Some(reply)) => {
                if reply.keys.is_empty() {
                    debug!("No new messages for consumer '{}', continuing.", consumer_name);
                    continue;
                }

                for stream_key_entry in reply.keys {
                    for message_entry in stream_key_entry.ids {
                        let job = match parse_job_from_map(message_entry.id.clone(), message_entry.map) {
                            Ok(j) => j,
                            Err(e) => {
                                error!(
                                    "Failed to parse job (Valkey ID: {}): {}. Skipping.",
                                    message_entry.id, e
                                );
                                continue;
                            }
                        };

                        let job_id = job.request.job_id.clone();
                        let report = process_single_job(&pipeline, &job).await;
                        publish_result(&mut valkey_con, &job_id, &report).await;

                        if let Some(err) = &report.error {
                            // stays pending for retry or manual handling
                            error!(
                                "[Job {}] Failed: {}. Valkey message {} will NOT be ACKed.",
                                job_id, err, job.message_id
                            );
                            continue;
                        }

                        info!("[Job {}] Successfully processed.", job_id);
                        match valkey_con
                            .xack::<_, _, _, i64>(stream_key, group_name, &[&job.message_id])
                            .await
                        {
                            Ok(acked) if acked > 0 => info!(
                                "[Job {}] ACKed Valkey message_id: {}",
                                job_id, job.message_id
                            ),
                            Ok(_) => warn!(
                                "[Job {}] ACK for Valkey message_id {} returned 0.",
                                job_id, job.message_id
                            ),
                            Err(e) => error!(
                                "[Job {}] Failed to ACK Valkey message_id {}: {}",
                                job_id, job.message_id, e
                            ),
                        }
                    }
                }
            }
            Ok(None) => {
                debug!(
                    "No messages received for consumer '{}' within timeout, re-checking.",
                    consumer_name
                );
            }
            Err(e) => {
                error!(
                    "Error reading from Valkey stream '{}': {}. Retrying after delay.",
                    stream_key, e
                );
                sleep(Duration::from_millis(WORKER_LOOP_DELAY_MS)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(WorkerConfig::from_env());
    debug!("Configuration: {:?}", config);

    let consumer_id = Uuid::new_v4().to_string();
    let hostname = get_consumer_hostname();
    let consumer_name = format!("worker-{}-{}", hostname, consumer_id);
    info!("Starting worker with consumer name: {}", consumer_name);

    let store = HttpAssetStore::new(config.store_base_url(), config.store_token.clone())?;
    let pipeline = Pipeline::new(config.clone(), Arc::new(ProcessRunner), Arc::new(store))?;

    info!("Connecting to Valkey at: {}", config.valkey_url);
    let valkey_client = redis::Client::open(config.valkey_url.as_str())?;
    let mut valkey_con_for_group_check = valkey_client
        .get_multiplexed_async_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to Valkey: {}", e))?;
    info!("Successfully connected to Valkey.");

    if let Err(e) = ensure_consumer_group_exists(
        &mut valkey_con_for_group_check,
        TRANSCODING_JOB_STREAM_KEY,
        JOB_CONSUMER_GROUP,
    )
    .await
    {
        error!("Could not ensure consumer group exists: {}. Exiting.", e);
        return Err(Box::new(e) as Box<dyn std::error::Error>);
    }

    let valkey_con_for_loop = valkey_client.get_multiplexed_async_connection().await?;

    tokio::select! {
        _ = jobs_processing_loop(valkey_con_for_loop, pipeline, TRANSCODING_JOB_STREAM_KEY, JOB_CONSUMER_GROUP, &consumer_name) => {
            error!("Job processing loop exited unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("CTRL-C received, shutting down worker '{}'.", consumer_name);
        }
    }

    info!("Worker {} finished.", consumer_name);
    Ok(())
}
