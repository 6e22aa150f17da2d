use crate::options::TranscodeOptions;
use crate::pipeline::JobRequest;
use std::collections::HashMap;

pub const TRANSCODING_JOB_STREAM_KEY: &str = "transcoding_jobs";
pub const JOB_CONSUMER_GROUP: &str = "video_workers_group";
pub const RESULT_STREAM_KEY: &str = "transcoding_results";

#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String, // Valkey message ID
    pub request: JobRequest,
}

fn required_field(fields: &HashMap<String, redis::Value>, name: &str) -> Result<String, String> {
    let value = fields
        .get(name)
        .ok_or_else(|| format!("Missing {} field", name))?;
    redis::from_redis_value(value).map_err(|e| format!("Failed to parse {}: {}", name, e))
}

fn optional_field(
    fields: &HashMap<String, redis::Value>,
    name: &str,
) -> Result<Option<String>, String> {
    match fields.get(name) {
        None => Ok(None),
        Some(value) => {
            let parsed: String = redis::from_redis_value(value)
                .map_err(|e| format!("Failed to parse {}: {}", name, e))?;
            Ok(Some(parsed).filter(|s| !s.is_empty()))
        }
    }
}

pub fn parse_job_from_map(
    message_id: String,
    fields: HashMap<String, redis::Value>,
) -> Result<Job, String> {
    let job_id = required_field(&fields, "job_id")?;

    // Absent options mean every default.
    let options = match optional_field(&fields, "options_json")? {
        Some(json) => serde_json::from_str::<TranscodeOptions>(&json)
            .map_err(|e| format!("Failed to deserialize TranscodeOptions from JSON: {}", e))?,
        None => TranscodeOptions::default(),
    };

    Ok(Job {
        message_id,
        request: JobRequest {
            job_id,
            file_id: required_field(&fields, "file_id")?,
            filename: required_field(&fields, "filename")?,
            filename_disk: optional_field(&fields, "filename_disk")?,
            storage: required_field(&fields, "storage")?,
            folder: optional_field(&fields, "folder")?,
            options,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TargetStorageMode;

    fn field(value: &str) -> redis::Value {
        redis::Value::BulkString(value.as_bytes().to_vec())
    }

    fn base_fields() -> HashMap<String, redis::Value> {
        [
            ("job_id", "job-7"),
            ("file_id", "5f0c2a4e-9d1b-4c3e-8a7f-1b2c3d4e5f60"),
            ("filename", "holiday.mov"),
            ("storage", "local"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), field(v)))
        .collect()
    }

    #[test]
    fn parses_minimal_message_with_default_options() {
        let job = parse_job_from_map("1-0".into(), base_fields()).unwrap();
        assert_eq!(job.message_id, "1-0");
        assert_eq!(job.request.filename, "holiday.mov");
        assert_eq!(job.request.filename_disk, None);
        assert_eq!(job.request.folder, None);
        assert_eq!(job.request.options.threads, 1);
    }

    #[test]
    fn parses_optional_fields_and_options() {
        let mut fields = base_fields();
        fields.insert("filename_disk".into(), field("abc.mov"));
        fields.insert("folder".into(), field(""));
        fields.insert(
            "options_json".into(),
            field(r#"{"qualities":"480,720","target_storage":"source-same"}"#),
        );
        let job = parse_job_from_map("2-0".into(), fields).unwrap();
        assert_eq!(job.request.filename_disk.as_deref(), Some("abc.mov"));
        assert_eq!(job.request.folder, None);
        assert_eq!(job.request.options.target_storage, TargetStorageMode::SourceSame);
    }

    #[test]
    fn missing_storage_is_an_error() {
        let mut fields = base_fields();
        fields.remove("storage");
        let err = parse_job_from_map("3-0".into(), fields).unwrap_err();
        assert!(err.contains("storage"));
    }

    #[test]
    fn malformed_options_are_an_error() {
        let mut fields = base_fields();
        fields.insert("options_json".into(), field("{not json"));
        assert!(parse_job_from_map("4-0".into(), fields).is_err());
    }
}
