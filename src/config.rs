use std::path::PathBuf;
use std::time::Duration;

use log::warn;

// Environment variable names
pub const VALKEY_URL_ENV_VAR: &str = "VALKEY_URL";
pub const STORAGE_LOCATIONS_ENV_VAR: &str = "STORAGE_LOCATIONS";
pub const PUBLIC_URL_ENV_VAR: &str = "PUBLIC_URL";
pub const HOST_ENV_VAR: &str = "HOST";
pub const PORT_ENV_VAR: &str = "PORT";
pub const STORE_URL_ENV_VAR: &str = "STORE_URL";
pub const STORE_TOKEN_ENV_VAR: &str = "STORE_TOKEN";
pub const DEFAULT_TARGET_STORAGE_ENV_VAR: &str = "DEFAULT_TARGET_STORAGE";
pub const FFMPEG_PATH_ENV_VAR: &str = "FFMPEG_PATH";
pub const FFPROBE_PATH_ENV_VAR: &str = "FFPROBE_PATH";
pub const ENCODER_TIMEOUT_ENV_VAR: &str = "ENCODER_TIMEOUT_SECS";
pub const PROBE_TIMEOUT_ENV_VAR: &str = "PROBE_TIMEOUT_SECS";
pub const TEMP_DIR_ENV_VAR: &str = "TEMP_DIR";
pub const LEASE_STALE_ENV_VAR: &str = "LEASE_STALE_SECS";

// Defaults
pub const DEFAULT_VALKEY_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "8055";
pub const DEFAULT_TARGET_STORAGE: &str = "local";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_FFPROBE: &str = "ffprobe";
pub const DEFAULT_TEMP_DIR: &str = "temp_downloads";
pub const DEFAULT_LEASE_STALE_SECS: u64 = 6 * 60 * 60;

/// Raw key/value view over the worker's configuration source.
///
/// Storage locations are resolved lazily through this lookup because their
/// key names depend on the location name (`STORAGE_<NAME>_ROOT`).
pub type ConfigLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Everything the pipeline needs from the environment, read once at startup.
pub struct WorkerConfig {
    pub valkey_url: String,
    pub storage_locations: Vec<String>,
    pub public_url: Option<String>,
    pub host: String,
    pub port: String,
    pub store_url: Option<String>,
    pub store_token: Option<String>,
    pub default_target_storage: String,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub encoder_timeout: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub temp_dir: PathBuf,
    pub lease_stale_after: Duration,
    lookup: Box<ConfigLookup>,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("valkey_url", &self.valkey_url)
            .field("storage_locations", &self.storage_locations)
            .field("public_url", &self.public_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store_url", &self.store_url)
            .field("store_token", &self.store_token.as_ref().map(|_| "<redacted>"))
            .field("default_target_storage", &self.default_target_storage)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("ffprobe_path", &self.ffprobe_path)
            .field("encoder_timeout", &self.encoder_timeout)
            .field("probe_timeout", &self.probe_timeout)
            .field("temp_dir", &self.temp_dir)
            .field("lease_stale_after", &self.lease_stale_after)
            .finish()
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_locations = get(STORAGE_LOCATIONS_ENV_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let valkey_url = get(VALKEY_URL_ENV_VAR).unwrap_or_else(|| DEFAULT_VALKEY_URL.to_string());
        let public_url = get(PUBLIC_URL_ENV_VAR);
        let host = get(HOST_ENV_VAR).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = get(PORT_ENV_VAR).unwrap_or_else(|| DEFAULT_PORT.to_string());
        let store_url = get(STORE_URL_ENV_VAR);
        let store_token = get(STORE_TOKEN_ENV_VAR);
        let default_target_storage = get(DEFAULT_TARGET_STORAGE_ENV_VAR)
            .unwrap_or_else(|| DEFAULT_TARGET_STORAGE.to_string());
        let ffmpeg_path =
            PathBuf::from(get(FFMPEG_PATH_ENV_VAR).unwrap_or_else(|| DEFAULT_FFMPEG.to_string()));
        let ffprobe_path =
            PathBuf::from(get(FFPROBE_PATH_ENV_VAR).unwrap_or_else(|| DEFAULT_FFPROBE.to_string()));
        let encoder_timeout = parse_secs(ENCODER_TIMEOUT_ENV_VAR, get(ENCODER_TIMEOUT_ENV_VAR));
        let probe_timeout = parse_secs(PROBE_TIMEOUT_ENV_VAR, get(PROBE_TIMEOUT_ENV_VAR));
        let temp_dir =
            PathBuf::from(get(TEMP_DIR_ENV_VAR).unwrap_or_else(|| DEFAULT_TEMP_DIR.to_string()));
        let lease_stale_after = parse_secs(LEASE_STALE_ENV_VAR, get(LEASE_STALE_ENV_VAR))
            .unwrap_or(Duration::from_secs(DEFAULT_LEASE_STALE_SECS));

        WorkerConfig {
            valkey_url,
            storage_locations,
            public_url,
            host,
            port,
            store_url,
            store_token,
            default_target_storage,
            ffmpeg_path,
            ffprobe_path,
            encoder_timeout,
            probe_timeout,
            temp_dir,
            lease_stale_after,
            lookup: Box::new(lookup),
        }
    }

    /// Looks up a raw configuration key. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Base URL for fetching stored assets over HTTP.
    ///
    /// `PUBLIC_URL` wins when it parses as an absolute http(s) URL; otherwise
    /// the worker falls back to `http://HOST:PORT`.
    pub fn public_base_url(&self) -> String {
        if let Some(raw) = &self.public_url {
            match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
                    return raw.trim_end_matches('/').to_string();
                }
                _ => warn!(
                    "{} is malformed ({:?}), falling back to host and port",
                    PUBLIC_URL_ENV_VAR, raw
                ),
            }
        }
        format!("http://{}:{}", self.host, self.port)
    }

    /// Base URL for the store's REST API.
    pub fn store_base_url(&self) -> String {
        self.store_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.public_base_url())
    }
}

fn parse_secs(key: &str, raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!("Ignoring invalid {} value {:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn config_from_pairs(pairs: &[(&str, &str)]) -> WorkerConfig {
    let map: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    WorkerConfig::from_lookup(move |key| map.get(key).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from_pairs(&[]);
        assert_eq!(config.valkey_url, DEFAULT_VALKEY_URL);
        assert_eq!(config.default_target_storage, "local");
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.encoder_timeout.is_none());
        assert_eq!(config.public_base_url(), "http://127.0.0.1:8055");
    }

    #[test]
    fn public_url_is_trimmed() {
        let config = config_from_pairs(&[("PUBLIC_URL", "https://cms.example.com/")]);
        assert_eq!(config.public_base_url(), "https://cms.example.com");
        assert_eq!(config.store_base_url(), "https://cms.example.com");
    }

    #[test]
    fn malformed_public_url_falls_back_to_host_port() {
        let config = config_from_pairs(&[
            ("PUBLIC_URL", "/relative/only"),
            ("HOST", "10.0.0.5"),
            ("PORT", "9000"),
        ]);
        assert_eq!(config.public_base_url(), "http://10.0.0.5:9000");
    }

    #[test]
    fn timeouts_parse_and_zero_disables() {
        let config = config_from_pairs(&[
            ("ENCODER_TIMEOUT_SECS", "3600"),
            ("PROBE_TIMEOUT_SECS", "0"),
        ]);
        assert_eq!(config.encoder_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.probe_timeout, None);
    }

    #[test]
    fn storage_locations_split_on_commas() {
        let config = config_from_pairs(&[("STORAGE_LOCATIONS", "local, s3 ,")]);
        assert_eq!(config.storage_locations, vec!["local", "s3"]);
    }
}
