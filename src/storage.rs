use std::fmt;
use std::path::PathBuf;

use log::warn;
use serde::Serialize;

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};

pub const LOCAL_DRIVER: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Local,
    Remote,
}

impl StorageDriver {
    fn from_config_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case(LOCAL_DRIVER) {
            StorageDriver::Local
        } else {
            StorageDriver::Remote
        }
    }

    pub fn is_remote(self) -> bool {
        self == StorageDriver::Remote
    }
}

impl fmt::Display for StorageDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageDriver::Local => f.write_str("local"),
            StorageDriver::Remote => f.write_str("remote"),
        }
    }
}

/// A named storage location with its configured root and driver class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub name: String,
    pub root: PathBuf,
    pub driver: StorageDriver,
}

impl StorageLocation {
    /// Absolute directory for a local location: the process working
    /// directory joined with the configured root.
    pub fn local_dir(&self) -> PipelineResult<PathBuf> {
        let cwd = std::env::current_dir().map_err(|e| PipelineError::io(".", e))?;
        Ok(cwd.join(&self.root))
    }
}

fn env_key(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

pub fn root_key(name: &str) -> String {
    format!("STORAGE_{}_ROOT", env_key(name))
}

pub fn driver_key(name: &str) -> String {
    format!("STORAGE_{}_DRIVER", env_key(name))
}

/// Resolves a storage-location name to its root path and driver.
///
/// The root key is mandatory. A missing driver key is tolerated for older
/// configurations and treated as a local location.
pub fn resolve_storage(config: &WorkerConfig, name: &str) -> PipelineResult<StorageLocation> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PipelineError::Configuration(
            "storage location name is empty".to_string(),
        ));
    }

    if !config.storage_locations.is_empty()
        && !config.storage_locations.iter().any(|l| l == name)
    {
        return Err(PipelineError::Configuration(format!(
            "storage location '{}' is not listed in STORAGE_LOCATIONS",
            name
        )));
    }

    let root = config.get(&root_key(name)).ok_or_else(|| {
        PipelineError::Configuration(format!(
            "storage location '{}' has no {} configured",
            name,
            root_key(name)
        ))
    })?;

    let driver = match config.get(&driver_key(name)) {
        Some(value) => StorageDriver::from_config_value(&value),
        None => {
            warn!(
                "Storage location '{}' has no {} set, assuming local driver",
                name,
                driver_key(name)
            );
            StorageDriver::Local
        }
    };

    Ok(StorageLocation {
        name: name.to_string(),
        root: PathBuf::from(root),
        driver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_from_pairs;

    #[test]
    fn resolves_local_location() {
        let config = config_from_pairs(&[
            ("STORAGE_LOCAL_ROOT", "./uploads"),
            ("STORAGE_LOCAL_DRIVER", "local"),
        ]);
        let location = resolve_storage(&config, "local").unwrap();
        assert_eq!(location.root, PathBuf::from("./uploads"));
        assert_eq!(location.driver, StorageDriver::Local);
    }

    #[test]
    fn any_non_local_driver_is_remote() {
        let config = config_from_pairs(&[
            ("STORAGE_MEDIA_BUCKET_ROOT", "videos"),
            ("STORAGE_MEDIA_BUCKET_DRIVER", "s3"),
        ]);
        let location = resolve_storage(&config, "media-bucket").unwrap();
        assert_eq!(location.driver, StorageDriver::Remote);
        assert!(location.driver.is_remote());
    }

    #[test]
    fn missing_driver_defaults_to_local() {
        let config = config_from_pairs(&[("STORAGE_ARCHIVE_ROOT", "/srv/archive")]);
        let location = resolve_storage(&config, "archive").unwrap();
        assert_eq!(location.driver, StorageDriver::Local);
    }

    #[test]
    fn missing_root_is_configuration_error() {
        let config = config_from_pairs(&[("STORAGE_ARCHIVE_DRIVER", "local")]);
        let err = resolve_storage(&config, "archive").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn unlisted_location_is_rejected_when_catalog_is_set() {
        let config = config_from_pairs(&[
            ("STORAGE_LOCATIONS", "local"),
            ("STORAGE_S3_ROOT", "bucket"),
        ]);
        assert!(matches!(
            resolve_storage(&config, "s3"),
            Err(PipelineError::Configuration(_))
        ));
    }
}
