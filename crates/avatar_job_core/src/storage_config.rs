use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const ACCESS_KEY_ID_VAR: &str = "RUNPOD_S3_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "RUNPOD_S3_SECRET_ACCESS_KEY";
pub const DATACENTER_VAR: &str = "RUNPOD_DATACENTER";
pub const NETWORK_VOLUME_ID_VAR: &str = "RUNPOD_NETWORK_VOLUME_ID";
pub const REQUEST_TIMEOUT_VAR: &str = "RUNPOD_S3_TIMEOUT_SECS";

/// Large checkpoint transfers can take a long time on a single request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 7_200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported datacenter: {datacenter}. Supported: {supported}")]
    UnsupportedDatacenter {
        datacenter: String,
        supported: String,
    },
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Storage regions that expose the S3-compatible network volume API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datacenter {
    #[serde(rename = "EUR-IS-1")]
    EurIs1,
    #[serde(rename = "EU-RO-1")]
    EuRo1,
    #[serde(rename = "EU-CZ-1")]
    EuCz1,
    #[serde(rename = "US-KS-2")]
    UsKs2,
}

impl Datacenter {
    pub const ALL: [Datacenter; 4] = [Self::EurIs1, Self::EuRo1, Self::EuCz1, Self::UsKs2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EurIs1 => "EUR-IS-1",
            Self::EuRo1 => "EU-RO-1",
            Self::EuCz1 => "EU-CZ-1",
            Self::UsKs2 => "US-KS-2",
        }
    }

    pub fn endpoint_url(self) -> &'static str {
        match self {
            Self::EurIs1 => "https://s3api-eur-is-1.runpod.io/",
            Self::EuRo1 => "https://s3api-eu-ro-1.runpod.io/",
            Self::EuCz1 => "https://s3api-eu-cz-1.runpod.io/",
            Self::UsKs2 => "https://s3api-us-ks-2.runpod.io/",
        }
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|datacenter| datacenter.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datacenter {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|datacenter| datacenter.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnsupportedDatacenter {
                datacenter: value.to_string(),
                supported: Self::supported_list(),
            })
    }
}

/// Credentials and addressing for one network volume. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    access_key_id: String,
    secret_access_key: String,
    datacenter: Datacenter,
    bucket_id: String,
    request_timeout_secs: u64,
}

impl StorageConfig {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        datacenter: &str,
        bucket_id: impl Into<String>,
        request_timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let access_key_id = non_empty(access_key_id.into(), "access_key_id")?;
        let secret_access_key = non_empty(secret_access_key.into(), "secret_access_key")?;
        let bucket_id = non_empty(bucket_id.into(), "network_volume_id")?;
        let datacenter = datacenter.parse::<Datacenter>()?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "request_timeout_secs",
                value: request_timeout_secs.to_string(),
            });
        }

        Ok(Self {
            access_key_id,
            secret_access_key,
            datacenter,
            bucket_id,
            request_timeout_secs,
        })
    }

    /// Builds a config from named variables. Every required variable that is
    /// missing or blank is reported in a single error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let access_key_id = read(ACCESS_KEY_ID_VAR);
        let secret_access_key = read(SECRET_ACCESS_KEY_VAR);
        let datacenter = read(DATACENTER_VAR);
        let network_volume_id = read(NETWORK_VOLUME_ID_VAR);

        let missing: Vec<String> = [
            (ACCESS_KEY_ID_VAR, access_key_id.is_none()),
            (SECRET_ACCESS_KEY_VAR, secret_access_key.is_none()),
            (DATACENTER_VAR, datacenter.is_none()),
            (NETWORK_VOLUME_ID_VAR, network_volume_id.is_none()),
        ]
        .into_iter()
        .filter(|(_, is_missing)| *is_missing)
        .map(|(name, _)| name.to_string())
        .collect();

        let (Some(access_key_id), Some(secret_access_key), Some(datacenter), Some(bucket_id)) =
            (access_key_id, secret_access_key, datacenter, network_volume_id)
        else {
            return Err(ConfigError::MissingVariables(missing));
        };

        let request_timeout_secs = match read(REQUEST_TIMEOUT_VAR) {
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: REQUEST_TIMEOUT_VAR,
                    value,
                })?,
        };

        Self::new(
            access_key_id,
            secret_access_key,
            &datacenter,
            bucket_id,
            request_timeout_secs,
        )
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn datacenter(&self) -> Datacenter {
        self.datacenter
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    pub fn endpoint_url(&self) -> &'static str {
        self.datacenter.endpoint_url()
    }

    /// The datacenter id doubles as the signing region.
    pub fn region(&self) -> &'static str {
        self.datacenter.as_str()
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("datacenter", &self.datacenter)
            .field("bucket_id", &self.bucket_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn non_empty(value: String, field: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Volume-level statistics reported by the storage client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageInfo {
    pub datacenter: String,
    pub network_volume_id: String,
    pub endpoint_url: String,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub total_size_gb: f64,
}

impl StorageInfo {
    pub fn summarize(config: &StorageConfig, object_sizes: impl IntoIterator<Item = u64>) -> Self {
        let mut total_files = 0usize;
        let mut total_size_bytes = 0u64;
        for size in object_sizes {
            total_files += 1;
            total_size_bytes = total_size_bytes.saturating_add(size);
        }
        let gigabytes = total_size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        Self {
            datacenter: config.datacenter().to_string(),
            network_volume_id: config.bucket_id().to_string(),
            endpoint_url: config.endpoint_url().to_string(),
            total_files,
            total_size_bytes,
            total_size_gb: (gigabytes * 100.0).round() / 100.0,
        }
    }
}
