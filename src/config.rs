use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::metadata;
use crate::objects;
use crate::Result;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub metadata: MetadataBackend,
    pub files: FilesBackend,
    #[serde(default)]
    pub deletion: DeletionConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Ok(serde_yaml::from_str(&s)?)
    }
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum MetadataBackend {
    Postgres(metadata::PostgresConfig),
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum FilesBackend {
    S3(objects::S3Config),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeletionConfig {
    /// Address OCI versions by manifest digest instead of by tag.
    #[serde(default)]
    pub untagged_images_enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub accounts: Vec<String>,
}

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

fn default_retention_hours() -> u64 {
    24 * 30
}

fn default_interval_seconds() -> u64 {
    60 * 60
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            interval_seconds: default_interval_seconds(),
            accounts: Vec::new(),
        }
    }
}

impl PurgeConfig {
    pub fn retention(&self) -> chrono::Duration {
        // clamped to a century so the cutoff arithmetic cannot overflow
        let hours = self.retention_hours.min(MAX_RETENTION_HOURS);
        chrono::Duration::hours(i64::try_from(hours).unwrap_or_default())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}
