use crate::Backend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One YAML document describing a whole migration: run-wide settings plus
/// the two cloud installations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaulConfig {
    pub migrate: MigrateConfig,
    pub src: CloudConfig,
    pub dst: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Namespaces remote temp files so concurrent runs cannot collide.
    /// Generated fresh when absent from the config file.
    #[serde(default = "new_run_id")]
    pub run_id: String,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_max_wait")]
    pub poll_max_wait_secs: u64,
}

impl MigrateConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.poll_max_wait_secs),
        }
    }

    /// Remote temp path for one instance's working file, namespaced by run.
    pub fn temp_path(&self, temp_dir: &str, instance_id: &str, suffix: &str) -> String {
        let dir = temp_dir.trim_end_matches('/');
        format!(
            "{dir}/{prefix}{run}-{instance_id}{suffix}",
            prefix = self.temp_prefix,
            run = self.run_id
        )
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            run_id: new_run_id(),
            ssh_user: None,
            key_file: None,
            dry_run: false,
            temp_prefix: default_temp_prefix(),
            poll_interval_secs: default_poll_interval(),
            poll_max_wait_secs: default_poll_max_wait(),
        }
    }
}

/// Interval and deadline for every poll-until-status loop. A poll that
/// exceeds `max_wait` fails with a timeout instead of looping forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Controller host commands are issued against.
    pub host: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    pub compute_backend: Backend,
    pub storage_backend: Backend,
    #[serde(default = "default_pool")]
    pub replicated_pool: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl CloudConfig {
    /// Environment prefix for commands that talk to the cloud's own
    /// services from one of its hosts.
    pub fn auth_env(&self) -> String {
        format!(
            "OS_AUTH_URL='{url}' OS_USERNAME='{user}' OS_PASSWORD='{password}' OS_PROJECT_NAME='{project}'",
            url = self.auth.auth_url,
            user = self.auth.user,
            password = self.auth.password,
            project = self.auth.project,
        )
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub auth_url: String,
}

impl HaulConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: HaulConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migrate.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.migrate.poll_max_wait_secs < self.migrate.poll_interval_secs {
            return Err(ConfigError::Invalid(
                "poll_max_wait_secs must be at least the poll interval".to_string(),
            ));
        }
        for (label, cloud) in [("src", &self.src), ("dst", &self.dst)] {
            if cloud.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{label}.host is empty")));
            }
        }
        Ok(())
    }
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn default_temp_prefix() -> String {
    "temp".to_string()
}

fn default_temp_dir() -> String {
    "/tmp".to_string()
}

fn default_pool() -> String {
    "compute".to_string()
}

fn default_poll_interval() -> u64 {
    3
}

fn default_poll_max_wait() -> u64 {
    600
}
