pub mod config;
pub mod record;

pub use config::{CloudConfig, ConfigError, HaulConfig, MigrateConfig, PollPolicy};
pub use record::{
    BootSource, ComputeSection, DiskPaths, ImageBody, ImageEntry, ImageMeta, ImageSection,
    InstanceBody, InstanceEntry, InstanceMeta, MigrationInfo, PathSide, RecordError,
    StorageSection, VolumeBody, VolumeEntry, VolumeMeta,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage backend family a disk lives on. The routing decision between
/// transporters is a function purely of the (source, destination) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Disks are objects in a distributed replication service; copies can
    /// happen backend-native without data leaving the storage cluster.
    Replicated,
    /// A disk is a plain file on a compute host's filesystem.
    File,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Replicated => "replicated",
            Backend::File => "file",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "replicated" => Ok(Backend::Replicated),
            "file" => Ok(Backend::File),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Which of an instance's two transportable disks an invocation targets.
/// Transporters must serve both and never assume which one was requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskKind {
    Ephemeral,
    Diff,
}

impl DiskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskKind::Ephemeral => "ephemeral",
            DiskKind::Diff => "diff",
        }
    }
}

impl fmt::Display for DiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
