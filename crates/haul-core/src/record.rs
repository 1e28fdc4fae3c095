use crate::DiskKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A later step read a field an earlier step never wrote. This always means
/// an ordering invariant broke; it must surface as a typed error instead of
/// a missing-key fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown instance in migration record: {0}")]
    UnknownInstance(String),
    #[error("instance {instance}: destination id read before deploy")]
    NewIdUnset { instance: String },
    #[error("instance {instance}: {disk} {side} path read before it was written")]
    PathUnset {
        instance: String,
        disk: DiskKind,
        side: PathSide,
    },
    #[error("instance {instance}: exactly one of image/volume boot source must be set")]
    AmbiguousBootSource { instance: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSide {
    Src,
    Dst,
}

impl std::fmt::Display for PathSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PathSide::Src => "source",
            PathSide::Dst => "destination",
        })
    }
}

/// What an instance boots from. The two are mutually exclusive on the wire;
/// `InstanceEntry::boot_source` enforces that instead of silently picking one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSource {
    Image(String),
    Volume(String),
}

/// Root aggregate for one migration run: resource domain -> collection ->
/// source id -> entry. Exclusively owned by the run that migrates it.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    #[serde(default)]
    pub compute: ComputeSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub image: ImageSection,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ComputeSection {
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceEntry>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeEntry>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImageSection {
    #[serde(default)]
    pub images: BTreeMap<String, ImageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub body: InstanceBody,
    #[serde(default)]
    pub ephemeral: DiskPaths,
    #[serde(default)]
    pub diff: DiskPaths,
    #[serde(default)]
    pub meta: InstanceMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceBody {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Hypervisor the instance's disks live on; falls back to the cloud's
    /// controller host when absent.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub volume_id: Option<String>,
    #[serde(default)]
    pub is_ephemeral: bool,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// Filesystem paths of one disk on the source and destination hosts.
/// `path_dst` exists only after the destination instance has been deployed
/// and its record fetched.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DiskPaths {
    #[serde(default)]
    pub path_src: Option<String>,
    #[serde(default)]
    pub path_dst: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InstanceMeta {
    /// Destination-side identifier, written once by deploy.
    #[serde(default)]
    pub new_id: Option<String>,
    /// Destination image produced for this instance's boot disk, when the
    /// chosen route creates one.
    #[serde(default)]
    pub new_image_id: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub body: VolumeBody,
    #[serde(default)]
    pub meta: VolumeMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeBody {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub size_gb: Option<u64>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub body: ImageBody,
    #[serde(default)]
    pub meta: ImageMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBody {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub disk_format: Option<String>,
    #[serde(default)]
    pub container_format: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Originating volume when the image was produced by a volume export,
    /// so downstream steps can trace provenance.
    #[serde(default)]
    pub volume: Option<VolumeBody>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl MigrationInfo {
    pub fn instance(&self, id: &str) -> Result<&InstanceEntry, RecordError> {
        self.compute
            .instances
            .get(id)
            .ok_or_else(|| RecordError::UnknownInstance(id.to_string()))
    }

    pub fn instance_mut(&mut self, id: &str) -> Result<&mut InstanceEntry, RecordError> {
        self.compute
            .instances
            .get_mut(id)
            .ok_or_else(|| RecordError::UnknownInstance(id.to_string()))
    }
}

impl InstanceEntry {
    pub fn boot_source(&self) -> Result<BootSource, RecordError> {
        match (&self.body.image_id, &self.body.volume_id) {
            (Some(image), None) => Ok(BootSource::Image(image.clone())),
            (None, Some(volume)) => Ok(BootSource::Volume(volume.clone())),
            _ => Err(RecordError::AmbiguousBootSource {
                instance: self.body.id.clone(),
            }),
        }
    }

    pub fn disk(&self, kind: DiskKind) -> &DiskPaths {
        match kind {
            DiskKind::Ephemeral => &self.ephemeral,
            DiskKind::Diff => &self.diff,
        }
    }

    pub fn disk_mut(&mut self, kind: DiskKind) -> &mut DiskPaths {
        match kind {
            DiskKind::Ephemeral => &mut self.ephemeral,
            DiskKind::Diff => &mut self.diff,
        }
    }

    pub fn require_path_src(&self, kind: DiskKind) -> Result<&str, RecordError> {
        self.disk(kind)
            .path_src
            .as_deref()
            .ok_or_else(|| RecordError::PathUnset {
                instance: self.body.id.clone(),
                disk: kind,
                side: PathSide::Src,
            })
    }

    pub fn require_path_dst(&self, kind: DiskKind) -> Result<&str, RecordError> {
        self.disk(kind)
            .path_dst
            .as_deref()
            .ok_or_else(|| RecordError::PathUnset {
                instance: self.body.id.clone(),
                disk: kind,
                side: PathSide::Dst,
            })
    }

    pub fn require_new_id(&self) -> Result<&str, RecordError> {
        self.meta
            .new_id
            .as_deref()
            .ok_or_else(|| RecordError::NewIdUnset {
                instance: self.body.id.clone(),
            })
    }
}
