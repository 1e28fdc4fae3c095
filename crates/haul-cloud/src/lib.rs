pub mod identity;
pub mod poll;

pub use poll::wait_for_image_status;

use haul_core::{Backend, CloudConfig, ImageEntry, MigrationInfo, RecordError};
use haul_remote::{RemoteError, RemoteSession};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("required capability {capability} is unavailable on this storage adapter")]
    UnsupportedCapability { capability: Capability },
    #[error("{resource} never reached status {status:?} within {waited:?}")]
    StatusTimeout {
        resource: String,
        status: String,
        waited: Duration,
    },
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Optional adapter operations, declared at construction time so missing
/// ones fail before any work starts instead of mid-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The storage service can export a volume into the image service.
    VolumeUpload,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::VolumeUpload => "volume-upload",
        })
    }
}

/// Lifecycle transitions the compute control plane accepts. Requesting the
/// status an instance is already in is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Start,
    Stop,
    Resume,
    Pause,
    Unpause,
    Suspend,
}

impl StatusAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusAction::Start => "start",
            StatusAction::Stop => "stop",
            StatusAction::Resume => "resume",
            StatusAction::Pause => "pause",
            StatusAction::Unpause => "unpause",
            StatusAction::Suspend => "suspend",
        }
    }
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrowing criteria for compute lookups.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchOpts {
    pub id: Option<String>,
}

impl SearchOpts {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

/// Narrowing criteria for volume lookups.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VolumeCriteria {
    pub ids: Vec<String>,
    pub bootable_only: bool,
}

#[derive(Debug, Clone)]
pub struct VolumeUpload {
    pub response: serde_json::Value,
    pub image_id: String,
}

pub trait ComputeAdapter: Send + Sync {
    /// Create the destination instance described by the record entry and
    /// return its destination-side id. When the entry carries
    /// `meta.new_image_id`, implementations must boot from that image, not
    /// from `body.image_id`: the latter names a source-side image that the
    /// destination image service may not know.
    fn deploy(&self, info: &MigrationInfo, instance_id: &str) -> Result<String, CloudError>;

    fn read_info(&self, search: &SearchOpts) -> Result<MigrationInfo, CloudError>;

    fn change_status(&self, action: StatusAction, instance_id: &str) -> Result<(), CloudError>;
}

pub trait StorageAdapter: Send + Sync {
    fn read_info(&self, criteria: &VolumeCriteria) -> Result<MigrationInfo, CloudError>;

    fn upload_volume_to_image(
        &self,
        volume_id: &str,
        force: bool,
        image_name: &str,
        container_format: &str,
        disk_format: &str,
    ) -> Result<VolumeUpload, CloudError>;

    fn has_capability(&self, capability: Capability) -> bool;

    fn backend(&self) -> Backend;
}

pub trait ImageAdapter: Send + Sync {
    fn status(&self, image_id: &str) -> Result<String, CloudError>;

    /// Stamp backend-specific metadata onto a freshly created image.
    fn patch_image(&self, backend: Backend, image_id: &str) -> Result<(), CloudError>;

    fn read_info(&self, image_id: &str) -> Result<ImageEntry, CloudError>;
}

/// One cloud installation as the orchestrator sees it: its configuration,
/// its control-plane adapters, and a shell session on its controller host.
/// Adapter handles are shared and must be safe for concurrent use.
#[derive(Clone)]
pub struct Cloud {
    pub config: CloudConfig,
    pub compute: Arc<dyn ComputeAdapter>,
    pub storage: Arc<dyn StorageAdapter>,
    pub image: Arc<dyn ImageAdapter>,
    pub session: RemoteSession,
}

impl Cloud {
    pub fn new(
        config: CloudConfig,
        compute: Arc<dyn ComputeAdapter>,
        storage: Arc<dyn StorageAdapter>,
        image: Arc<dyn ImageAdapter>,
        session: RemoteSession,
    ) -> Self {
        Self {
            config,
            compute,
            storage,
            image,
            session,
        }
    }

    /// Probe a storage capability up front, failing fast when absent.
    pub fn require_storage_capability(&self, capability: Capability) -> Result<(), CloudError> {
        if self.storage.has_capability(capability) {
            Ok(())
        } else {
            Err(CloudError::UnsupportedCapability { capability })
        }
    }
}
