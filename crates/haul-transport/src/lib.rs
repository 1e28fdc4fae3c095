pub mod convert;
pub mod transporters;

pub use convert::{ConvertError, FileToImage, ImageToFile, VolumeToImage};
pub use transporters::{
    replicated_object, FileToFileTransport, FileToReplicatedTransport,
    ReplicatedToFileTransport, ReplicatedToReplicatedTransport,
};

use haul_cloud::Cloud;
use haul_core::{Backend, DiskKind, MigrateConfig, MigrationInfo, RecordError};
use haul_remote::RemoteError;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// No transporter registered for a backend pair. Surfaced, never
    /// defaulted: the wrong transporter corrupts data.
    #[error("no transporter registered for backend pair {src} -> {dst}")]
    UnsupportedBackendPair { src: Backend, dst: Backend },
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("size mismatch after copy of {path}: source {src_bytes} bytes, destination {dst_bytes} bytes")]
    SizeMismatch {
        path: String,
        src_bytes: u64,
        dst_bytes: u64,
    },
    #[error("unparseable size probe for {path}: {output}")]
    SizeProbe { path: String, output: String },
}

/// Parameters of one transporter or converter invocation: the two cloud
/// handles, the instance, and which of its disks to move.
pub struct TransportTask<'a> {
    pub migrate: &'a MigrateConfig,
    pub src: &'a Cloud,
    pub dst: &'a Cloud,
    pub instance_id: &'a str,
    pub disk: DiskKind,
}

/// Moves one disk's raw data between clouds using the native primitive of
/// its backend pair. Implementations serve both the ephemeral and the diff
/// selector; failure of any remote command is fatal to the invocation.
pub trait Transporter: Send + Sync {
    fn run(&self, task: &TransportTask<'_>, info: &MigrationInfo) -> Result<(), TransportError>;

    fn label(&self) -> &'static str;
}

/// Immutable (source backend, destination backend) -> transporter map,
/// built once at startup.
pub struct TransporterTable {
    entries: BTreeMap<(Backend, Backend), Arc<dyn Transporter>>,
}

impl TransporterTable {
    pub fn builder() -> TransporterTableBuilder {
        TransporterTableBuilder {
            entries: BTreeMap::new(),
        }
    }

    /// The full pairing table: every combination of replicated and
    /// file-based backends.
    pub fn standard() -> Self {
        Self::builder()
            .register(
                Backend::Replicated,
                Backend::Replicated,
                Arc::new(ReplicatedToReplicatedTransport),
            )
            .register(
                Backend::Replicated,
                Backend::File,
                Arc::new(ReplicatedToFileTransport),
            )
            .register(
                Backend::File,
                Backend::Replicated,
                Arc::new(FileToReplicatedTransport),
            )
            .register(Backend::File, Backend::File, Arc::new(FileToFileTransport))
            .build()
    }

    pub fn resolve(
        &self,
        src: Backend,
        dst: Backend,
    ) -> Result<&Arc<dyn Transporter>, TransportError> {
        self.entries
            .get(&(src, dst))
            .ok_or(TransportError::UnsupportedBackendPair { src, dst })
    }
}

pub struct TransporterTableBuilder {
    entries: BTreeMap<(Backend, Backend), Arc<dyn Transporter>>,
}

impl TransporterTableBuilder {
    pub fn register(
        mut self,
        src: Backend,
        dst: Backend,
        transporter: Arc<dyn Transporter>,
    ) -> Self {
        self.entries.insert((src, dst), transporter);
        self
    }

    pub fn build(self) -> TransporterTable {
        TransporterTable {
            entries: self.entries,
        }
    }
}
