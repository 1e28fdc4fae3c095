pub mod identity_sync;
pub mod pipeline;

pub use identity_sync::{sync_identity, IdentitySyncReport};
pub use pipeline::{Committed, DiffPipeline, RawDisk, Rebased};

use chrono::{DateTime, Utc};
use haul_cloud::{Cloud, CloudError, SearchOpts, StatusAction};
use haul_core::{Backend, BootSource, DiskKind, MigrateConfig, MigrationInfo, RecordError};
use haul_remote::RemoteError;
use haul_transport::convert::{BARE, RAW};
use haul_transport::{
    ConvertError, FileToFileTransport, FileToImage, ImageToFile, ReplicatedToFileTransport,
    TransportError, TransportTask, Transporter, TransporterTable,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    /// The source system performs no disk transport for volume-booted
    /// instances and product intent is unconfirmed; fail fast instead of
    /// guessing.
    #[error("volume-booted instance {instance}: migration path not implemented")]
    VolumeBootUnsupported { instance: String },
}

/// Milestones of one instance migration, in the order they completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classified,
    ImageTransported,
    DiffMerged,
    Deployed,
    EphemeralCopied,
    Started,
}

#[derive(Debug, Clone)]
pub struct TransportReport {
    pub instance_id: String,
    pub stages: Vec<Stage>,
    pub new_id: Option<String>,
    pub new_image_id: Option<String>,
}

impl TransportReport {
    fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            stages: Vec::new(),
            new_id: None,
            new_image_id: None,
        }
    }

    fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// First failed instance aborts the whole batch.
    AbortOnError,
    /// A failed instance is recorded and the batch moves on.
    ContinueOnError,
}

#[derive(Debug)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub migrated: Vec<TransportReport>,
    pub failed: Vec<(String, MigrateError)>,
}

/// Top-level state machine for one instance: classifies the boot source and
/// backend pair, drives transporters and converters, then the destination
/// lifecycle. Migrations run strictly one instance at a time; later steps
/// read record fields earlier steps wrote.
pub struct InstanceTransport<'a> {
    migrate: &'a MigrateConfig,
    src: &'a Cloud,
    dst: &'a Cloud,
    table: &'a TransporterTable,
}

impl<'a> InstanceTransport<'a> {
    pub fn new(
        migrate: &'a MigrateConfig,
        src: &'a Cloud,
        dst: &'a Cloud,
        table: &'a TransporterTable,
    ) -> Self {
        Self {
            migrate,
            src,
            dst,
            table,
        }
    }

    pub fn run(
        &self,
        info: &mut MigrationInfo,
        instance_id: &str,
    ) -> Result<TransportReport, MigrateError> {
        let mut report = TransportReport::new(instance_id);
        let src_backend = self.src.config.compute_backend;
        let dst_backend = self.dst.config.storage_backend;

        let entry = info.instance(instance_id)?;
        let boot = entry.boot_source()?;
        let is_ephemeral = entry.body.is_ephemeral;
        info!(
            instance = instance_id,
            ?boot,
            is_ephemeral,
            %src_backend,
            %dst_backend,
            "classified instance"
        );
        report.push(Stage::Classified);

        // Any route that will consult the routing table resolves it up
        // front: an unroutable pair must fail before any data moves.
        let needs_table = is_ephemeral
            || (matches!(boot, BootSource::Image(_))
                && src_backend == Backend::File
                && dst_backend == Backend::File);
        if needs_table {
            self.table.resolve(src_backend, dst_backend)?;
        }

        match boot {
            BootSource::Image(image_id) => {
                if src_backend == Backend::Replicated {
                    self.transport_image(info, instance_id)?;
                    report.push(Stage::ImageTransported);
                    self.deploy(info, instance_id)?;
                    report.push(Stage::Deployed);
                } else {
                    match dst_backend {
                        Backend::Replicated => {
                            self.transport_diff_and_merge(info, instance_id, &image_id)?;
                            report.push(Stage::DiffMerged);
                            self.deploy(info, instance_id)?;
                            report.push(Stage::Deployed);
                        }
                        Backend::File => {
                            // Deploy first so a destination-side diff path
                            // exists to copy into.
                            self.deploy(info, instance_id)?;
                            report.push(Stage::Deployed);
                            self.copy_disk(info, instance_id, DiskKind::Diff)?;
                        }
                    }
                }
            }
            BootSource::Volume(_) => {
                return Err(MigrateError::VolumeBootUnsupported {
                    instance: instance_id.to_string(),
                });
            }
        }

        if is_ephemeral {
            self.copy_disk(info, instance_id, DiskKind::Ephemeral)?;
            report.push(Stage::EphemeralCopied);
        }

        self.start(info, instance_id)?;
        report.push(Stage::Started);

        let entry = info.instance(instance_id)?;
        report.new_id = entry.meta.new_id.clone();
        report.new_image_id = entry.meta.new_image_id.clone();
        Ok(report)
    }

    pub fn migrate_batch(
        &self,
        info: &mut MigrationInfo,
        instance_ids: &[String],
        policy: BatchPolicy,
    ) -> Result<BatchReport, MigrateError> {
        let started_at = Utc::now();
        let mut migrated = Vec::new();
        let mut failed = Vec::new();
        for instance_id in instance_ids {
            match self.run(info, instance_id) {
                Ok(report) => migrated.push(report),
                Err(err) => match policy {
                    BatchPolicy::AbortOnError => return Err(err),
                    BatchPolicy::ContinueOnError => {
                        warn!(instance = %instance_id, error = %err, "instance migration abandoned");
                        failed.push((instance_id.clone(), err));
                    }
                },
            }
        }
        Ok(BatchReport {
            started_at,
            finished_at: Utc::now(),
            migrated,
            failed,
        })
    }

    fn task<'t>(&'t self, instance_id: &'t str, disk: DiskKind) -> TransportTask<'t> {
        TransportTask {
            migrate: self.migrate,
            src: self.src,
            dst: self.dst,
            instance_id,
            disk,
        }
    }

    /// Replicated source: export the boot disk to a destination-side file,
    /// promote it to a destination image, and note the new id on the record.
    fn transport_image(
        &self,
        info: &mut MigrationInfo,
        instance_id: &str,
    ) -> Result<(), MigrateError> {
        let path_dst = self
            .migrate
            .temp_path(&self.dst.config.temp_dir, instance_id, "");
        info.instance_mut(instance_id)?.diff.path_dst = Some(path_dst.clone());

        ReplicatedToFileTransport.run(&self.task(instance_id, DiskKind::Diff), info)?;
        let new_image_id = FileToImage.run(
            self.dst,
            &path_dst,
            &format!("{instance_id}-image"),
            RAW,
            BARE,
        )?;
        info.instance_mut(instance_id)?.meta.new_image_id = Some(new_image_id);
        Ok(())
    }

    /// File source, replicated destination: make the diff self-contained by
    /// merging it onto its base, then upload the merged disk as a new image.
    fn transport_diff_and_merge(
        &self,
        info: &mut MigrationInfo,
        instance_id: &str,
        image_id: &str,
    ) -> Result<(), MigrateError> {
        let base_file = self
            .migrate
            .temp_path(&self.dst.config.temp_dir, instance_id, "_base");
        let diff_file = self
            .migrate
            .temp_path(&self.dst.config.temp_dir, instance_id, "");
        info.instance_mut(instance_id)?.diff.path_dst = Some(diff_file.clone());

        ImageToFile.run(self.dst, self.src, image_id, &base_file)?;
        FileToFileTransport.run(&self.task(instance_id, DiskKind::Diff), info)?;

        let raw = DiffPipeline::new(&self.dst.session, &base_file, &diff_file)
            .rebase()?
            .commit()?
            .convert_to_raw()?;

        let new_image_id = FileToImage.run(
            self.dst,
            raw.path(),
            &format!("{instance_id}-image"),
            RAW,
            BARE,
        )?;
        info.instance_mut(instance_id)?.meta.new_image_id = Some(new_image_id);
        Ok(())
    }

    fn copy_disk(
        &self,
        info: &MigrationInfo,
        instance_id: &str,
        disk: DiskKind,
    ) -> Result<(), MigrateError> {
        let transporter = self.table.resolve(
            self.src.config.compute_backend,
            self.dst.config.storage_backend,
        )?;
        info!(instance = instance_id, %disk, transporter = transporter.label(), "copying disk");
        transporter.run(&self.task(instance_id, disk), info)?;
        Ok(())
    }

    /// Create the destination instance, learn its disk paths, and stop the
    /// source so its disks stop changing under the copy.
    fn deploy(&self, info: &mut MigrationInfo, instance_id: &str) -> Result<(), MigrateError> {
        let new_id = self.dst.compute.deploy(info, instance_id)?;
        info!(instance = instance_id, new_id, "deployed destination instance");
        info.instance_mut(instance_id)?.meta.new_id = Some(new_id.clone());

        let dst_info = self.dst.compute.read_info(&SearchOpts::by_id(&new_id))?;
        let dst_entry = dst_info.instance(&new_id)?;
        let ephemeral_path = dst_entry.ephemeral.path_src.clone();
        let diff_path = dst_entry.diff.path_src.clone();

        let entry = info.instance_mut(instance_id)?;
        entry.ephemeral.path_dst = ephemeral_path;
        entry.diff.path_dst = diff_path;

        self.src
            .compute
            .change_status(StatusAction::Stop, instance_id)?;
        Ok(())
    }

    fn start(&self, info: &MigrationInfo, instance_id: &str) -> Result<(), MigrateError> {
        let new_id = info.instance(instance_id)?.require_new_id()?;
        self.dst.compute.change_status(StatusAction::Start, new_id)?;
        info!(instance = instance_id, new_id, "destination instance started");
        Ok(())
    }
}
