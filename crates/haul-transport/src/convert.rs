use haul_cloud::{wait_for_image_status, Capability, Cloud, CloudError};
use haul_core::{ImageSection, MigrationInfo, PollPolicy, RecordError};
use haul_remote::{cmd, RemoteError};
use thiserror::Error;
use tracing::{debug, info};

pub const ACTIVE: &str = "active";
pub const BARE: &str = "bare";
pub const RAW: &str = "raw";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("image service returned no id for uploaded file {path}")]
    MissingImageId { path: String },
}

/// Download an image-service artifact to a raw file on a named host. The
/// image service and the landing host may belong to different clouds, so
/// the owning cloud's credentials travel with the command.
pub struct ImageToFile;

impl ImageToFile {
    pub fn run(
        &self,
        target: &Cloud,
        image_cloud: &Cloud,
        image_id: &str,
        path: &str,
    ) -> Result<(), ConvertError> {
        info!(image_id, path, host = target.session.host(), "downloading image to file");
        target.session.execute(&cmd::image_download(
            &image_cloud.config.auth_env(),
            image_id,
            path,
        ))?;
        Ok(())
    }
}

/// Upload a file on the cloud's controller host as a new image in the
/// declared disk/container format, returning the new image id.
pub struct FileToImage;

impl FileToImage {
    pub fn run(
        &self,
        cloud: &Cloud,
        path: &str,
        image_name: &str,
        disk_format: &str,
        container_format: &str,
    ) -> Result<String, ConvertError> {
        info!(path, image_name, disk_format, "uploading file as image");
        let output = cloud.session.execute(&cmd::image_create(
            &cloud.config.auth_env(),
            image_name,
            path,
            disk_format,
            container_format,
        ))?;
        if cloud.session.is_dry_run() {
            return Ok(format!("dry-run-{image_name}"));
        }
        let image_id = output
            .stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| ConvertError::MissingImageId {
                path: path.to_string(),
            })?;
        Ok(image_id.to_string())
    }
}

/// Promote block-storage volumes to image-service artifacts, preserving
/// each volume's body on the resulting image record so provenance survives.
pub struct VolumeToImage {
    pub disk_format: String,
    pub container_format: String,
}

impl VolumeToImage {
    pub fn new(disk_format: impl Into<String>) -> Self {
        Self {
            disk_format: disk_format.into(),
            container_format: BARE.to_string(),
        }
    }

    pub fn run(
        &self,
        cloud: &Cloud,
        volumes: &MigrationInfo,
        policy: &PollPolicy,
    ) -> Result<ImageSection, ConvertError> {
        // Probed before any volume is touched, not discovered mid-loop.
        cloud.require_storage_capability(Capability::VolumeUpload)?;

        let mut images = ImageSection::default();
        for (volume_id, volume) in &volumes.storage.volumes {
            debug!(
                volume_id,
                name = volume.body.display_name.as_deref().unwrap_or_default(),
                bootable = volume.body.bootable,
                "uploading volume to image service"
            );
            let upload = cloud.storage.upload_volume_to_image(
                volume_id,
                true,
                volume_id,
                &self.container_format,
                &self.disk_format,
            )?;
            wait_for_image_status(cloud.image.as_ref(), &upload.image_id, ACTIVE, policy)?;
            cloud
                .image
                .patch_image(cloud.storage.backend(), &upload.image_id)?;
            let mut entry = cloud.image.read_info(&upload.image_id)?;
            entry.meta.volume = Some(volume.body.clone());
            entry
                .meta
                .extra
                .extend(volume.meta.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            images.images.insert(upload.image_id, entry);
        }
        Ok(images)
    }
}
