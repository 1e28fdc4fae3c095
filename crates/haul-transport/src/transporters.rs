use crate::{TransportError, TransportTask, Transporter};
use haul_core::{DiskKind, InstanceEntry, MigrationInfo};
use haul_remote::{cmd, RemoteSession};
use tracing::info;

/// Name of a disk's object in the replication service. Boot/diff disks and
/// ephemeral disks live under distinct suffixes of the instance id.
pub fn replicated_object(instance_id: &str, disk: DiskKind) -> String {
    match disk {
        DiskKind::Diff => format!("{instance_id}_disk"),
        DiskKind::Ephemeral => format!("{instance_id}_disk.local"),
    }
}

fn entry<'a>(
    task: &TransportTask<'_>,
    info: &'a MigrationInfo,
) -> Result<&'a InstanceEntry, TransportError> {
    Ok(info.instance(task.instance_id)?)
}

/// Host the source copy of the disk lives on; file-backed disks sit on the
/// hypervisor when the record names one.
fn source_host<'a>(task: &'a TransportTask<'_>, entry: &'a InstanceEntry) -> &'a str {
    entry.body.host.as_deref().unwrap_or(&task.src.config.host)
}

fn probe_size(session: &RemoteSession, path: &str) -> Result<u64, TransportError> {
    let output = session.execute(&cmd::file_size(path))?;
    output
        .stdout
        .trim()
        .parse::<u64>()
        .map_err(|_| TransportError::SizeProbe {
            path: path.to_string(),
            output: output.stdout,
        })
}

/// In-backend clone between two replication services; the data never
/// transits the orchestrator's process.
pub struct ReplicatedToReplicatedTransport;

impl Transporter for ReplicatedToReplicatedTransport {
    fn run(&self, task: &TransportTask<'_>, info: &MigrationInfo) -> Result<(), TransportError> {
        entry(task, info)?;
        let object = replicated_object(task.instance_id, task.disk);
        let export = cmd::rbd_export(&task.src.config.replicated_pool, &object);
        let import = cmd::rbd_import(&task.dst.config.replicated_pool, &object);
        let command = cmd::pipe(
            &export,
            &cmd::ssh_nested(&task.dst.config.host, &import),
        );
        info!(instance = task.instance_id, disk = %task.disk, "replicated-to-replicated copy");
        task.src.session.execute_forwarded(&command)?;
        Ok(())
    }

    fn label(&self) -> &'static str {
        "replicated-to-replicated"
    }
}

/// Export the replicated disk as a raw byte stream and land it as a file on
/// the destination side.
pub struct ReplicatedToFileTransport;

impl Transporter for ReplicatedToFileTransport {
    fn run(&self, task: &TransportTask<'_>, info: &MigrationInfo) -> Result<(), TransportError> {
        let instance = entry(task, info)?;
        let path_dst = instance.require_path_dst(task.disk)?;
        let object = replicated_object(task.instance_id, task.disk);
        let export = cmd::rbd_export(&task.src.config.replicated_pool, &object);
        let command = cmd::pipe(
            &export,
            &cmd::ssh_nested(&task.dst.config.host, &cmd::dd_write(path_dst)),
        );
        info!(instance = task.instance_id, disk = %task.disk, path_dst, "replicated-to-file copy");
        task.src.session.execute_forwarded(&command)?;
        Ok(())
    }

    fn label(&self) -> &'static str {
        "replicated-to-file"
    }
}

/// Read a file on the source hypervisor and import it into the destination
/// replication service.
pub struct FileToReplicatedTransport;

impl Transporter for FileToReplicatedTransport {
    fn run(&self, task: &TransportTask<'_>, info: &MigrationInfo) -> Result<(), TransportError> {
        let instance = entry(task, info)?;
        let path_src = instance.require_path_src(task.disk)?;
        let object = replicated_object(task.instance_id, task.disk);
        let import = cmd::rbd_import(&task.dst.config.replicated_pool, &object);
        let command = cmd::pipe(
            &cmd::dd_read(path_src),
            &cmd::ssh_nested(&task.dst.config.host, &import),
        );
        let host = source_host(task, instance);
        info!(instance = task.instance_id, disk = %task.disk, host, "file-to-replicated copy");
        task.src.session.for_host(host).execute_forwarded(&command)?;
        Ok(())
    }

    fn label(&self) -> &'static str {
        "file-to-replicated"
    }
}

/// Stream-copy a file between two hosts through a pipe, then verify the
/// byte counts match on both sides.
pub struct FileToFileTransport;

impl Transporter for FileToFileTransport {
    fn run(&self, task: &TransportTask<'_>, info: &MigrationInfo) -> Result<(), TransportError> {
        let instance = entry(task, info)?;
        let path_src = instance.require_path_src(task.disk)?;
        let path_dst = instance.require_path_dst(task.disk)?;
        let command = cmd::pipe(
            &cmd::dd_read(path_src),
            &cmd::ssh_nested(&task.dst.config.host, &cmd::dd_write(path_dst)),
        );
        let host = source_host(task, instance);
        let src_session = task.src.session.for_host(host);
        info!(instance = task.instance_id, disk = %task.disk, host, path_dst, "file-to-file copy");
        src_session.execute_forwarded(&command)?;

        if task.migrate.dry_run {
            return Ok(());
        }
        let src_bytes = probe_size(&src_session, path_src)?;
        let dst_bytes = probe_size(&task.dst.session, path_dst)?;
        if src_bytes != dst_bytes {
            return Err(TransportError::SizeMismatch {
                path: path_dst.to_string(),
                src_bytes,
                dst_bytes,
            });
        }
        Ok(())
    }

    fn label(&self) -> &'static str {
        "file-to-file"
    }
}
