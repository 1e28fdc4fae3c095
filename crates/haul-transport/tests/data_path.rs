use haul_cloud::{
    Capability, Cloud, CloudError, ComputeAdapter, ImageAdapter, SearchOpts, StatusAction,
    StorageAdapter, VolumeCriteria, VolumeUpload,
};
use haul_core::{
    Backend, CloudConfig, DiskKind, ImageBody, ImageEntry, ImageMeta, InstanceBody, InstanceEntry,
    MigrateConfig, MigrationInfo, PollPolicy, VolumeBody, VolumeEntry,
};
use haul_remote::{CommandOutput, CommandRunner, RemoteError, RemoteSession};
use haul_transport::{
    FileToFileTransport, TransportError, TransportTask, Transporter, TransporterTable,
    VolumeToImage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    host: String,
    command: String,
    forward_agent: bool,
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
    scripted: Mutex<VecDeque<CommandOutput>>,
}

impl Recorder {
    fn script(&self, outputs: Vec<CommandOutput>) {
        *self.scripted.lock().expect("lock") = outputs.into();
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }
}

impl CommandRunner for Recorder {
    fn run(
        &self,
        host: &str,
        command: &str,
        forward_agent: bool,
    ) -> Result<CommandOutput, RemoteError> {
        self.calls.lock().expect("lock").push(Call {
            host: host.to_string(),
            command: command.to_string(),
            forward_agent,
        });
        Ok(self
            .scripted
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_default())
    }
}

fn stdout(text: &str) -> CommandOutput {
    CommandOutput {
        stdout: text.to_string(),
        stderr: String::new(),
        status: 0,
    }
}

struct NullCompute;

impl ComputeAdapter for NullCompute {
    fn deploy(&self, _info: &MigrationInfo, _instance_id: &str) -> Result<String, CloudError> {
        Err(CloudError::Adapter("deploy not expected".to_string()))
    }

    fn read_info(&self, _search: &SearchOpts) -> Result<MigrationInfo, CloudError> {
        Ok(MigrationInfo::default())
    }

    fn change_status(&self, _action: StatusAction, _instance_id: &str) -> Result<(), CloudError> {
        Ok(())
    }
}

struct FakeStorage {
    backend: Backend,
    can_upload: bool,
}

impl StorageAdapter for FakeStorage {
    fn read_info(&self, _criteria: &VolumeCriteria) -> Result<MigrationInfo, CloudError> {
        Ok(MigrationInfo::default())
    }

    fn upload_volume_to_image(
        &self,
        volume_id: &str,
        force: bool,
        _image_name: &str,
        _container_format: &str,
        _disk_format: &str,
    ) -> Result<VolumeUpload, CloudError> {
        assert!(force, "volume export must be forced even when attached");
        Ok(VolumeUpload {
            response: serde_json::json!({"status": "uploading"}),
            image_id: format!("img-from-{volume_id}"),
        })
    }

    fn has_capability(&self, capability: Capability) -> bool {
        matches!(capability, Capability::VolumeUpload) && self.can_upload
    }

    fn backend(&self) -> Backend {
        self.backend
    }
}

struct FakeImage;

impl ImageAdapter for FakeImage {
    fn status(&self, _image_id: &str) -> Result<String, CloudError> {
        Ok("active".to_string())
    }

    fn patch_image(&self, _backend: Backend, _image_id: &str) -> Result<(), CloudError> {
        Ok(())
    }

    fn read_info(&self, image_id: &str) -> Result<ImageEntry, CloudError> {
        Ok(ImageEntry {
            body: ImageBody {
                id: image_id.to_string(),
                name: Some(image_id.to_string()),
                disk_format: Some("raw".to_string()),
                container_format: Some("bare".to_string()),
                status: Some("active".to_string()),
                extra: HashMap::new(),
            },
            meta: ImageMeta::default(),
        })
    }
}

fn cloud(host: &str, backend: Backend, runner: Arc<Recorder>, can_upload: bool) -> Cloud {
    let config = CloudConfig {
        host: host.to_string(),
        temp_dir: "/tmp".to_string(),
        compute_backend: backend,
        storage_backend: backend,
        replicated_pool: "compute".to_string(),
        auth: Default::default(),
    };
    Cloud::new(
        config,
        Arc::new(NullCompute),
        Arc::new(FakeStorage {
            backend,
            can_upload,
        }),
        Arc::new(FakeImage),
        RemoteSession::new(host, runner, false),
    )
}

fn instance_with_paths(id: &str, path_src: Option<&str>, path_dst: Option<&str>) -> MigrationInfo {
    let mut info = MigrationInfo::default();
    let mut entry = InstanceEntry {
        body: InstanceBody {
            id: id.to_string(),
            name: None,
            host: Some("hv-1".to_string()),
            image_id: Some("img-1".to_string()),
            volume_id: None,
            is_ephemeral: false,
            extra: HashMap::new(),
        },
        ephemeral: Default::default(),
        diff: Default::default(),
        meta: Default::default(),
    };
    entry.diff.path_src = path_src.map(str::to_string);
    entry.diff.path_dst = path_dst.map(str::to_string);
    info.compute.instances.insert(id.to_string(), entry);
    info
}

fn policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(1),
        max_wait: Duration::from_millis(20),
    }
}

#[test]
fn each_pair_issues_its_native_copy_primitive() {
    let cases = [
        (
            Backend::Replicated,
            Backend::Replicated,
            "rbd export -p compute i-1_disk -",
            "rbd import",
        ),
        (
            Backend::Replicated,
            Backend::File,
            "rbd export -p compute i-1_disk -",
            "dd of=/dst/i-1",
        ),
        (
            Backend::File,
            Backend::Replicated,
            "dd if=/src/i-1 bs=1M",
            "rbd import",
        ),
        (
            Backend::File,
            Backend::File,
            "dd if=/src/i-1 bs=1M",
            "dd of=/dst/i-1",
        ),
    ];

    for (src_backend, dst_backend, producer, consumer) in cases {
        let runner = Arc::new(Recorder::default());
        runner.script(vec![
            CommandOutput::default(),
            stdout("4096"),
            stdout("4096"),
        ]);
        let src = cloud("src-ctl", src_backend, runner.clone(), true);
        let dst = cloud("dst-ctl", dst_backend, runner.clone(), true);
        let migrate = MigrateConfig::default();
        let info = instance_with_paths("i-1", Some("/src/i-1"), Some("/dst/i-1"));

        let table = TransporterTable::standard();
        let transporter = table.resolve(src_backend, dst_backend).expect("pair");
        transporter
            .run(
                &TransportTask {
                    migrate: &migrate,
                    src: &src,
                    dst: &dst,
                    instance_id: "i-1",
                    disk: DiskKind::Diff,
                },
                &info,
            )
            .expect("transport");

        let calls = runner.calls();
        let copy = &calls[0];
        assert!(
            copy.command.starts_with(producer),
            "{src_backend}->{dst_backend}: {}",
            copy.command
        );
        assert!(
            copy.command.contains(consumer),
            "{src_backend}->{dst_backend}: {}",
            copy.command
        );
        assert!(copy.command.contains("ssh -o StrictHostKeyChecking=no dst-ctl"));
        assert!(copy.forward_agent, "nested hop needs the forwarded agent");
    }
}

#[test]
fn file_copy_runs_on_the_source_hypervisor() {
    let runner = Arc::new(Recorder::default());
    runner.script(vec![
        CommandOutput::default(),
        stdout("1024"),
        stdout("1024"),
    ]);
    let src = cloud("src-ctl", Backend::File, runner.clone(), true);
    let dst = cloud("dst-ctl", Backend::File, runner.clone(), true);
    let migrate = MigrateConfig::default();
    let info = instance_with_paths("i-1", Some("/src/i-1"), Some("/dst/i-1"));

    FileToFileTransport
        .run(
            &TransportTask {
                migrate: &migrate,
                src: &src,
                dst: &dst,
                instance_id: "i-1",
                disk: DiskKind::Diff,
            },
            &info,
        )
        .expect("transport");

    let calls = runner.calls();
    assert_eq!(calls[0].host, "hv-1");
    assert_eq!(calls[1].command, "stat -c %s /src/i-1");
    assert_eq!(calls[2].command, "stat -c %s /dst/i-1");
    assert_eq!(calls[2].host, "dst-ctl");
}

#[test]
fn size_mismatch_is_fatal() {
    let runner = Arc::new(Recorder::default());
    runner.script(vec![
        CommandOutput::default(),
        stdout("1024"),
        stdout("512"),
    ]);
    let src = cloud("src-ctl", Backend::File, runner.clone(), true);
    let dst = cloud("dst-ctl", Backend::File, runner.clone(), true);
    let migrate = MigrateConfig::default();
    let info = instance_with_paths("i-1", Some("/src/i-1"), Some("/dst/i-1"));

    let err = FileToFileTransport
        .run(
            &TransportTask {
                migrate: &migrate,
                src: &src,
                dst: &dst,
                instance_id: "i-1",
                disk: DiskKind::Diff,
            },
            &info,
        )
        .expect_err("must fail");
    assert!(matches!(
        err,
        TransportError::SizeMismatch {
            src_bytes: 1024,
            dst_bytes: 512,
            ..
        }
    ));
}

#[test]
fn unwritten_destination_path_fails_before_any_command() {
    let runner = Arc::new(Recorder::default());
    let src = cloud("src-ctl", Backend::File, runner.clone(), true);
    let dst = cloud("dst-ctl", Backend::File, runner.clone(), true);
    let migrate = MigrateConfig::default();
    let info = instance_with_paths("i-1", Some("/src/i-1"), None);

    let err = FileToFileTransport
        .run(
            &TransportTask {
                migrate: &migrate,
                src: &src,
                dst: &dst,
                instance_id: "i-1",
                disk: DiskKind::Diff,
            },
            &info,
        )
        .expect_err("must fail");
    assert!(matches!(err, TransportError::Record(_)));
    assert!(runner.calls().is_empty());
}

#[test]
fn volume_to_image_round_trip_preserves_the_volume_body() {
    let runner = Arc::new(Recorder::default());
    let cloud = cloud("src-ctl", Backend::Replicated, runner, true);

    let mut volumes = MigrationInfo::default();
    volumes.storage.volumes.insert(
        "vol-1".to_string(),
        VolumeEntry {
            body: VolumeBody {
                id: "vol-1".to_string(),
                display_name: Some("data".to_string()),
                bootable: true,
                size_gb: Some(20),
                extra: HashMap::new(),
            },
            meta: Default::default(),
        },
    );

    let images = VolumeToImage::new("raw")
        .run(&cloud, &volumes, &policy())
        .expect("convert");

    let entry = images.images.get("img-from-vol-1").expect("image entry");
    assert_eq!(entry.body.status.as_deref(), Some("active"));
    let provenance = entry.meta.volume.as_ref().expect("volume provenance");
    assert_eq!(provenance, &volumes.storage.volumes["vol-1"].body);
}

#[test]
fn missing_upload_capability_fails_before_any_volume_is_touched() {
    let runner = Arc::new(Recorder::default());
    let cloud = cloud("src-ctl", Backend::Replicated, runner, false);

    let mut volumes = MigrationInfo::default();
    volumes.storage.volumes.insert(
        "vol-1".to_string(),
        VolumeEntry {
            body: VolumeBody {
                id: "vol-1".to_string(),
                display_name: None,
                bootable: false,
                size_gb: None,
                extra: HashMap::new(),
            },
            meta: Default::default(),
        },
    );

    let err = VolumeToImage::new("raw")
        .run(&cloud, &volumes, &policy())
        .expect_err("must fail");
    assert!(matches!(
        err,
        haul_transport::ConvertError::Cloud(CloudError::UnsupportedCapability { .. })
    ));
}
