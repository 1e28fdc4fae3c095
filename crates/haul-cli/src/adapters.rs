//! Control-plane adapters that drive a cloud through its `openstack` CLI
//! over the remote session. These are the thin, swappable collaborators at
//! the orchestrator's boundary; nothing here owns migration state.

use haul_cloud::identity::{IdentityAdapter, Role, RoleAssignment, Service, Tenant, User};
use haul_cloud::{
    Capability, CloudError, ComputeAdapter, ImageAdapter, SearchOpts, StatusAction,
    StorageAdapter, VolumeCriteria, VolumeUpload,
};
use haul_core::{
    CloudConfig, DiskPaths, ImageBody, ImageEntry, InstanceBody, InstanceEntry, MigrationInfo,
    VolumeBody, VolumeEntry,
};
use haul_remote::{CommandOutput, RemoteSession};
use serde_json::Value;
use std::collections::HashMap;

const INSTANCES_DIR: &str = "/var/lib/nova/instances";

fn parse_json(output: &CommandOutput, context: &str) -> Result<Value, CloudError> {
    serde_json::from_str(&output.stdout)
        .map_err(|err| CloudError::Adapter(format!("{context}: unparseable response: {err}")))
}

fn json_str(value: &Value, key: &str, context: &str) -> Result<String, CloudError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CloudError::Adapter(format!("{context}: missing field {key}")))
}

pub struct ShellCompute {
    session: RemoteSession,
    config: CloudConfig,
}

impl ShellCompute {
    pub fn new(session: RemoteSession, config: CloudConfig) -> Self {
        Self { session, config }
    }

    fn current_status(&self, instance_id: &str) -> Result<String, CloudError> {
        let output = self.session.execute(&format!(
            "{} openstack server show -f json {instance_id}",
            self.config.auth_env()
        ))?;
        let value = parse_json(&output, "server show")?;
        json_str(&value, "status", "server show")
    }
}

fn target_status(action: StatusAction) -> &'static str {
    match action {
        StatusAction::Start | StatusAction::Resume | StatusAction::Unpause => "ACTIVE",
        StatusAction::Stop => "SHUTOFF",
        StatusAction::Pause => "PAUSED",
        StatusAction::Suspend => "SUSPENDED",
    }
}

impl ComputeAdapter for ShellCompute {
    fn deploy(&self, info: &MigrationInfo, instance_id: &str) -> Result<String, CloudError> {
        let entry = info.instance(instance_id)?;
        let image = entry
            .meta
            .new_image_id
            .as_deref()
            .or(entry.body.image_id.as_deref())
            .ok_or_else(|| {
                CloudError::Adapter(format!("instance {instance_id}: no image to deploy from"))
            })?;
        let flavor = entry
            .body
            .extra
            .get("flavor")
            .and_then(Value::as_str)
            .unwrap_or("m1.small");
        let name = entry.body.name.as_deref().unwrap_or(instance_id);

        let output = self.session.execute(&format!(
            "{} openstack server create --image {image} --flavor {flavor} --wait -f json {name}",
            self.config.auth_env()
        ))?;
        if self.session.is_dry_run() {
            return Ok(format!("dry-run-{instance_id}"));
        }
        let value = parse_json(&output, "server create")?;
        json_str(&value, "id", "server create")
    }

    fn read_info(&self, search: &SearchOpts) -> Result<MigrationInfo, CloudError> {
        let id = search
            .id
            .as_deref()
            .ok_or_else(|| CloudError::Adapter("read_info requires an id".to_string()))?;
        let output = self.session.execute(&format!(
            "{} openstack server show -f json {id}",
            self.config.auth_env()
        ))?;
        let mut info = MigrationInfo::default();

        // Dry-run still yields a synthetic entry so callers that read the
        // discovered disk paths keep working.
        let (name, host, image_id, extra) = if self.session.is_dry_run() {
            (None, None, None, HashMap::new())
        } else {
            let value = parse_json(&output, "server show")?;
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let host = value
                .get("OS-EXT-SRV-ATTR:host")
                .and_then(Value::as_str)
                .map(str::to_string);
            let image_id = value
                .get("image")
                .and_then(|image| image.get("id").or(Some(image)))
                .and_then(Value::as_str)
                .map(str::to_string);
            let mut extra = HashMap::new();
            if let Some(status) = value.get("status") {
                extra.insert("status".to_string(), status.clone());
            }
            (name, host, image_id, extra)
        };

        info.compute.instances.insert(
            id.to_string(),
            InstanceEntry {
                body: InstanceBody {
                    id: id.to_string(),
                    name,
                    host,
                    image_id,
                    volume_id: None,
                    is_ephemeral: false,
                    extra,
                },
                ephemeral: DiskPaths {
                    path_src: Some(format!("{INSTANCES_DIR}/{id}/disk.local")),
                    path_dst: None,
                },
                diff: DiskPaths {
                    path_src: Some(format!("{INSTANCES_DIR}/{id}/disk")),
                    path_dst: None,
                },
                meta: Default::default(),
            },
        );
        Ok(info)
    }

    fn change_status(&self, action: StatusAction, instance_id: &str) -> Result<(), CloudError> {
        if !self.session.is_dry_run() {
            // Requesting the current status is a no-op by contract.
            if self.current_status(instance_id)? == target_status(action) {
                return Ok(());
            }
        }
        self.session.execute(&format!(
            "{} openstack server {action} {instance_id}",
            self.config.auth_env()
        ))?;
        Ok(())
    }
}

pub struct ShellStorage {
    session: RemoteSession,
    config: CloudConfig,
}

impl ShellStorage {
    pub fn new(session: RemoteSession, config: CloudConfig) -> Self {
        Self { session, config }
    }
}

impl StorageAdapter for ShellStorage {
    fn read_info(&self, criteria: &VolumeCriteria) -> Result<MigrationInfo, CloudError> {
        let output = self.session.execute(&format!(
            "{} openstack volume list --long -f json",
            self.config.auth_env()
        ))?;
        let mut info = MigrationInfo::default();
        if self.session.is_dry_run() {
            return Ok(info);
        }
        let rows: Vec<Value> = serde_json::from_str(&output.stdout)
            .map_err(|err| CloudError::Adapter(format!("volume list: {err}")))?;
        for row in rows {
            let id = json_str(&row, "ID", "volume list")?;
            if !criteria.ids.is_empty() && !criteria.ids.contains(&id) {
                continue;
            }
            let bootable = row
                .get("Bootable")
                .and_then(Value::as_str)
                .map(|flag| flag.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if criteria.bootable_only && !bootable {
                continue;
            }
            info.storage.volumes.insert(
                id.clone(),
                VolumeEntry {
                    body: VolumeBody {
                        id,
                        display_name: row
                            .get("Name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        bootable,
                        size_gb: row.get("Size").and_then(Value::as_u64),
                        extra: HashMap::new(),
                    },
                    meta: Default::default(),
                },
            );
        }
        Ok(info)
    }

    fn upload_volume_to_image(
        &self,
        volume_id: &str,
        force: bool,
        image_name: &str,
        container_format: &str,
        disk_format: &str,
    ) -> Result<VolumeUpload, CloudError> {
        let force_flag = if force { " --force" } else { "" };
        let output = self.session.execute(&format!(
            "{} openstack image create --volume {volume_id}{force_flag} \
             --container-format {container_format} --disk-format {disk_format} \
             -f json {image_name}",
            self.config.auth_env()
        ))?;
        if self.session.is_dry_run() {
            return Ok(VolumeUpload {
                response: Value::Null,
                image_id: format!("dry-run-{image_name}"),
            });
        }
        let value = parse_json(&output, "volume upload")?;
        let image_id = value
            .get("image_id")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| CloudError::Adapter("volume upload: missing image id".to_string()))?
            .to_string();
        Ok(VolumeUpload {
            response: value,
            image_id,
        })
    }

    fn has_capability(&self, capability: Capability) -> bool {
        // The CLI-backed storage service supports volume export on every
        // release this tool targets.
        matches!(capability, Capability::VolumeUpload)
    }

    fn backend(&self) -> haul_core::Backend {
        self.config.storage_backend
    }
}

pub struct ShellImage {
    session: RemoteSession,
    config: CloudConfig,
}

impl ShellImage {
    pub fn new(session: RemoteSession, config: CloudConfig) -> Self {
        Self { session, config }
    }

    fn show(&self, image_id: &str) -> Result<Value, CloudError> {
        let output = self.session.execute(&format!(
            "{} openstack image show -f json {image_id}",
            self.config.auth_env()
        ))?;
        parse_json(&output, "image show")
    }
}

impl ImageAdapter for ShellImage {
    fn status(&self, image_id: &str) -> Result<String, CloudError> {
        if self.session.is_dry_run() {
            return Ok("active".to_string());
        }
        json_str(&self.show(image_id)?, "status", "image show")
    }

    fn patch_image(&self, backend: haul_core::Backend, image_id: &str) -> Result<(), CloudError> {
        self.session.execute(&format!(
            "{} openstack image set --property migration_backend={backend} {image_id}",
            self.config.auth_env()
        ))?;
        Ok(())
    }

    fn read_info(&self, image_id: &str) -> Result<ImageEntry, CloudError> {
        if self.session.is_dry_run() {
            return Ok(ImageEntry {
                body: ImageBody {
                    id: image_id.to_string(),
                    name: None,
                    disk_format: None,
                    container_format: None,
                    status: Some("active".to_string()),
                    extra: HashMap::new(),
                },
                meta: Default::default(),
            });
        }
        let value = self.show(image_id)?;
        Ok(ImageEntry {
            body: ImageBody {
                id: image_id.to_string(),
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                disk_format: value
                    .get("disk_format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                container_format: value
                    .get("container_format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                status: value
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                extra: HashMap::new(),
            },
            meta: Default::default(),
        })
    }
}

pub struct ShellIdentity {
    session: RemoteSession,
    config: CloudConfig,
}

impl ShellIdentity {
    pub fn new(session: RemoteSession, config: CloudConfig) -> Self {
        Self { session, config }
    }

    fn list(&self, command: &str, context: &str) -> Result<Vec<Value>, CloudError> {
        let output = self
            .session
            .execute(&format!("{} {command}", self.config.auth_env()))?;
        if self.session.is_dry_run() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&output.stdout)
            .map_err(|err| CloudError::Adapter(format!("{context}: {err}")))
    }
}

impl IdentityAdapter for ShellIdentity {
    fn list_tenants(&self) -> Result<Vec<Tenant>, CloudError> {
        let rows = self.list("openstack project list --long -f json", "project list")?;
        rows.iter()
            .map(|row| {
                Ok(Tenant {
                    id: json_str(row, "ID", "project list")?,
                    name: json_str(row, "Name", "project list")?,
                    description: row
                        .get("Description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect()
    }

    fn list_users(&self) -> Result<Vec<User>, CloudError> {
        let tenants_by_name: HashMap<String, String> = self
            .list_tenants()?
            .into_iter()
            .map(|tenant| (tenant.name, tenant.id))
            .collect();
        let rows = self.list("openstack user list --long -f json", "user list")?;
        rows.iter()
            .map(|row| {
                let tenant_id = row
                    .get("Project")
                    .and_then(Value::as_str)
                    .and_then(|name| tenants_by_name.get(name))
                    .cloned();
                Ok(User {
                    id: json_str(row, "ID", "user list")?,
                    name: json_str(row, "Name", "user list")?,
                    email: row.get("Email").and_then(Value::as_str).map(str::to_string),
                    tenant_id,
                })
            })
            .collect()
    }

    fn list_roles(&self) -> Result<Vec<Role>, CloudError> {
        let rows = self.list("openstack role list -f json", "role list")?;
        rows.iter()
            .map(|row| {
                Ok(Role {
                    id: json_str(row, "ID", "role list")?,
                    name: json_str(row, "Name", "role list")?,
                })
            })
            .collect()
    }

    fn list_services(&self) -> Result<Vec<Service>, CloudError> {
        let rows = self.list("openstack service list -f json", "service list")?;
        rows.iter()
            .map(|row| {
                Ok(Service {
                    id: json_str(row, "ID", "service list")?,
                    name: json_str(row, "Name", "service list")?,
                    kind: json_str(row, "Type", "service list")?,
                })
            })
            .collect()
    }

    fn list_role_assignments(&self) -> Result<Vec<RoleAssignment>, CloudError> {
        let rows = self.list(
            "openstack role assignment list --names -f json",
            "role assignment list",
        )?;
        let mut assignments = Vec::new();
        for row in rows {
            let user = json_str(&row, "User", "role assignment list")?;
            let project = json_str(&row, "Project", "role assignment list")?;
            if user.is_empty() || project.is_empty() {
                continue;
            }
            assignments.push(RoleAssignment {
                user_name: user.split('@').next().unwrap_or(&user).to_string(),
                tenant_name: project.split('@').next().unwrap_or(&project).to_string(),
                role_name: json_str(&row, "Role", "role assignment list")?,
            });
        }
        Ok(assignments)
    }

    fn create_tenant(&self, name: &str, description: Option<&str>) -> Result<Tenant, CloudError> {
        let description_flag = description
            .map(|text| format!(" --description '{text}'"))
            .unwrap_or_default();
        let output = self.session.execute(&format!(
            "{} openstack project create{description_flag} -f json {name}",
            self.config.auth_env()
        ))?;
        if self.session.is_dry_run() {
            return Ok(Tenant {
                id: format!("dry-run-{name}"),
                name: name.to_string(),
                description: description.map(str::to_string),
            });
        }
        let value = parse_json(&output, "project create")?;
        Ok(Tenant {
            id: json_str(&value, "id", "project create")?,
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    fn create_user(
        &self,
        name: &str,
        email: Option<&str>,
        tenant_id: &str,
    ) -> Result<User, CloudError> {
        let email_flag = email
            .map(|address| format!(" --email {address}"))
            .unwrap_or_default();
        let output = self.session.execute(&format!(
            "{} openstack user create --project {tenant_id}{email_flag} -f json {name}",
            self.config.auth_env()
        ))?;
        if self.session.is_dry_run() {
            return Ok(User {
                id: format!("dry-run-{name}"),
                name: name.to_string(),
                email: email.map(str::to_string),
                tenant_id: Some(tenant_id.to_string()),
            });
        }
        let value = parse_json(&output, "user create")?;
        Ok(User {
            id: json_str(&value, "id", "user create")?,
            name: name.to_string(),
            email: email.map(str::to_string),
            tenant_id: Some(tenant_id.to_string()),
        })
    }

    fn create_role(&self, name: &str) -> Result<Role, CloudError> {
        let output = self.session.execute(&format!(
            "{} openstack role create -f json {name}",
            self.config.auth_env()
        ))?;
        if self.session.is_dry_run() {
            return Ok(Role {
                id: format!("dry-run-{name}"),
                name: name.to_string(),
            });
        }
        let value = parse_json(&output, "role create")?;
        Ok(Role {
            id: json_str(&value, "id", "role create")?,
            name: name.to_string(),
        })
    }

    fn add_user_role(&self, assignment: &RoleAssignment) -> Result<(), CloudError> {
        self.session.execute(&format!(
            "{} openstack role add --user {user} --project {project} {role}",
            self.config.auth_env(),
            user = assignment.user_name,
            project = assignment.tenant_name,
            role = assignment.role_name,
        ))?;
        Ok(())
    }

    fn endpoint_by_service_name(&self, service_name: &str) -> Result<Option<String>, CloudError> {
        let rows = self.list(
            &format!("openstack endpoint list --service {service_name} --interface public -f json"),
            "endpoint list",
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.get("URL"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}
