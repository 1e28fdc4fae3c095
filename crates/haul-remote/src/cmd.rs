//! Builders for every remote command the migration issues. Kept in one
//! place so the exact tool invocations are reviewable and testable.

/// Inner hop for a nested command; host key checking stays off because the
/// hop targets ephemeral compute hosts.
pub fn ssh_nested(host: &str, command: &str) -> String {
    format!("ssh -o StrictHostKeyChecking=no {host} '{command}'")
}

pub fn pipe(producer: &str, consumer: &str) -> String {
    format!("{producer} | {consumer}")
}

pub fn rbd_export(pool: &str, object: &str) -> String {
    format!("rbd export -p {pool} {object} -")
}

pub fn rbd_import(pool: &str, object: &str) -> String {
    format!("rbd import --image-format 2 -p {pool} - {object}")
}

pub fn dd_read(path: &str) -> String {
    format!("dd if={path} bs=1M")
}

pub fn dd_write(path: &str) -> String {
    format!("dd of={path} bs=1M")
}

pub fn file_size(path: &str) -> String {
    format!("stat -c %s {path}")
}

pub fn qemu_rebase(base_file: &str, diff_file: &str) -> String {
    format!("qemu-img rebase -u -b {base_file} {diff_file}")
}

pub fn qemu_commit(diff_file: &str) -> String {
    format!("qemu-img commit {diff_file}")
}

/// Convert in place via a sibling temp file so a failed conversion never
/// clobbers the input.
pub fn qemu_convert_to_raw(path: &str) -> String {
    format!("qemu-img convert -O raw {path} {path}.raw && mv -f {path}.raw {path}")
}

pub fn image_download(auth_env: &str, image_id: &str, path: &str) -> String {
    format!("{auth_env} openstack image save --file {path} {image_id}")
}

pub fn image_create(
    auth_env: &str,
    name: &str,
    path: &str,
    disk_format: &str,
    container_format: &str,
) -> String {
    format!(
        "{auth_env} openstack image create --disk-format {disk_format} \
         --container-format {container_format} --file {path} -f value -c id {name}"
    )
}
