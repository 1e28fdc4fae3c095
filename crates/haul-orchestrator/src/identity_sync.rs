//! Pre-flight identity replication: tenants, roles, users, and role
//! assignments that exist on the source but not the destination are created
//! there, so migrated instances land in a recognizable project structure.

use haul_cloud::identity::{IdentityAdapter, RoleAssignment};
use haul_cloud::CloudError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentitySyncReport {
    pub tenants_created: usize,
    pub roles_created: usize,
    pub users_created: usize,
    pub assignments_applied: usize,
    pub skipped_existing: usize,
}

pub fn sync_identity(
    src: &dyn IdentityAdapter,
    dst: &dyn IdentityAdapter,
) -> Result<IdentitySyncReport, CloudError> {
    let mut report = IdentitySyncReport::default();

    let src_tenants = src.list_tenants()?;
    let mut dst_tenants: BTreeMap<String, String> = dst
        .list_tenants()?
        .into_iter()
        .map(|tenant| (tenant.name.clone(), tenant.id))
        .collect();
    for tenant in &src_tenants {
        if dst_tenants.contains_key(&tenant.name) {
            report.skipped_existing += 1;
            continue;
        }
        let created = dst.create_tenant(&tenant.name, tenant.description.as_deref())?;
        debug!(tenant = %tenant.name, "created tenant");
        dst_tenants.insert(created.name, created.id);
        report.tenants_created += 1;
    }

    let dst_roles: BTreeSet<String> = dst
        .list_roles()?
        .into_iter()
        .map(|role| role.name)
        .collect();
    for role in src.list_roles()? {
        if dst_roles.contains(&role.name) {
            report.skipped_existing += 1;
            continue;
        }
        dst.create_role(&role.name)?;
        report.roles_created += 1;
    }

    // Source tenant id -> name, to re-home users by tenant name.
    let src_tenant_names: BTreeMap<String, String> = src_tenants
        .into_iter()
        .map(|tenant| (tenant.id, tenant.name))
        .collect();
    let dst_users: BTreeSet<String> = dst
        .list_users()?
        .into_iter()
        .map(|user| user.name)
        .collect();
    for user in src.list_users()? {
        if dst_users.contains(&user.name) {
            report.skipped_existing += 1;
            continue;
        }
        let tenant_name = user
            .tenant_id
            .as_ref()
            .and_then(|id| src_tenant_names.get(id));
        let Some(dst_tenant_id) = tenant_name.and_then(|name| dst_tenants.get(name)) else {
            debug!(user = %user.name, "skipping user without a resolvable tenant");
            continue;
        };
        dst.create_user(&user.name, user.email.as_deref(), dst_tenant_id)?;
        report.users_created += 1;
    }

    let existing: BTreeSet<RoleAssignment> =
        dst.list_role_assignments()?.into_iter().collect();
    for assignment in src.list_role_assignments()? {
        if existing.contains(&assignment) {
            report.skipped_existing += 1;
            continue;
        }
        dst.add_user_role(&assignment)?;
        report.assignments_applied += 1;
    }

    info!(
        tenants = report.tenants_created,
        roles = report.roles_created,
        users = report.users_created,
        assignments = report.assignments_applied,
        "identity sync complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_cloud::identity::{Role, Service, Tenant, User};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeIdentity {
        tenants: Mutex<Vec<Tenant>>,
        users: Mutex<Vec<User>>,
        roles: Mutex<Vec<Role>>,
        assignments: Mutex<Vec<RoleAssignment>>,
    }

    impl FakeIdentity {
        fn with_tenants(tenants: Vec<Tenant>) -> Self {
            Self {
                tenants: Mutex::new(tenants),
                ..Self::default()
            }
        }
    }

    impl IdentityAdapter for FakeIdentity {
        fn list_tenants(&self) -> Result<Vec<Tenant>, CloudError> {
            Ok(self.tenants.lock().expect("lock").clone())
        }

        fn list_users(&self) -> Result<Vec<User>, CloudError> {
            Ok(self.users.lock().expect("lock").clone())
        }

        fn list_roles(&self) -> Result<Vec<Role>, CloudError> {
            Ok(self.roles.lock().expect("lock").clone())
        }

        fn list_services(&self) -> Result<Vec<Service>, CloudError> {
            Ok(Vec::new())
        }

        fn list_role_assignments(&self) -> Result<Vec<RoleAssignment>, CloudError> {
            Ok(self.assignments.lock().expect("lock").clone())
        }

        fn create_tenant(
            &self,
            name: &str,
            description: Option<&str>,
        ) -> Result<Tenant, CloudError> {
            let tenant = Tenant {
                id: format!("t-{name}"),
                name: name.to_string(),
                description: description.map(str::to_string),
            };
            self.tenants.lock().expect("lock").push(tenant.clone());
            Ok(tenant)
        }

        fn create_user(
            &self,
            name: &str,
            email: Option<&str>,
            tenant_id: &str,
        ) -> Result<User, CloudError> {
            let user = User {
                id: format!("u-{name}"),
                name: name.to_string(),
                email: email.map(str::to_string),
                tenant_id: Some(tenant_id.to_string()),
            };
            self.users.lock().expect("lock").push(user.clone());
            Ok(user)
        }

        fn create_role(&self, name: &str) -> Result<Role, CloudError> {
            let role = Role {
                id: format!("r-{name}"),
                name: name.to_string(),
            };
            self.roles.lock().expect("lock").push(role.clone());
            Ok(role)
        }

        fn add_user_role(&self, assignment: &RoleAssignment) -> Result<(), CloudError> {
            self.assignments
                .lock()
                .expect("lock")
                .push(assignment.clone());
            Ok(())
        }

        fn endpoint_by_service_name(
            &self,
            _service_name: &str,
        ) -> Result<Option<String>, CloudError> {
            Ok(None)
        }
    }

    fn tenant(id: &str, name: &str) -> Tenant {
        Tenant {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn missing_identities_are_created_and_existing_ones_skipped() {
        let src = FakeIdentity::with_tenants(vec![tenant("t1", "ops"), tenant("t2", "dev")]);
        src.roles.lock().expect("lock").push(Role {
            id: "r1".to_string(),
            name: "member".to_string(),
        });
        src.users.lock().expect("lock").push(User {
            id: "u1".to_string(),
            name: "alex".to_string(),
            email: Some("alex@example.net".to_string()),
            tenant_id: Some("t1".to_string()),
        });
        src.assignments.lock().expect("lock").push(RoleAssignment {
            user_name: "alex".to_string(),
            tenant_name: "ops".to_string(),
            role_name: "member".to_string(),
        });

        let dst = FakeIdentity::with_tenants(vec![tenant("x9", "ops")]);

        let report = sync_identity(&src, &dst).expect("sync");
        assert_eq!(report.tenants_created, 1);
        assert_eq!(report.roles_created, 1);
        assert_eq!(report.users_created, 1);
        assert_eq!(report.assignments_applied, 1);
        assert_eq!(report.skipped_existing, 1);

        let dst_users = dst.users.lock().expect("lock");
        assert_eq!(dst_users[0].tenant_id.as_deref(), Some("x9"));
    }

    #[test]
    fn sync_is_idempotent_on_a_second_pass() {
        let src = FakeIdentity::with_tenants(vec![tenant("t1", "ops")]);
        let dst = FakeIdentity::default();

        sync_identity(&src, &dst).expect("first pass");
        let second = sync_identity(&src, &dst).expect("second pass");
        assert_eq!(second.tenants_created, 0);
        assert_eq!(second.skipped_existing, 1);
    }
}
