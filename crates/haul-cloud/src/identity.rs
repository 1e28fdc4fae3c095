//! Identity control-plane boundary. The orchestrator core only needs the
//! compute/storage/image adapters; identity is consumed by the pre-flight
//! sync that replays tenants, roles, and users onto the destination.

use crate::CloudError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub kind: String,
}

/// A (user, tenant, role) assignment, by name so it can be replayed against
/// a cloud that assigns different ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoleAssignment {
    pub user_name: String,
    pub tenant_name: String,
    pub role_name: String,
}

pub trait IdentityAdapter: Send + Sync {
    fn list_tenants(&self) -> Result<Vec<Tenant>, CloudError>;
    fn list_users(&self) -> Result<Vec<User>, CloudError>;
    fn list_roles(&self) -> Result<Vec<Role>, CloudError>;
    fn list_services(&self) -> Result<Vec<Service>, CloudError>;
    fn list_role_assignments(&self) -> Result<Vec<RoleAssignment>, CloudError>;

    fn create_tenant(&self, name: &str, description: Option<&str>) -> Result<Tenant, CloudError>;
    fn create_user(&self, name: &str, email: Option<&str>, tenant_id: &str)
        -> Result<User, CloudError>;
    fn create_role(&self, name: &str) -> Result<Role, CloudError>;
    fn add_user_role(&self, assignment: &RoleAssignment) -> Result<(), CloudError>;

    fn endpoint_by_service_name(&self, service_name: &str) -> Result<Option<String>, CloudError>;
}
