//! Role table for privileged operations.
//!
//! Admins are seeded from configuration at startup and can be granted or
//! revoked at runtime; every check resolves against the live table, so a
//! change takes effect on the next request without a redeploy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{Collection, Store, StoreError, WriteSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleAssignment {
    pub account_id: String,
    pub role: Role,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{0} is not an admin")]
    Forbidden(String),

    #[error("cannot revoke the last admin")]
    LastAdmin,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AccessControl {
    roles: Arc<DashMap<String, Role>>,
    store: Store,
}

impl AccessControl {
    /// Load persisted assignments, then make sure every seed id is an admin.
    pub fn load(store: Store, seed_admins: &[String]) -> Result<Self, AccessError> {
        let roles = Arc::new(DashMap::new());
        let stored: Vec<RoleAssignment> = store.scan(Collection::Roles)?;
        for assignment in stored {
            roles.insert(assignment.account_id, assignment.role);
        }

        let access = Self { roles, store };
        let now = Utc::now();
        let mut writes = WriteSet::new();
        for admin in seed_admins {
            if access.role_of(admin) != Role::Admin {
                let assignment = RoleAssignment {
                    account_id: admin.clone(),
                    role: Role::Admin,
                    assigned_by: "config".to_string(),
                    assigned_at: now,
                };
                writes.put(Collection::Roles, admin.as_str(), &assignment)?;
                access.roles.insert(admin.clone(), Role::Admin);
            }
        }
        access.store.commit(writes)?;

        info!(admins = access.admin_count(), "Role table loaded");
        Ok(access)
    }

    pub fn role_of(&self, account_id: &str) -> Role {
        self.roles.get(account_id).map(|r| *r).unwrap_or(Role::User)
    }

    pub fn is_admin(&self, account_id: &str) -> bool {
        self.role_of(account_id) == Role::Admin
    }

    pub fn require_admin(&self, account_id: &str) -> Result<(), AccessError> {
        if self.is_admin(account_id) {
            Ok(())
        } else {
            warn!(account = %account_id, "Admin action refused");
            Err(AccessError::Forbidden(account_id.to_string()))
        }
    }

    pub fn admin_count(&self) -> usize {
        self.roles.iter().filter(|r| *r.value() == Role::Admin).count()
    }

    /// Grant or revoke a role. Only admins may call this.
    pub fn assign(&self, actor: &str, target: &str, role: Role) -> Result<RoleAssignment, AccessError> {
        self.require_admin(actor)?;
        if role == Role::User && self.is_admin(target) && self.admin_count() <= 1 {
            return Err(AccessError::LastAdmin);
        }

        let assignment = RoleAssignment {
            account_id: target.to_string(),
            role,
            assigned_by: actor.to_string(),
            assigned_at: Utc::now(),
        };
        let mut writes = WriteSet::new();
        writes.put(Collection::Roles, target, &assignment)?;
        self.store.commit(writes)?;
        self.roles.insert(target.to_string(), role);

        info!(actor = %actor, target = %target, role = ?role, "Role assigned");
        Ok(assignment)
    }
}
