use std::collections::HashSet;

use bazaar_core::UserId;

use crate::permissions::role_permissions;
use crate::{Permission, Role};

/// A fully resolved principal for authorization decisions.
///
/// Built by the API from verified token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(&Role::ADMIN)
    }

    pub fn is_merchant(&self) -> bool {
        self.roles.iter().any(Role::is_merchant)
    }

    /// Union of the permissions granted by every role.
    pub fn effective_permissions(&self) -> HashSet<Permission> {
        self.roles
            .iter()
            .flat_map(|r| role_permissions(r.as_str()))
            .collect()
    }
}
