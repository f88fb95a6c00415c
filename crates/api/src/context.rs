use bazaar_auth::{Principal, Role};
use bazaar_core::UserId;
use bazaar_orders::Actor;

/// Principal context for a request (authenticated user + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self {
            principal: Principal::new(user_id, roles),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// How the ledger services see this caller.
    pub fn actor(&self) -> Actor {
        if self.principal.is_admin() {
            Actor::Admin(self.user_id())
        } else {
            Actor::User(self.user_id())
        }
    }
}
