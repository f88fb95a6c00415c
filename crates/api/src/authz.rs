//! API-side permission guard.
//!
//! Role checks happen here, before a service is called. Ownership and
//! per-record rules stay with the services.

use axum::http::StatusCode;
use axum::response::Response;

use bazaar_auth::{AuthzError, Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Check that the caller holds `permission`.
pub fn require(principal: &PrincipalContext, permission: &'static str) -> Result<(), AuthzError> {
    authorize(principal.principal(), &Permission::new(permission))
}

/// [`require`], mapped to a 403 response.
pub fn require_or_forbidden(principal: &PrincipalContext, permission: &'static str) -> Result<(), Response> {
    require(principal, permission)
        .map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_auth::Role;
    use bazaar_core::UserId;

    #[test]
    fn customers_cannot_manage_listings() {
        let customer = PrincipalContext::new(UserId::new(), vec![Role::CUSTOMER]);
        assert!(require(&customer, "orders.create").is_ok());
        assert_eq!(
            require(&customer, "listings.manage"),
            Err(AuthzError::Forbidden("listings.manage".to_string()))
        );
    }

    #[test]
    fn merchant_roles_share_seller_permissions() {
        let owner = PrincipalContext::new(UserId::new(), vec![Role::SHOP_OWNER]);
        assert!(require(&owner, "listings.manage").is_ok());
        assert!(require(&owner, "payouts.read").is_ok());
        assert!(require(&owner, "payouts.run").is_err());
    }

    #[test]
    fn admin_holds_every_permission() {
        let admin = PrincipalContext::new(UserId::new(), vec![Role::ADMIN]);
        assert!(require(&admin, "payouts.run").is_ok());
        assert!(require(&admin, "payments.refund").is_ok());
    }
}
