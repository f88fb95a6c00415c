use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "orders.create").
/// The wildcard permission `"*"` means "allow all" and is granted to admins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

const CUSTOMER_PERMISSIONS: &[&str] = &[
    "orders.create",
    "orders.read",
    "orders.cancel",
    "orders.delete",
    "payments.confirm",
];

const MERCHANT_PERMISSIONS: &[&str] = &[
    "listings.manage",
    "subscriptions.manage",
    "orders.read",
    "orders.fulfil",
    "orders.delete",
    "commissions.read",
    "payouts.read",
    "stats.read",
];

/// Static role -> permission policy.
///
/// Ownership of individual orders and listings is checked by the domain; this
/// only decides which kinds of operation a role may attempt at all.
pub fn role_permissions(role: &str) -> Vec<Permission> {
    let granted: &[&'static str] = match role {
        "admin" => return vec![Permission::WILDCARD],
        "customer" => CUSTOMER_PERMISSIONS,
        "seller" | "seeker" | "shop_owner" | "club_owner" => MERCHANT_PERMISSIONS,
        _ => &[],
    };

    granted.iter().map(|p| Permission::new(*p)).collect()
}
