use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles travel as opaque strings in tokens; the well-known marketplace roles
/// are provided as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const CUSTOMER: Role = Role(Cow::Borrowed("customer"));
    pub const SELLER: Role = Role(Cow::Borrowed("seller"));
    /// Service provider fulfilling bookings.
    pub const SEEKER: Role = Role(Cow::Borrowed("seeker"));
    pub const SHOP_OWNER: Role = Role(Cow::Borrowed("shop_owner"));
    pub const CLUB_OWNER: Role = Role(Cow::Borrowed("club_owner"));
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Roles that list goods, tickets or services and receive payouts.
    pub fn is_merchant(&self) -> bool {
        matches!(
            self.as_str(),
            "seller" | "seeker" | "shop_owner" | "club_owner"
        )
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
