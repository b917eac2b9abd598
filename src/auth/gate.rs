//! Role Gate
//! Mission: Allow-list authorization by exact role membership

use crate::auth::middleware::AuthError;
use crate::auth::models::{Identity, Role};
use tracing::warn;

/// Exact membership test. There is no hierarchy: `admin` does not satisfy
/// a list that only names `moderator`.
pub fn authorize(identity: &Identity, allowed: &[Role]) -> bool {
    allowed.contains(&identity.role)
}

/// Compile-time allow-list attached to a route through `Authorized<P>`.
pub trait AllowList: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

/// Administrators only.
pub struct AdminOnly;

/// Administrators and moderators.
pub struct Staff;

/// Any authenticated account.
pub struct AnyRole;

impl AllowList for AdminOnly {
    const ROLES: &'static [Role] = &[Role::Admin];
}

impl AllowList for Staff {
    const ROLES: &'static [Role] = &[Role::Admin, Role::Moderator];
}

impl AllowList for AnyRole {
    const ROLES: &'static [Role] = &Role::ALL;
}

/// Role check bound to one allow-list.
#[derive(Debug, Clone, Copy)]
pub struct RoleGate {
    allowed: &'static [Role],
}

impl RoleGate {
    pub const fn new(allowed: &'static [Role]) -> Self {
        Self { allowed }
    }

    pub const fn of<P: AllowList>() -> Self {
        Self::new(P::ROLES)
    }

    pub fn allowed(&self) -> &'static [Role] {
        self.allowed
    }

    pub fn check(&self, identity: &Identity) -> Result<(), AuthError> {
        if authorize(identity, self.allowed) {
            return Ok(());
        }
        warn!(
            "🚫 User {} ({}) denied, route requires one of {:?}",
            identity.id, identity.role, self.allowed
        );
        Err(AuthError::Forbidden)
    }
}
