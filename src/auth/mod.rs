//! Authentication Module
//! Mission: Secure API access with bcrypt credentials, JWT tokens and RBAC

pub mod gate;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod resolver;

pub use gate::{AdminOnly, AnyRole, RoleGate, Staff};
pub use jwt::JwtHandler;
pub use middleware::{require_auth, AuthError, AuthState, Authorized};
pub use password::Credentials;
pub use resolver::IdentityResolver;
