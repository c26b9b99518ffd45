//! Authentication Module
//! Mission: Secure API access with JWT tokens, RBAC, and rate limiting

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::Claims;
