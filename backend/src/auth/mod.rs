//! Bearer token authentication.
//!
//! Tokens are issued elsewhere; this service only verifies them and turns
//! their claims into a workflow [`Actor`](crate::workflow::Actor).

pub mod jwt;
pub mod middleware;

pub use middleware::AuthUser;
