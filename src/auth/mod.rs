//! User verification against the external auth service.

mod user_verification;

pub use user_verification::{GrpcUserVerifier, UserRequest, UserResponse};

use async_trait::async_trait;

/// Checks whether a user exists. Lookup failures count as "does not exist".
#[async_trait]
pub trait UserVerifier: Send + Sync {
    async fn verify_user(&self, username: &str) -> bool;
}
