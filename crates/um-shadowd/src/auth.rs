//! Authorization seam for local shadow operations.
//!
//! Policy storage lives in the host runtime; the service only consumes
//! this trait and maps denials to `Unauthorized`.

use async_trait::async_trait;

use um_protocol::errors::ShadowError;

/// Decides whether a local caller may perform an operation on a shadow.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        operation: &str,
        thing_name: &str,
        shadow_name: &str,
    ) -> Result<(), ShadowError>;
}

/// Permits everything. Default wiring for deployments where the host
/// broker already gates access.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _: &str, _: &str, _: &str) -> Result<(), ShadowError> {
        Ok(())
    }
}

/// Denies everything. Used in tests.
pub struct DenyAll;

#[async_trait]
impl Authorizer for DenyAll {
    async fn authorize(
        &self,
        operation: &str,
        thing_name: &str,
        _shadow_name: &str,
    ) -> Result<(), ShadowError> {
        Err(ShadowError::Unauthorized(format!(
            "{operation} not authorized for {thing_name}"
        )))
    }
}
