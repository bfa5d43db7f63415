pub mod client;
pub mod config;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::resource::{Identity, ProxyResource};
use crate::types::response::ErrorResponse;

/// Source of the proxy route descriptors.
///
/// Implementations return the complete set of resources or an error, never a
/// partial list. Pagination of the backing API is hidden behind this call.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<ProxyResource>, ApiError>;
}

/// Decides whether a caller may perform `action` on the resource `urn`.
///
/// An `Err` means the decision could not be made (the authorizer is
/// unavailable); callers must not treat it as a denial nor retry it.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        identity: &Identity,
        urn: &str,
        action: &str,
    ) -> Result<AuthzDecision, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow,
    Deny(ErrorResponse),
}

pub const UNAUTHORIZED_RESOURCES_ERROR: &str = "UNAUTHORIZED_RESOURCES_ERROR";

impl AuthzDecision {
    pub fn unauthorized() -> Self {
        Self::Deny(ErrorResponse::new(
            UNAUTHORIZED_RESOURCES_ERROR,
            "Unauthorized",
        ))
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server error: status {status}, {message}")]
    Status { status: u16, message: String },

    #[error("server returned invalid json: {0}")]
    InvalidJson(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}
