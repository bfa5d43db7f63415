use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Certificate, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::types::resource::{
    AuthorizeRequest, AuthorizeResponse, Identity, ProxyResource, ResourcesPage,
};
use crate::types::response::ErrorResponse;

use super::config::ApiConfig;
use super::{ApiError, Authorizer, AuthzDecision, ResourceStore};

/// HTTP client of the Authorization API. It is both the resource store the
/// reconciliation loop reads and the authorizer consulted per request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    endpoint: Url,
    client: reqwest::Client,
    identity_header: String,
    page_limit: usize,
}

impl ApiClient {
    const RESOURCES_PATH: &'static str = "api/v1/proxy/resources";
    const AUTHORIZE_PATH: &'static str = "api/v1/authorize";

    pub fn new(cfg: &ApiConfig, identity_header: &str, timeout: Duration) -> Result<Self> {
        // A trailing slash keeps the endpoint path when joining.
        let mut endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        endpoint.push('/');
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid api endpoint '{}'", cfg.endpoint))?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !cfg.cert_path.is_empty() && endpoint.scheme() == "https" {
            let data = fs::read(&cfg.cert_path)
                .with_context(|| format!("read api cert file '{}'", cfg.cert_path))?;
            let cert = Certificate::from_pem(&data).context("load api cert file")?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("build api client")?;

        Ok(Self {
            endpoint,
            client,
            identity_header: identity_header.to_string(),
            page_limit: cfg.page_limit,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.endpoint
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn list_page(&self, offset: usize) -> Result<ResourcesPage, ApiError> {
        let mut url = self.url(Self::RESOURCES_PATH)?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &self.page_limit.to_string());

        let resp = self.client.get(url).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::InvalidJson(format!("{e}: {body}")))
    }

    fn status_error(status: StatusCode, body: &str) -> ApiError {
        let message = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(err) => format!("{}: {}", err.code, err.message),
            Err(_) => body.to_string(),
        };
        ApiError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ResourceStore for ApiClient {
    async fn list_resources(&self) -> Result<Vec<ProxyResource>, ApiError> {
        let mut resources = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.list_page(offset).await?;
            let count = page.resources.len();
            resources.extend(page.resources);
            offset += count;

            if count == 0 || offset >= page.total {
                break;
            }
        }

        debug!("Listed {} proxy resources", resources.len());
        Ok(resources)
    }
}

#[async_trait]
impl Authorizer for ApiClient {
    async fn authorize(
        &self,
        identity: &Identity,
        urn: &str,
        action: &str,
    ) -> Result<AuthzDecision, ApiError> {
        let url = self.url(Self::AUTHORIZE_PATH)?;
        let req = AuthorizeRequest {
            action: action.to_string(),
            resources: vec![urn.to_string()],
        };

        let resp = self
            .client
            .post(url)
            .header(self.identity_header.as_str(), identity.value.as_str())
            .json(&req)
            .send()
            .await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let status = resp.status();
                let body = resp.text().await?;
                match serde_json::from_str::<ErrorResponse>(&body) {
                    Ok(err) => Ok(AuthzDecision::Deny(err)),
                    Err(_) => Err(Self::status_error(status, &body)),
                }
            }
            _ => {
                let resp: AuthorizeResponse = Self::decode(resp).await?;
                if resp.resources_allowed.iter().any(|allowed| allowed == urn) {
                    Ok(AuthzDecision::Allow)
                } else {
                    Ok(AuthzDecision::unauthorized())
                }
            }
        }
    }
}
