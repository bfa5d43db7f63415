use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::{expandenv, CommonConfig, PathSet};

/// Coordinates of the Authorization API the proxy reads its resources from
/// and asks for authorization decisions.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// Base url of the API, e.g. "https://foulkon.local:8000". Required.
    #[serde(default = "ApiConfig::default_endpoint")]
    pub endpoint: String,

    /// PEM file with the CA certificate to trust when the endpoint uses
    /// https. Empty means system roots only.
    #[serde(default = "ApiConfig::default_cert_path")]
    pub cert_path: String,

    /// Page size used when listing proxy resources.
    #[serde(default = "ApiConfig::default_page_limit")]
    pub page_limit: usize,
}

impl CommonConfig for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            cert_path: Self::default_cert_path(),
            page_limit: Self::default_page_limit(),
        }
    }

    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        self.endpoint = expandenv("endpoint", &self.endpoint)?;
        if self.endpoint.is_empty() {
            bail!("endpoint cannot be empty");
        }
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint url '{}'", self.endpoint))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => bail!("invalid endpoint scheme, expect 'http' or 'https', not '{scheme}'"),
        }

        self.cert_path = ps.resolve(&expandenv("cert_path", &self.cert_path)?);

        if self.page_limit < Self::MIN_PAGE_LIMIT || self.page_limit > Self::MAX_PAGE_LIMIT {
            bail!(
                "page_limit should be in range [{},{}], found {}",
                Self::MIN_PAGE_LIMIT,
                Self::MAX_PAGE_LIMIT,
                self.page_limit
            );
        }

        Ok(())
    }
}

impl ApiConfig {
    const MIN_PAGE_LIMIT: usize = 1;
    const MAX_PAGE_LIMIT: usize = 1000;

    pub fn default_endpoint() -> String {
        String::new()
    }

    pub fn default_cert_path() -> String {
        String::new()
    }

    pub fn default_page_limit() -> usize {
        Self::MAX_PAGE_LIMIT
    }
}
