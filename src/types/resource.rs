use serde::{Deserialize, Serialize};

/// One route descriptor served by the proxy.
///
/// A resource ties an HTTP `(method, path)` pair to the upstream the request
/// is forwarded to, and to the `(urn, action)` pair used to authorize it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProxyResource {
    pub id: String,

    pub method: String,

    /// Route pattern, `:name` matches one segment and `*name` the rest of
    /// the path. An empty pattern is served at `/`.
    #[serde(rename = "path", default = "default_string")]
    pub path_pattern: String,

    #[serde(rename = "upstream")]
    pub upstream_url: String,

    pub urn: String,

    pub action: String,
}

/// One page of resources returned by the Authorization API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesPage {
    #[serde(default = "default_vec")]
    pub resources: Vec<ProxyResource>,

    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub limit: usize,

    #[serde(default)]
    pub total: usize,
}

/// The authenticated caller, as carried by the incoming request.
///
/// The proxy never interprets the value, it is handed to the authorizer
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub value: String,
}

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub action: String,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "resourcesAllowed", default = "default_vec")]
    pub resources_allowed: Vec<String>,
}

fn default_string() -> String {
    String::new()
}

fn default_vec<T>() -> Vec<T> {
    vec![]
}
