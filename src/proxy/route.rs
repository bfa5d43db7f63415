use std::collections::HashMap;

use actix_web::http::Method;
use anyhow::{bail, Context, Result};
use log::warn;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::types::resource::ProxyResource;

/// An immutable snapshot of the proxy routes.
///
/// Built from a list of [`ProxyResource`] and never modified afterwards; a
/// new table replaces the old one wholesale.
pub struct RouteTable {
    /// Published resources, indexed by the routers.
    resources: Vec<ProxyResource>,

    routers: HashMap<String, matchit::Router<usize>>,

    revision: String,
}

/// The result of dispatching a request against a [`RouteTable`].
#[derive(Debug)]
pub enum RouteLookup<'a> {
    Matched {
        resource: &'a ProxyResource,
        params: Vec<(String, String)>,
    },

    /// The path is known but not for this method. `allowed` lists the
    /// methods that do match, sorted.
    MethodNotAllowed { allowed: Vec<String> },

    NotFound,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self::build(vec![])
    }

    /// Compile resources into a table. Resources that cannot be served are
    /// skipped with a warning, the rest is kept.
    pub fn build(resources: Vec<ProxyResource>) -> Self {
        let resources = canonicalize(resources);
        let revision = revision_of(&resources);

        let mut published: Vec<ProxyResource> = Vec::with_capacity(resources.len());
        let mut routers: HashMap<String, matchit::Router<usize>> = HashMap::new();
        for rsc in resources {
            if let Err(err) = validate(&rsc) {
                warn!("Skip proxy resource '{}': {err:#}", rsc.id);
                continue;
            }

            let pattern = convert_pattern(&rsc.path_pattern);
            let router = routers.entry(rsc.method.clone()).or_default();
            if let Err(err) = router.insert(pattern, published.len()) {
                warn!(
                    "Skip proxy resource '{}': route {} {} conflicts: {err}",
                    rsc.id, rsc.method, rsc.path_pattern
                );
                continue;
            }
            published.push(rsc);
        }

        Self {
            resources: published,
            routers,
            revision,
        }
    }

    pub fn lookup(&self, method: &str, path: &str) -> RouteLookup<'_> {
        if let Some(router) = self.routers.get(method) {
            if let Ok(matched) = router.at(path) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                return RouteLookup::Matched {
                    resource: &self.resources[*matched.value],
                    params,
                };
            }
        }

        let mut allowed: Vec<String> = self
            .routers
            .iter()
            .filter(|(m, router)| m.as_str() != method && router.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return RouteLookup::NotFound;
        }
        allowed.sort();
        RouteLookup::MethodNotAllowed { allowed }
    }

    /// Content hash of the resources this table was built from. Two tables
    /// built from the same resources, in any order, share a revision.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn resources(&self) -> &[ProxyResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Compute the revision a table built from `resources` would have.
pub fn revision(resources: &[ProxyResource]) -> String {
    revision_of(&canonicalize(resources.to_vec()))
}

fn revision_of(canonical: &[ProxyResource]) -> String {
    let mut hasher = Sha256::new();
    for rsc in canonical {
        // serde_json keeps struct field order, which makes this stable.
        let data = serde_json::to_vec(rsc).unwrap_or_default();
        hasher.update((data.len() as u64).to_be_bytes());
        hasher.update(&data);
    }
    format!("{:x}", hasher.finalize())
}

fn canonicalize(mut resources: Vec<ProxyResource>) -> Vec<ProxyResource> {
    for rsc in resources.iter_mut() {
        rsc.method = rsc.method.trim().to_uppercase();
        // The router rejects empty paths.
        if rsc.path_pattern.is_empty() {
            rsc.path_pattern = String::from("/");
        }
    }
    resources.sort();
    resources
}

fn validate(rsc: &ProxyResource) -> Result<()> {
    if rsc.method.is_empty() {
        bail!("method is empty");
    }
    Method::from_bytes(rsc.method.as_bytes())
        .with_context(|| format!("invalid method '{}'", rsc.method))?;

    if !rsc.path_pattern.starts_with('/') {
        bail!("path '{}' must start with '/'", rsc.path_pattern);
    }

    let url = Url::parse(&rsc.upstream_url)
        .with_context(|| format!("invalid upstream url '{}'", rsc.upstream_url))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => bail!("invalid upstream scheme '{scheme}'"),
    }

    Ok(())
}

/// Convert `:name` and `*name` parameters into the matcher syntax `{name}`
/// and `{*name}`.
fn convert_pattern(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ':' | '*' => {
                result.push('{');
                if ch == '*' {
                    result.push('*');
                }
                while let Some(c) = chars.next_if(|c| *c != '/') {
                    result.push(c);
                }
                result.push('}');
            }
            '{' => result.push_str("{{"),
            '}' => result.push_str("}}"),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, method: &str, path: &str) -> ProxyResource {
        ProxyResource {
            id: id.to_string(),
            method: method.to_string(),
            path_pattern: path.to_string(),
            upstream_url: format!("http://127.0.0.1:9000/{id}"),
            urn: format!("urn:iws:iam:org1:resource/{id}"),
            action: "read".to_string(),
        }
    }

    fn matched_id(table: &RouteTable, method: &str, path: &str) -> Option<String> {
        match table.lookup(method, path) {
            RouteLookup::Matched { resource, .. } => Some(resource.id.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_convert_pattern() {
        let cases = [
            ("/", "/"),
            ("/health", "/health"),
            (
                "/organizations/:org/groups/:name",
                "/organizations/{org}/groups/{name}",
            ),
            ("/files/*path", "/files/{*path}"),
            ("/raw/{literal}", "/raw/{{literal}}"),
        ];
        for (pattern, expect) in cases {
            assert_eq!(convert_pattern(pattern), expect, "{pattern}");
        }
    }

    #[test]
    fn test_lookup() {
        let table = RouteTable::build(vec![
            resource("get-a", "GET", "/a"),
            resource("post-b", "post", "/b"),
            resource("group", "GET", "/organizations/:org/groups/:name"),
        ]);
        assert_eq!(table.len(), 3);

        assert_eq!(matched_id(&table, "GET", "/a").as_deref(), Some("get-a"));
        assert_eq!(matched_id(&table, "POST", "/b").as_deref(), Some("post-b"));

        match table.lookup("GET", "/organizations/org1/groups/admins") {
            RouteLookup::Matched { resource, params } => {
                assert_eq!(resource.id, "group");
                assert_eq!(
                    params,
                    vec![
                        ("org".to_string(), "org1".to_string()),
                        ("name".to_string(), "admins".to_string()),
                    ]
                );
            }
            other => panic!("unexpected lookup result: {other:?}"),
        }

        assert!(matches!(table.lookup("GET", "/c"), RouteLookup::NotFound));
        assert!(matches!(
            table.lookup("DELETE", "/missing"),
            RouteLookup::NotFound
        ));
    }

    #[test]
    fn test_method_not_allowed() {
        let table = RouteTable::build(vec![
            resource("get-a", "GET", "/a"),
            resource("put-a", "PUT", "/a"),
        ]);

        match table.lookup("POST", "/a") {
            RouteLookup::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec!["GET".to_string(), "PUT".to_string()]);
            }
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_path() {
        let table = RouteTable::build(vec![resource("root", "GET", "")]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.resources()[0].path_pattern, "/");
        assert_eq!(matched_id(&table, "GET", "/").as_deref(), Some("root"));
    }

    #[test]
    fn test_skip_invalid() {
        let mut bad_upstream = resource("bad-upstream", "GET", "/x");
        bad_upstream.upstream_url = "not a url".to_string();

        let mut bad_scheme = resource("bad-scheme", "GET", "/y");
        bad_scheme.upstream_url = "ftp://127.0.0.1/".to_string();

        let table = RouteTable::build(vec![
            resource("ok", "GET", "/a"),
            resource("dup", "GET", "/a"),
            resource("relative", "GET", "relative"),
            resource("bad-method", "G E T", "/z"),
            bad_upstream,
            bad_scheme,
        ]);

        // Sorting keeps "dup" before "ok", so the first one wins.
        assert_eq!(table.len(), 1);
        assert_eq!(matched_id(&table, "GET", "/a").as_deref(), Some("dup"));
        assert!(matches!(table.lookup("GET", "/x"), RouteLookup::NotFound));
    }

    #[test]
    fn test_revision() {
        let a = resource("a", "GET", "/a");
        let b = resource("b", "POST", "/b");

        let t1 = RouteTable::build(vec![a.clone(), b.clone()]);
        let t2 = RouteTable::build(vec![b.clone(), a.clone()]);
        assert_eq!(t1.revision(), t2.revision());
        assert_eq!(t1.revision(), revision(&[a.clone(), b.clone()]));

        let mut changed = b.clone();
        changed.action = "write".to_string();
        let t3 = RouteTable::build(vec![a.clone(), changed]);
        assert_ne!(t1.revision(), t3.revision());

        assert_ne!(RouteTable::empty().revision(), t1.revision());
        assert_eq!(RouteTable::empty().revision(), revision(&[]));
    }
}
