use std::io;
use std::sync::Arc;

use actix_web::body::SizedStream;
use actix_web::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use actix_web::http::{Method, StatusCode, Version};
use actix_web::web::{self, Bytes, Data};
use actix_web::{HttpRequest, HttpResponse};
use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use futures_util::{stream, StreamExt};
use log::{debug, error, info};
use reqwest::Url;
use tokio::sync::mpsc;

use crate::api::{Authorizer, AuthzDecision};
use crate::types::resource::{Identity, ProxyResource};

use super::headers::{client_response_headers, upstream_request_headers};
use super::response::Response;
use super::route::{RouteLookup, RouteTable};

/// Serves every ingress request: route lookup, authorization, then
/// forwarding to the upstream of the matched resource.
///
/// The handler keeps its own reference to the route table it dispatches
/// with. The server lifecycle replaces it with [`ProxyHandler::install`]
/// when a new table is published; requests already running keep the table
/// they started with.
pub struct ProxyHandler {
    routes: ArcSwap<RouteTable>,
    authorizer: Arc<dyn Authorizer>,
    client: reqwest::Client,
    identity_header: String,
}

impl ProxyHandler {
    const BODY_CHANNEL_SIZE: usize = 16;

    pub fn new(
        routes: Arc<RouteTable>,
        authorizer: Arc<dyn Authorizer>,
        client: reqwest::Client,
        identity_header: impl Into<String>,
    ) -> Self {
        Self {
            routes: ArcSwap::new(routes),
            authorizer,
            client,
            identity_header: identity_header.into(),
        }
    }

    pub fn install(&self, routes: Arc<RouteTable>) {
        self.routes.store(routes);
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    /// Entry point registered as the default service of the ingress app.
    pub async fn handle(
        req: HttpRequest,
        payload: web::Payload,
        handler: Data<ProxyHandler>,
    ) -> HttpResponse {
        handler.dispatch(req, payload).await
    }

    pub async fn dispatch(&self, req: HttpRequest, payload: web::Payload) -> HttpResponse {
        // Loaded once, the whole request is served by this snapshot.
        let routes = self.routes.load_full();

        let method = req.method().as_str();
        let path = req.path();
        let (resource, params) = match routes.lookup(method, path) {
            RouteLookup::Matched { resource, params } => (resource, params),
            RouteLookup::MethodNotAllowed { allowed } => {
                debug!("{method} {path}: method not allowed");
                return Response::method_not_allowed(&allowed).into();
            }
            RouteLookup::NotFound => {
                debug!("{method} {path}: no route");
                return Response::not_found(method, path).into();
            }
        };
        debug!(
            "{method} {path}: matched resource '{}', params {params:?}",
            resource.id
        );

        let identity = match self.identity(&req) {
            Some(identity) => identity,
            None => {
                info!(
                    "{method} {path}: rejected, missing identity header '{}'",
                    self.identity_header
                );
                return Response::unauthenticated(&self.identity_header).into();
            }
        };

        match self
            .authorizer
            .authorize(&identity, &resource.urn, &resource.action)
            .await
        {
            Ok(AuthzDecision::Allow) => {}
            Ok(AuthzDecision::Deny(reason)) => {
                info!(
                    "{method} {path}: denied '{}' on '{}': {}",
                    resource.action, resource.urn, reason.code
                );
                return Response::forbidden(reason).into();
            }
            Err(err) => {
                error!("{method} {path}: authorization unavailable: {err:#}");
                return Response::authorization_unavailable().into();
            }
        }

        match self.forward(&req, payload, resource).await {
            Ok(resp) => {
                debug!(
                    "{method} {path}: upstream '{}' answered {}",
                    resource.upstream_url,
                    resp.status()
                );
                resp
            }
            Err(err) => {
                error!(
                    "{method} {path}: forward to upstream '{}' error: {err:#}",
                    resource.upstream_url
                );
                Response::bad_gateway().into()
            }
        }
    }

    fn identity(&self, req: &HttpRequest) -> Option<Identity> {
        let value = req.headers().get(self.identity_header.as_str())?;
        let value = value.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }
        Some(Identity::new(value))
    }

    async fn forward(
        &self,
        req: &HttpRequest,
        payload: web::Payload,
        resource: &ProxyResource,
    ) -> Result<HttpResponse> {
        let url = upstream_url(&resource.upstream_url, req.query_string())?;
        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .context("convert request method")?;
        let headers = upstream_request_headers(req.headers(), req.peer_addr().map(|a| a.ip()));

        let mut upstream = self.client.request(method, url).headers(headers);
        let body = match Self::request_body(req) {
            RequestBody::Empty => None,
            RequestBody::Framed => Some(Self::stream_body(payload, None)),
            RequestBody::Unknown => {
                // Wait for the first chunk to tell an empty body apart.
                let mut payload = payload;
                match payload.next().await {
                    Some(first) => {
                        let first = first.map_err(|e| anyhow!("read request body: {e}"))?;
                        Some(Self::stream_body(payload, Some(first)))
                    }
                    None => None,
                }
            }
        };
        if let Some(body) = body {
            upstream = upstream.body(body);
        }

        // Dropping this future, e.g. when the client goes away, cancels the
        // upstream request. The server must not allow half-closed
        // connections for that to happen.
        let resp = upstream.send().await.context("send upstream request")?;

        let status =
            StatusCode::from_u16(resp.status().as_u16()).context("convert upstream status")?;
        let mut builder = HttpResponse::build(status);
        for header in client_response_headers(resp.headers()) {
            builder.append_header(header);
        }

        // A HEAD response has no body but announces the length of the GET one.
        let length = if req.method() == Method::HEAD {
            resp.headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        } else {
            resp.content_length()
        };
        let body = resp.bytes_stream();
        Ok(match length {
            Some(length) => builder.body(SizedStream::new(length, body)),
            None => builder.streaming(body),
        })
    }

    fn request_body(req: &HttpRequest) -> RequestBody {
        let headers = req.headers();
        if headers.contains_key(TRANSFER_ENCODING) {
            return RequestBody::Framed;
        }
        if let Some(length) = headers.get(CONTENT_LENGTH) {
            return match length.to_str() {
                Ok(length) if length.trim() == "0" => RequestBody::Empty,
                _ => RequestBody::Framed,
            };
        }
        // HTTP/2 frames the body itself and may omit Content-Length.
        if req.version() < Version::HTTP_2 {
            RequestBody::Empty
        } else {
            RequestBody::Unknown
        }
    }

    /// The ingress payload is bound to its worker thread, the upstream body
    /// must be `Send`: pump chunks through a bounded channel.
    fn stream_body(mut payload: web::Payload, first: Option<Bytes>) -> reqwest::Body {
        let (tx, mut rx) = mpsc::channel::<Result<Bytes, io::Error>>(Self::BODY_CHANNEL_SIZE);
        actix_web::rt::spawn(async move {
            if let Some(chunk) = first {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            while let Some(chunk) = payload.next().await {
                let chunk = chunk.map_err(|e| io::Error::other(e.to_string()));
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });

        let body = stream::poll_fn(move |cx| rx.poll_recv(cx));
        reqwest::Body::wrap_stream(body)
    }
}

/// How the ingress request delimits its body.
enum RequestBody {
    Empty,
    Framed,
    Unknown,
}

/// The upstream url of a resource, with the query of the incoming request
/// appended.
fn upstream_url(upstream: &str, query: &str) -> Result<Url> {
    let mut url =
        Url::parse(upstream).with_context(|| format!("parse upstream url '{upstream}'"))?;
    if !query.is_empty() {
        let merged = match url.query() {
            Some(q) if !q.is_empty() => format!("{q}&{query}"),
            _ => query.to_string(),
        };
        url.set_query(Some(&merged));
    }
    Ok(url)
}
