use std::collections::HashSet;
use std::net::IpAddr;

use actix_web::http::header::{
    HeaderMap as IngressHeaderMap, HeaderName as IngressHeaderName,
    HeaderValue as IngressHeaderValue,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Headers that only apply to a single transport hop and are never
/// forwarded, in either direction.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Header names listed in `Connection`, which are hop-by-hop for this
/// message too.
fn connection_tokens<'a>(values: impl Iterator<Item = &'a [u8]>) -> HashSet<String> {
    values
        .filter_map(|v| std::str::from_utf8(v).ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Build the headers of the upstream request: everything the client sent
/// except hop-by-hop headers and `Host`, plus the client address appended
/// to `X-Forwarded-For`.
pub fn upstream_request_headers(src: &IngressHeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let extra = connection_tokens(src.get_all("connection").map(|v| v.as_bytes()));

    let mut forwarded_for: Vec<String> = vec![];
    let mut dst = HeaderMap::with_capacity(src.len() + 1);
    for (name, value) in src.iter() {
        let name = name.as_str();
        if is_hop_by_hop(name) || extra.contains(name) || name == "host" {
            continue;
        }
        if name == X_FORWARDED_FOR {
            if let Ok(value) = value.to_str() {
                forwarded_for.push(value.trim().to_string());
            }
            continue;
        }

        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        dst.append(name, value);
    }

    if let Some(ip) = client_ip {
        forwarded_for.push(ip.to_string());
    }
    if !forwarded_for.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&forwarded_for.join(", ")) {
            dst.insert(X_FORWARDED_FOR, value);
        }
    }

    dst
}

/// Headers of the upstream response to copy back to the client. Framing is
/// left to the ingress server, so `Content-Length` is dropped as well.
pub fn client_response_headers(src: &HeaderMap) -> Vec<(IngressHeaderName, IngressHeaderValue)> {
    let extra = connection_tokens(src.get_all("connection").iter().map(|v| v.as_bytes()));

    src.iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !is_hop_by_hop(name) && !extra.contains(name) && name != "content-length"
        })
        .filter_map(|(name, value)| {
            let name = IngressHeaderName::from_bytes(name.as_str().as_bytes()).ok()?;
            let value = IngressHeaderValue::from_bytes(value.as_bytes()).ok()?;
            Some((name, value))
        })
        .collect()
}
