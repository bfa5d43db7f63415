use actix_web::http::header::ALLOW;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, HttpResponseBuilder};

use crate::types::response::ErrorResponse;

pub const NOT_FOUND: &str = "NOT_FOUND";
pub const METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";
pub const UNAUTHENTICATED_ERROR: &str = "UNAUTHENTICATED_ERROR";
pub const AUTHORIZATION_UNAVAILABLE: &str = "AUTHORIZATION_UNAVAILABLE";
pub const BAD_GATEWAY: &str = "BAD_GATEWAY";

/// A wrapper struct for the error responses the proxy answers by itself.
/// Every body has the shape `{"code": "...", "message": "..."}`.
pub struct Response {
    http_response: HttpResponse,
}

impl Response {
    pub fn not_found(method: &str, path: &str) -> Self {
        let message = format!("No route to {method} {path}");
        Self::err_response(StatusCode::NOT_FOUND, ErrorResponse::new(NOT_FOUND, message))
    }

    pub fn method_not_allowed(allowed: &[String]) -> Self {
        let body = ErrorResponse::new(METHOD_NOT_ALLOWED, "Method not allowed");
        Self {
            http_response: HttpResponseBuilder::new(StatusCode::METHOD_NOT_ALLOWED)
                .insert_header((ALLOW, allowed.join(", ")))
                .json(body),
        }
    }

    pub fn forbidden(reason: ErrorResponse) -> Self {
        Self::err_response(StatusCode::FORBIDDEN, reason)
    }

    pub fn unauthenticated(header: &str) -> Self {
        let message = format!("Missing caller identity header '{header}'");
        Self::err_response(
            StatusCode::FORBIDDEN,
            ErrorResponse::new(UNAUTHENTICATED_ERROR, message),
        )
    }

    pub fn authorization_unavailable() -> Self {
        Self::err_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(
                AUTHORIZATION_UNAVAILABLE,
                "Authorization service unavailable",
            ),
        )
    }

    pub fn bad_gateway() -> Self {
        Self::err_response(
            StatusCode::BAD_GATEWAY,
            ErrorResponse::new(BAD_GATEWAY, "Upstream request failed"),
        )
    }

    fn err_response(status: StatusCode, body: ErrorResponse) -> Self {
        Self {
            http_response: HttpResponseBuilder::new(status).json(body),
        }
    }
}

impl From<Response> for HttpResponse {
    fn from(val: Response) -> Self {
        val.http_response
    }
}
