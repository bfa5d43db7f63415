mod headers;
mod response;

pub mod factory;
pub mod handler;
pub mod reconcile;
pub mod route;
pub mod server;
pub mod store;
pub mod tls;

pub use headers::HOP_BY_HOP_HEADERS;
