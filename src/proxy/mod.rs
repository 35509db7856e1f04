//! The request lifecycle pipeline: host-based upstream resolution, streaming
//! bidirectional forwarding with bounded in-memory capture, and record
//! assembly for the persistence stack.

pub mod body;
pub mod capture;
pub mod handler;
pub mod headers;
pub mod http_client;

pub use capture::BoundedCapture;
pub use handler::{ProxyHandler, TAG_HEADER};
