//! Shared HTTP transport for the pool server's `Checker` and the client's
//! `SessionAdapter`: both bind outbound connections to a chosen IPv6 source
//! address through the same `tower::Service<Uri>` connector.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod connector;

pub use client::{build_client, BoundClient};
pub use connector::BoundConnector;
