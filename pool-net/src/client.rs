use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::connector::BoundConnector;

pub type BoundClient = Client<BoundConnector, Full<Bytes>>;

/// Builds an HTTP/1.1 client whose every connection sources from `connector`.
/// Each call returns a fresh client with an empty connection pool, which is
/// how rebinding to a new source address is made to take effect immediately.
pub fn build_client(connector: BoundConnector) -> BoundClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .build(connector)
}
