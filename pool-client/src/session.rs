//! Binds an HTTP session to a specific source IPv6 address.
//!
//! Composition, not inheritance: a `Session` holds a standard HTTP client
//! and a current-address field; `adapt` swaps in a freshly built client
//! whose connector binds new sockets to the chosen address, which is what
//! actually drops stale keep-alive connections from the previous binding.

use std::net::Ipv6Addr;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ipv6_pool_core::{Address, AddrReportInfo, ClientConfig, PoolError, ReportStatus};
use tower_service::Service;

use crate::rpc_client::RpcClient;

/// The two non-bound capabilities plus the bound one, unified behind a
/// single request method so `Session` doesn't need to know which variant
/// is active.
enum Transport {
    Family(Client<FamilyConnector, Full<Bytes>>),
    Bound(ipv6_pool_net::BoundClient),
}

impl Transport {
    async fn request(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        match self {
            Self::Family(client) => client.request(req).await,
            Self::Bound(client) => client.request(req).await,
        }
    }
}

/// Installs a connection factory and remembers which address family (or
/// exact address) it resolves to.
pub struct SessionAdapter {
    transport: Transport,
}

impl SessionAdapter {
    /// Restricts address-family resolution to IPv4; no source pinning.
    pub fn force_ipv4() -> Self {
        Self {
            transport: Transport::Family(family_client(Family::V4)),
        }
    }

    /// Restricts address-family resolution to IPv6; no source pinning.
    pub fn force_ipv6() -> Self {
        Self {
            transport: Transport::Family(family_client(Family::V6)),
        }
    }

    /// Binds new sockets to `(ip, 0)`. Building a fresh `Client` here --
    /// rather than mutating an existing one -- is what invalidates pooled
    /// keep-alive connections sourced from whatever address was bound
    /// before.
    pub fn adapt(ip: Ipv6Addr) -> Self {
        Self {
            transport: Transport::Bound(ipv6_pool_net::build_client(ipv6_pool_net::BoundConnector::new(ip))),
        }
    }

    pub async fn request(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, PoolError> {
        self.transport.request(req).await.map_err(|e| PoolError::Internal(e.into()))
    }
}

#[derive(Clone, Copy, Debug)]
enum Family {
    V4,
    V6,
}

fn family_client(family: Family) -> Client<FamilyConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build(FamilyConnector { family })
}

/// Resolves the URI's host through the system resolver and connects to
/// the first address of the requested family, without binding a specific
/// source -- the counterpart to `BoundConnector` for the two capabilities
/// that don't pin an address.
#[derive(Clone)]
struct FamilyConnector {
    family: Family,
}

impl Service<http::Uri> for FamilyConnector {
    type Response = hyper_util::rt::TokioIo<tokio::net::TcpStream>;
    type Error = std::io::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: http::Uri) -> Self::Future {
        let family = self.family;
        Box::pin(async move {
            let host = uri
                .host()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "URI has no host"))?;
            let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
                Some("https") => 443,
                _ => 80,
            });
            let candidates = tokio::net::lookup_host((host, port)).await?;
            let dst = candidates
                .filter(|addr| match family {
                    Family::V4 => addr.is_ipv4(),
                    Family::V6 => addr.is_ipv6(),
                })
                .next()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address of requested family"))?;
            let stream = tokio::net::TcpStream::connect(dst).await?;
            stream.set_nodelay(true).ok();
            Ok(hyper_util::rt::TokioIo::new(stream))
        })
    }
}

/// A scraping session bound to one pool-managed source address at a time.
pub struct Session {
    rpc: RpcClient,
    dbname: String,
    config: ClientConfig,
    adapter: SessionAdapter,
    current_addr: Address,
}

impl Session {
    /// Builds a session and calls `adapt()` once so it starts bound to an
    /// address.
    pub async fn new(config: ClientConfig) -> Result<Self, PoolError> {
        let rpc = RpcClient::new(config.server_url.clone(), config.request_timeout);
        let mut session = Self {
            rpc,
            dbname: config.dbname.clone(),
            config,
            adapter: SessionAdapter::force_ipv6(),
            current_addr: Address::new(Ipv6Addr::UNSPECIFIED),
        };
        session.adapt().await?;
        Ok(session)
    }

    pub fn current_addr(&self) -> Address {
        self.current_addr
    }

    /// Picks a fresh address from the pool, retrying on `NoAddress` up to
    /// `adapt_max_retries`, and rebinds this session's transport to it.
    pub async fn adapt(&mut self) -> Result<(), PoolError> {
        self.adapt_inner(None).await
    }

    /// As `adapt`, but the retry wait is interruptible: a change on `cancel`
    /// aborts the loop with `PoolError::Cancelled`.
    pub async fn adapt_cancellable(&mut self, cancel: &mut tokio::sync::watch::Receiver<bool>) -> Result<(), PoolError> {
        self.adapt_inner(Some(cancel)).await
    }

    async fn adapt_inner(&mut self, mut cancel: Option<&mut tokio::sync::watch::Receiver<bool>>) -> Result<(), PoolError> {
        let mut attempts: u32 = 0;
        loop {
            match self.rpc.pick(&self.dbname).await {
                Ok(addr) => {
                    self.adapter = SessionAdapter::adapt(addr.octets());
                    self.current_addr = addr;
                    return Ok(());
                }
                Err(PoolError::NoAddress) => {
                    attempts += 1;
                    if attempts > self.config.adapt_max_retries {
                        return Err(PoolError::PoolExhausted { retries: attempts });
                    }
                    match cancel.as_deref_mut() {
                        Some(rx) => {
                            tokio::select! {
                                _ = tokio::time::sleep(self.config.adapt_retry_interval) => {}
                                _ = rx.changed() => return Err(PoolError::Cancelled),
                            }
                        }
                        None => tokio::time::sleep(self.config.adapt_retry_interval).await,
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reports the current address's outcome and stops using it for
    /// further requests until the next `adapt`. Never blocks past the
    /// client's configured request timeout.
    pub async fn report(&self, status: ReportStatus, reason: Option<String>) -> Result<bool, PoolError> {
        self.rpc
            .report(
                &self.dbname,
                AddrReportInfo {
                    addr: self.current_addr,
                    status,
                    reason,
                },
            )
            .await
    }

    /// Issues a request over the session's currently-bound transport.
    pub async fn request(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, PoolError> {
        self.adapter.request(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_constants_are_well_formed() {
        let config = ClientConfig::default();
        assert_eq!(config.dbname, "default");
        assert!(config.request_timeout > Duration::from_secs(0));
    }
}
