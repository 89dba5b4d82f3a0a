use std::future::Future;
use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Uri;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpSocket, TcpStream};
use tower_service::Service;
use tracing::trace;

/// A `hyper`/`tower` connector that binds every outbound TCP connection's
/// local socket to a fixed IPv6 source address before `connect`.
///
/// Cloning produces an independent connector bound to the same address; a
/// `SessionAdapter::adapt` call discards the old connector (and the client
/// built on it) entirely rather than mutating this one in place, which is
/// what actually drops the stale keep-alive pool -- there is nothing here
/// to "invalidate", the old `Client` simply stops being used.
#[derive(Clone, Debug)]
pub struct BoundConnector {
    source: Ipv6Addr,
}

impl BoundConnector {
    pub fn new(source: Ipv6Addr) -> Self {
        Self { source }
    }

    pub fn source(&self) -> Ipv6Addr {
        self.source
    }

    async fn connect(source: Ipv6Addr, uri: Uri) -> io::Result<TokioIo<TcpStream>> {
        let host = uri
            .host()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URI has no host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

        let candidates = tokio::net::lookup_host((host, port)).await?;
        let dst = candidates
            .filter(|addr| addr.is_ipv6())
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no IPv6 address for host"))?;

        let socket = TcpSocket::new_v6()?;
        socket.bind(SocketAddr::new(source.into(), 0))?;
        trace!(%source, %dst, "binding outbound connection");
        let stream = socket.connect(dst).await?;
        stream.set_nodelay(true).ok();
        Ok(TokioIo::new(stream))
    }
}

impl Service<Uri> for BoundConnector {
    type Response = TokioIo<TcpStream>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<TokioIo<TcpStream>>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let source = self.source;
        Box::pin(Self::connect(source, uri))
    }
}
