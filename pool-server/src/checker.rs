//! Probes a candidate address by sourcing an outbound HTTP request from it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http_body_util::{BodyExt, Full};
use ipv6_pool_core::Address;
use ipv6_pool_net::BoundConnector;

/// The actual probe mechanics, behind a trait so `Checker` can be driven by
/// a fake in tests without binding a real socket.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: Address) -> anyhow::Result<bool>;
}

/// Sources an outbound GET from `addr` and compares the response body
/// against `addr`'s canonical textual form.
pub struct HttpProber {
    check_url: http::Uri,
    timeout: Duration,
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, addr: Address) -> anyhow::Result<bool> {
        let connector = BoundConnector::new(addr.octets());
        let client = ipv6_pool_net::build_client(connector);
        let request = http::Request::get(self.check_url.clone()).body(Full::<Bytes>::default())?;

        let response = tokio::time::timeout(self.timeout, client.request(request)).await??;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body = response.into_body().collect().await?.to_bytes();
        let echoed = std::str::from_utf8(&body)?.trim();
        Ok(echoed == addr.to_string())
    }
}

/// Issues echo-address probes to verify that a candidate address is
/// actually reachable from upstream, not merely bindable locally.
pub struct Checker {
    prober: Arc<dyn Prober>,
    concurrency: usize,
}

impl Checker {
    pub fn new(check_url: &str, timeout: Duration, concurrency: usize) -> Result<Self, http::uri::InvalidUri> {
        Ok(Self::with_prober(
            Arc::new(HttpProber {
                check_url: check_url.parse()?,
                timeout,
            }),
            concurrency,
        ))
    }

    pub fn with_prober(prober: Arc<dyn Prober>, concurrency: usize) -> Self {
        Self {
            prober,
            concurrency: concurrency.max(1),
        }
    }

    /// True iff a 2xx response arrived within the deadline and its body,
    /// trimmed, equals `addr`'s canonical textual form. Every lower-level
    /// failure (refused bind, no route, timeout, non-2xx, echo mismatch)
    /// collapses to `false`, never an error -- a `CheckFailed`-style
    /// variant never actually escapes this boundary.
    pub async fn check(&self, addr: Address) -> bool {
        self.prober.probe(addr).await.unwrap_or(false)
    }

    /// Probes up to `self.concurrency` addresses in parallel, returning
    /// results in input order.
    pub async fn checks(&self, addrs: Vec<Address>) -> Vec<bool> {
        stream::iter(addrs)
            .map(|addr| self.check(addr))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeProber {
        reachable: Mutex<HashSet<Address>>,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, addr: Address) -> anyhow::Result<bool> {
            Ok(self.reachable.lock().unwrap().contains(&addr))
        }
    }

    #[tokio::test]
    async fn checks_preserves_input_order() {
        let a: Address = "2001:db8::1".parse().unwrap();
        let b: Address = "2001:db8::2".parse().unwrap();
        let mut reachable = HashSet::new();
        reachable.insert(a);
        let checker = Checker::with_prober(Arc::new(FakeProber { reachable: Mutex::new(reachable) }), 4);

        let results = checker.checks(vec![a, b]).await;
        assert_eq!(results, vec![true, false]);
    }
}
