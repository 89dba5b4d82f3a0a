//! Thin HTTP/JSON client for the pool service's RPC surface.
//! This talks to the service itself over a plain connection -- it is not
//! the source-bound client a `Session` uses for scraping.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ipv6_pool_core::wire::{
    AddrResponse, AddrsResponse, ErrorResponse, OkResponse, ReportRequest, ReportsRequest, SpawnsResponse,
};
use ipv6_pool_core::{Address, AddrReportInfo, PoolError};

pub struct RpcClient {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            timeout,
        }
    }

    pub async fn pick(&self, dbname: &str) -> Result<Address, PoolError> {
        let (status, body) = self.get(&format!("/pick?dbname={dbname}")).await?;
        self.decode::<AddrResponse>(status, &body).map(|r| r.addr)
    }

    pub async fn picks(&self, dbname: &str, n: usize) -> Result<Vec<Address>, PoolError> {
        let (status, body) = self.get(&format!("/picks?dbname={dbname}&num={n}")).await?;
        self.decode::<AddrsResponse>(status, &body).map(|r| r.addrs)
    }

    pub async fn report(&self, dbname: &str, info: AddrReportInfo) -> Result<bool, PoolError> {
        let (status, body) = self
            .post(
                &format!("/report?dbname={dbname}"),
                &ReportRequest {
                    addr: info.addr,
                    status: info.status,
                    reason: info.reason,
                },
            )
            .await?;
        self.decode::<OkResponse>(status, &body).map(|r| r.ok)
    }

    pub async fn reports(&self, dbname: &str, infos: Vec<AddrReportInfo>) -> Result<bool, PoolError> {
        let reports = infos
            .into_iter()
            .map(|i| ReportRequest {
                addr: i.addr,
                status: i.status,
                reason: i.reason,
            })
            .collect();
        let (status, body) = self.post(&format!("/reports?dbname={dbname}"), &ReportsRequest { reports }).await?;
        self.decode::<OkResponse>(status, &body).map(|r| r.ok)
    }

    pub async fn spawn(&self) -> Result<Address, PoolError> {
        let (status, body) = self.get("/spawn").await?;
        self.decode::<AddrResponse>(status, &body).map(|r| r.addr)
    }

    pub async fn spawns(&self, n: usize) -> Result<(Vec<Address>, bool), PoolError> {
        let (status, body) = self.get(&format!("/spawns?num={n}")).await?;
        let resp = self.decode::<SpawnsResponse>(status, &body)?;
        Ok((resp.addrs, resp.complete))
    }

    async fn get(&self, path_and_query: &str) -> Result<(StatusCode, Bytes), PoolError> {
        let uri = self.uri(path_and_query)?;
        let request = http::Request::get(uri)
            .body(Full::<Bytes>::default())
            .map_err(|e| PoolError::Internal(e.into()))?;
        self.send(request).await
    }

    async fn post<T: serde::Serialize>(&self, path_and_query: &str, body: &T) -> Result<(StatusCode, Bytes), PoolError> {
        let uri = self.uri(path_and_query)?;
        let payload = serde_json::to_vec(body).map_err(|e| PoolError::Internal(e.into()))?;
        let request = http::Request::post(uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| PoolError::Internal(e.into()))?;
        self.send(request).await
    }

    fn uri(&self, path_and_query: &str) -> Result<http::Uri, PoolError> {
        format!("{}{}", self.base_url, path_and_query)
            .parse()
            .map_err(|e: http::uri::InvalidUri| PoolError::Internal(e.into()))
    }

    async fn send(&self, request: http::Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), PoolError> {
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| PoolError::Timeout)?
            .map_err(|e| PoolError::Internal(e.into()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| PoolError::Internal(e.into()))?
            .to_bytes();
        Ok((status, body))
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, status: StatusCode, body: &Bytes) -> Result<T, PoolError> {
        if status.is_success() {
            serde_json::from_slice(body).map_err(|e| PoolError::Internal(e.into()))
        } else {
            Err(Self::map_error(status, body))
        }
    }

    fn map_error(status: StatusCode, body: &Bytes) -> PoolError {
        let tag = serde_json::from_slice::<ErrorResponse>(body).map(|e| e.error).unwrap_or_default();
        match (status.as_u16(), tag.as_str()) {
            (503, "NoAddress") => PoolError::NoAddress,
            (503, "NoPrefix") => PoolError::NoPrefix,
            (404, _) => PoolError::NoMirror { dbname: tag },
            (409, _) => PoolError::Busy,
            (400, _) => PoolError::Malformed(tag),
            _ => PoolError::Internal(anyhow::anyhow!("server returned {status}: {tag}")),
        }
    }
}
