//! HTTP/JSON RPC surface: an explicit routing table bound at
//! construction, replacing decorator-style route declarations.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use ipv6_pool_core::wire::{
    AddrResponse, AddrsResponse, CheckRequest, CheckResponse, ChecksRequest, ChecksResponse,
    ErrorResponse, GlobalStatsResponse, MirrorStatsResponse, OkResponse, ReportRequest,
    ReportsRequest, SpawnsResponse,
};
use ipv6_pool_core::{AddrReportInfo, PoolError};
use tokio::net::TcpListener;

use crate::service::PoolService;

type Body = Full<Bytes>;

/// Accepts connections on `listener`, serving each over HTTP/1.1 with
/// `dispatch` as the handler, until `drain` fires. One task per connection.
pub async fn serve(listener: TcpListener, service: Arc<PoolService>, drain: drain::Watch) -> std::io::Result<()> {
    let builder = auto::Builder::new(TokioExecutor::new());
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let service = service.clone();
                let io = TokioIo::new(stream);
                let builder = builder.clone();
                tokio::spawn(async move {
                    let service_fn = hyper::service::service_fn(move |req| {
                        let service = service.clone();
                        async move { dispatch(service, req).await }
                    });
                    if let Err(error) = builder.serve_connection(io, service_fn).await {
                        tracing::debug!(%error, %peer, "connection error");
                    }
                });
            }
            _ = drain.signaled() => return Ok(()),
        }
    }
}

async fn dispatch(service: Arc<PoolService>, req: Request<Incoming>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let result = route(&service, &method, &path, &query, req).await;
    Ok(match result {
        Ok(response) => response,
        Err(error) => error_response(&error),
    })
}

async fn route(
    service: &Arc<PoolService>,
    method: &Method,
    path: &str,
    query: &str,
    req: Request<Incoming>,
) -> Result<Response<Body>, PoolError> {
    match (method, path) {
        (&Method::GET, "/stats") => handle_stats(service, query),
        (&Method::GET, "/spawn") => handle_spawn(service).await,
        (&Method::GET, "/spawns") => handle_spawns(service, query).await,
        (&Method::POST, "/check") => handle_check(service, req).await,
        (&Method::POST, "/checks") => handle_checks(service, req).await,
        (&Method::GET, "/pick") => handle_pick(service, query),
        (&Method::GET, "/picks") => handle_picks(service, query),
        (&Method::POST, "/report") => handle_report(service, query, req).await,
        (&Method::POST, "/reports") => handle_reports(service, query, req).await,
        (&Method::POST, "/save") => handle_save(service).await,
        (&Method::POST, "/flush") => handle_flush(service, query).await,
        _ => Err(PoolError::Malformed(format!("no such route: {method} {path}"))),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k == key).then_some(v)
    })
}

async fn body_json<T: serde::de::DeserializeOwned>(req: Request<Incoming>) -> Result<T, PoolError> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| PoolError::Malformed(e.to_string()))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| PoolError::Malformed(e.to_string()))
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .expect("response assembly never fails")
}

fn error_response(error: &PoolError) -> Response<Body> {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(
        status,
        &ErrorResponse {
            error: error.tag().to_string(),
        },
    )
}

fn handle_stats(service: &Arc<PoolService>, query: &str) -> Result<Response<Body>, PoolError> {
    match query_param(query, "dbname") {
        Some(dbname) => {
            let stats = service.stats_mirror(dbname)?;
            Ok(json_response(
                StatusCode::OK,
                &MirrorStatsResponse {
                    total: stats.total,
                    idle: stats.idle,
                    using: stats.using,
                    bad: stats.bad,
                },
            ))
        }
        None => {
            let global = service.stats_global();
            Ok(json_response(
                StatusCode::OK,
                &GlobalStatsResponse {
                    global: ipv6_pool_core::wire::GlobalStats {
                        total: global.total,
                        prefix: global.prefix,
                    },
                },
            ))
        }
    }
}

async fn handle_spawn(service: &Arc<PoolService>) -> Result<Response<Body>, PoolError> {
    let addr = service.spawn_one().await?;
    Ok(json_response(StatusCode::OK, &AddrResponse { addr }))
}

async fn handle_spawns(service: &Arc<PoolService>, query: &str) -> Result<Response<Body>, PoolError> {
    let num: usize = query_param(query, "num")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PoolError::Malformed("missing or invalid num".to_string()))?;
    let (addrs, complete) = service.spawn_many(num).await?;
    Ok(json_response(StatusCode::OK, &SpawnsResponse { addrs, complete }))
}

async fn handle_check(service: &Arc<PoolService>, req: Request<Incoming>) -> Result<Response<Body>, PoolError> {
    let body: CheckRequest = body_json(req).await?;
    let usable = service.check_one(body.addr).await;
    Ok(json_response(StatusCode::OK, &CheckResponse { usable }))
}

async fn handle_checks(service: &Arc<PoolService>, req: Request<Incoming>) -> Result<Response<Body>, PoolError> {
    let body: ChecksRequest = body_json(req).await?;
    let usables = service.check_many(body.addrs).await;
    Ok(json_response(StatusCode::OK, &ChecksResponse { usables }))
}

fn handle_pick(service: &Arc<PoolService>, query: &str) -> Result<Response<Body>, PoolError> {
    let dbname = query_param(query, "dbname").ok_or_else(|| PoolError::Malformed("missing dbname".to_string()))?;
    let addr = service.pick(dbname)?;
    Ok(json_response(StatusCode::OK, &AddrResponse { addr }))
}

fn handle_picks(service: &Arc<PoolService>, query: &str) -> Result<Response<Body>, PoolError> {
    let dbname = query_param(query, "dbname").ok_or_else(|| PoolError::Malformed("missing dbname".to_string()))?;
    let num: usize = query_param(query, "num")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PoolError::Malformed("missing or invalid num".to_string()))?;
    let addrs = service.picks(dbname, num)?;
    Ok(json_response(StatusCode::OK, &AddrsResponse { addrs }))
}

async fn handle_report(
    service: &Arc<PoolService>,
    query: &str,
    req: Request<Incoming>,
) -> Result<Response<Body>, PoolError> {
    let dbname = query_param(query, "dbname").ok_or_else(|| PoolError::Malformed("missing dbname".to_string()))?;
    let body: ReportRequest = body_json(req).await?;
    let ok = service.report(
        dbname,
        AddrReportInfo {
            addr: body.addr,
            status: body.status,
            reason: body.reason,
        },
    )?;
    Ok(json_response(StatusCode::OK, &OkResponse { ok }))
}

async fn handle_reports(
    service: &Arc<PoolService>,
    query: &str,
    req: Request<Incoming>,
) -> Result<Response<Body>, PoolError> {
    let dbname = query_param(query, "dbname").ok_or_else(|| PoolError::Malformed("missing dbname".to_string()))?;
    let body: ReportsRequest = body_json(req).await?;
    let infos = body
        .reports
        .into_iter()
        .map(|r| AddrReportInfo {
            addr: r.addr,
            status: r.status,
            reason: r.reason,
        })
        .collect();
    let ok = service.reports(dbname, infos)?;
    Ok(json_response(StatusCode::OK, &OkResponse { ok }))
}

async fn handle_save(service: &Arc<PoolService>) -> Result<Response<Body>, PoolError> {
    service.save_all().await?;
    Ok(json_response(StatusCode::OK, &OkResponse { ok: true }))
}

async fn handle_flush(service: &Arc<PoolService>, query: &str) -> Result<Response<Body>, PoolError> {
    service.flush(query_param(query, "dbname")).await?;
    Ok(json_response(StatusCode::OK, &OkResponse { ok: true }))
}
