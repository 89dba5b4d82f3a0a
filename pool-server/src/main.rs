use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ipv6_pool_server::cli::Args;
use ipv6_pool_server::{rpc, PoolService};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    ipv6_pool_server::logging::init(args.verbose);

    let port = args.port;
    let config = args.into_service_config();

    let service = match PoolService::new(config) {
        Ok(service) => Arc::new(service),
        Err(error) => {
            tracing::error!(%error, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    if let Err(error) = service.load().await {
        tracing::error!(%error, "failed to load persisted state");
        return ExitCode::from(2);
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind RPC listener");
            return ExitCode::from(1);
        }
    };
    info!(%addr, "ipv6-poold listening");

    let (drain_signal, drain_watch) = drain::channel();

    let route_task = tokio::spawn(
        service
            .clone()
            .run_route_monitor(drain_watch.clone())
            .instrument(info_span!("route_monitor")),
    );
    let replenish_task = tokio::spawn(
        service
            .clone()
            .run_replenish(drain_watch.clone())
            .instrument(info_span!("replenish")),
    );
    let mirror_sync_task = tokio::spawn(
        service
            .clone()
            .run_mirror_sync(drain_watch.clone())
            .instrument(info_span!("mirror_sync")),
    );
    let persistence_task = tokio::spawn(
        service
            .clone()
            .run_persistence(drain_watch.clone())
            .instrument(info_span!("persistence")),
    );
    let rpc_task = tokio::spawn(
        rpc::serve(listener, service.clone(), drain_watch)
            .instrument(info_span!("rpc")),
    );

    wait_for_shutdown_signal().await;
    info!("shutting down");
    drain_signal.drain().await;

    let _ = tokio::join!(route_task, replenish_task, mirror_sync_task, persistence_task, rpc_task);

    if let Err(error) = service.save_all().await {
        tracing::error!(%error, "failed to save state during shutdown");
    }

    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(error) => {
            tracing::warn!(%error, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
