//! End-to-end scenarios against an in-process `PoolService`
//! driven by a fake interface enumerator and a fake prober -- no real
//! network namespace, no real `ip`/`ndppd`.

use std::io;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipv6_pool_core::{Address, AddrReportInfo, PoolError, ReportStatus, ServiceConfig};
use ipv6_pool_server::checker::{Checker, Prober};
use ipv6_pool_server::prefixer::{LinkAddresses, Prefixer};
use ipv6_pool_server::route::{ProxyRestarter, RouteInstaller, RouteUpdater};
use ipv6_pool_server::PoolService;

struct FakeLink(Arc<Mutex<Vec<Ipv6Addr>>>);

impl LinkAddresses for FakeLink {
    fn global_addrs(&self, _iface: &str) -> Result<Vec<Ipv6Addr>, PoolError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

struct AlwaysTrueProber;

#[async_trait]
impl Prober for AlwaysTrueProber {
    async fn probe(&self, _addr: Address) -> anyhow::Result<bool> {
        Ok(true)
    }
}

struct NoopInstaller;
impl RouteInstaller for NoopInstaller {
    fn add_route(&self, _prefix: &ipv6_pool_core::Prefix) -> io::Result<()> {
        Ok(())
    }
}

struct NoopRestarter;
#[async_trait]
impl ProxyRestarter for NoopRestarter {
    async fn restart(&self) -> io::Result<()> {
        Ok(())
    }

    async fn is_running(&self) -> bool {
        true
    }
}

/// Builds a `PoolService` wired to fakes, plus a handle to the interface's
/// address list so tests can simulate a prefix change.
fn build_service(db_root: std::path::PathBuf, addrs: Vec<Ipv6Addr>) -> (Arc<PoolService>, Arc<Mutex<Vec<Ipv6Addr>>>) {
    let mut config = ServiceConfig::new("eth0", db_root);
    config.usable_num = 20;

    let link = Arc::new(Mutex::new(addrs));
    let prefixer = Arc::new(Prefixer::with_link(Arc::new(FakeLink(link.clone())), "eth0", 64));
    let checker = Arc::new(Checker::with_prober(Arc::new(AlwaysTrueProber), 8));
    let route = RouteUpdater::with_collaborators(
        config.ndppd_conf_path.clone(),
        config.ndppd_restart_retries,
        Box::new(NoopInstaller),
        Box::new(NoopRestarter),
    );

    let service = Arc::new(PoolService::with_collaborators(config, prefixer, checker, route));
    (service, link)
}

async fn replenish_until_full(service: &PoolService, target: usize) {
    for _ in 0..10 {
        service.replenish_tick_for_test().await;
        if service.stats_global().total >= target {
            return;
        }
    }
    panic!("pool never reached {target} addresses");
}

#[tokio::test]
async fn cold_start_replenishes_to_target() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _link) = build_service(dir.path().to_path_buf(), vec!["2001:db8::1".parse().unwrap()]);
    service.load().await.unwrap();

    service.route_tick_for_test().await;
    replenish_until_full(&service, 20).await;

    assert_eq!(service.stats_global().total, 20);
}

#[tokio::test]
async fn pick_report_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _link) = build_service(dir.path().to_path_buf(), vec!["2001:db8::1".parse().unwrap()]);
    service.load().await.unwrap();
    service.route_tick_for_test().await;
    replenish_until_full(&service, 5).await;

    let addr = service.pick("t1").unwrap();
    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.using, 1);

    let ok = service
        .report(
            "t1",
            AddrReportInfo {
                addr,
                status: ReportStatus::Idle,
                reason: None,
            },
        )
        .unwrap();
    assert!(ok);

    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.using, 0);
}

#[tokio::test]
async fn bad_marking_survives_sync() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _link) = build_service(dir.path().to_path_buf(), vec!["2001:db8::1".parse().unwrap()]);
    service.load().await.unwrap();
    service.route_tick_for_test().await;
    replenish_until_full(&service, 5).await;

    let addr = service.pick("t1").unwrap();
    service
        .report(
            "t1",
            AddrReportInfo {
                addr,
                status: ReportStatus::Bad,
                reason: Some("probe failed".to_string()),
            },
        )
        .unwrap();

    service.mirror_sync_tick_for_test();

    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.bad, 1);
}

#[tokio::test]
async fn empty_pool_recovers_after_replenish() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _link) = build_service(dir.path().to_path_buf(), vec!["2001:db8::1".parse().unwrap()]);
    service.load().await.unwrap();
    service.route_tick_for_test().await;
    replenish_until_full(&service, 3).await;

    // Drain mirror t2: pick and mark every address bad.
    loop {
        match service.pick("t2") {
            Ok(addr) => {
                service
                    .report(
                        "t2",
                        AddrReportInfo {
                            addr,
                            status: ReportStatus::Bad,
                            reason: None,
                        },
                    )
                    .unwrap();
            }
            Err(PoolError::NoAddress) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(matches!(service.pick("t2"), Err(PoolError::NoAddress)));

    // Replenish adds fresh addresses to GlobalDB; a sync makes them visible.
    replenish_until_full(&service, 6).await;
    service.mirror_sync_tick_for_test();

    assert!(service.pick("t2").is_ok());
}

#[tokio::test]
async fn prefix_change_flushes_and_refills() {
    let dir = tempfile::tempdir().unwrap();
    let (service, link) = build_service(dir.path().to_path_buf(), vec!["2001:db8::1".parse().unwrap()]);
    service.load().await.unwrap();
    service.route_tick_for_test().await;
    replenish_until_full(&service, 10).await;

    assert!(service.stats_global().total >= 10);
    service.pick("t1").unwrap();

    *link.lock().unwrap() = vec!["2001:db8:1::1".parse().unwrap()];
    service.route_tick_for_test().await;

    assert_eq!(service.stats_global().total, 0);
    assert_eq!(service.stats_global().prefix.as_deref(), Some("2001:db8:1::/64"));

    replenish_until_full(&service, 10).await;
    service.mirror_sync_tick_for_test();

    let global_total = service.stats_global().total;
    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.total, global_total);
    assert_eq!(stats.bad, 0);
}

#[tokio::test]
async fn crash_recovery_preserves_using_status() {
    let dir = tempfile::tempdir().unwrap();
    let addrs = vec!["2001:db8::1".parse().unwrap()];

    let mut picked = Vec::new();
    {
        let (service, _link) = build_service(dir.path().to_path_buf(), addrs.clone());
        service.load().await.unwrap();
        service.route_tick_for_test().await;
        replenish_until_full(&service, 10).await;

        for _ in 0..5 {
            picked.push(service.pick("t1").unwrap());
        }
        service.save_all().await.unwrap();
    }

    // Simulate a restart: fresh PoolService, same db_root.
    let (service, _link) = build_service(dir.path().to_path_buf(), addrs);
    service.load().await.unwrap();

    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.using, 5);

    service.flush(Some("t1")).await.unwrap();
    let stats = service.stats_mirror("t1").unwrap();
    assert_eq!(stats.total, 0);

    service.route_tick_for_test().await;
    service.mirror_sync_tick_for_test();
    assert!(service.pick("t1").is_ok());
}

