//! Orchestrates Prefixer/RouteUpdater/Checker/Spawner/GlobalDB/MirrorDB and
//! runs the background loops; the RPC layer is a thin adapter over this.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipv6_pool_core::{Address, AddrReportInfo, MirrorStats, PoolError, Prefix, ServiceConfig};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::checker::Checker;
use crate::global_db::GlobalDb;
use crate::mirror_db::MirrorDb;
use crate::prefixer::Prefixer;
use crate::route::RouteUpdater;
use crate::spawner::Spawner;

pub struct GlobalStats {
    pub total: usize,
    pub prefix: Option<String>,
}

/// Top-level coordinator. Construction never spawns tasks; the caller
/// (`main`) spawns the `run_*` loop futures this returns and owns their
/// shutdown signal, matching an explicit `Start`/`Stop` lifecycle rather
/// than implicit background work tied to construction.
pub struct PoolService {
    config: ServiceConfig,
    prefixer: Arc<Prefixer>,
    route: RouteUpdater,
    checker: Arc<Checker>,
    spawner: Spawner,
    global: Arc<GlobalDb>,
    mirrors: RwLock<HashMap<String, Arc<MirrorDb>>>,
    /// Shared in shared mode by `spawn`/replenish while they touch
    /// GlobalDB, exclusively by the route monitor while it reconfigures
    /// routing -- so a reconcile never races a spawn attempt mid-flight
    /// reconfigures routing.
    route_lock: tokio::sync::RwLock<()>,
    needs_reconcile: AtomicBool,
    replenish_inflight: AtomicBool,
    replenish_notify: Notify,
}

impl PoolService {
    pub fn new(config: ServiceConfig) -> Result<Self, PoolError> {
        let checker = Arc::new(
            Checker::new(&config.check_url, config.check_timeout, config.check_concurrency)
                .map_err(|e| PoolError::Internal(e.into()))?,
        );
        let prefixer = Arc::new(Prefixer::new(config.iface.clone()));
        let route = RouteUpdater::new(
            config.ndppd_conf_path.clone(),
            config.ndppd_restart_command.clone(),
            config.ndppd_restart_retries,
        );
        let global = Arc::new(GlobalDb::new(config.global_db_path(), config.rpc_lock_timeout));
        let spawner = Spawner::new(prefixer.clone(), checker.clone(), config.spawn_collision_retries);

        Ok(Self {
            config,
            prefixer,
            route,
            checker,
            spawner,
            global,
            mirrors: RwLock::new(HashMap::new()),
            route_lock: tokio::sync::RwLock::new(()),
            needs_reconcile: AtomicBool::new(false),
            replenish_inflight: AtomicBool::new(false),
            replenish_notify: Notify::new(),
        })
    }

    /// Test-support constructor taking collaborators directly, so
    /// end-to-end scenarios can run against a fake `Prefixer`/`Checker`
    /// instead of the real network stack.
    pub fn with_collaborators(
        config: ServiceConfig,
        prefixer: Arc<Prefixer>,
        checker: Arc<Checker>,
        route: RouteUpdater,
    ) -> Self {
        let global = Arc::new(GlobalDb::new(config.global_db_path(), config.rpc_lock_timeout));
        let spawner = Spawner::new(prefixer.clone(), checker.clone(), config.spawn_collision_retries);
        Self {
            config,
            prefixer,
            route,
            checker,
            spawner,
            global,
            mirrors: RwLock::new(HashMap::new()),
            route_lock: tokio::sync::RwLock::new(()),
            needs_reconcile: AtomicBool::new(false),
            replenish_inflight: AtomicBool::new(false),
            replenish_notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Runs one route-monitor tick synchronously -- used by tests to drive
    /// the reconcile state machine deterministically instead of waiting on
    /// `route_check_interval`.
    pub async fn route_tick_for_test(&self) {
        self.route_tick().await;
    }

    /// Runs one replenish tick synchronously -- the test equivalent of
    /// waiting for `replenish_poll_interval` or a wakeup.
    pub async fn replenish_tick_for_test(&self) {
        self.replenish_tick().await;
    }

    /// Runs one mirror-sync tick synchronously.
    pub fn mirror_sync_tick_for_test(&self) {
        self.mirror_sync_tick();
    }

    /// Loads GlobalDB and every mirror found under `mirrors_dir` from disk.
    /// Mirrors not yet on disk are created lazily by `ensure_mirror`.
    pub async fn load(&self) -> Result<(), PoolError> {
        self.global.load().await?;

        let dir = self.config.mirrors_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PoolError::Internal(e.into())),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| PoolError::Internal(e.into()))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(dbname) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mirror = self.ensure_mirror(dbname);
            mirror.load().await?;
        }
        Ok(())
    }

    pub async fn save_all(&self) -> Result<(), PoolError> {
        self.global.save().await?;
        let mirrors: Vec<_> = self.mirrors.read().values().cloned().collect();
        for mirror in mirrors {
            mirror.save().await?;
        }
        Ok(())
    }

    fn mirror(&self, dbname: &str) -> Option<Arc<MirrorDb>> {
        self.mirrors.read().get(dbname).cloned()
    }

    /// Creates an empty mirror on first use and immediately syncs it from
    /// GlobalDB.
    fn ensure_mirror(&self, dbname: &str) -> Arc<MirrorDb> {
        if let Some(mirror) = self.mirror(dbname) {
            return mirror;
        }
        let mirror = Arc::new(MirrorDb::new(self.config.mirror_path(dbname), self.config.rpc_lock_timeout));
        let addrs: HashSet<Address> = self.global.get_all_addrs().into_iter().collect();
        if let Err(error) = mirror.sync_from_global(&addrs) {
            tracing::warn!(%error, dbname, "initial mirror sync failed");
        }
        self.mirrors.write().insert(dbname.to_string(), mirror.clone());
        mirror
    }

    // ---- RPC-surface methods -------------------------------------------------

    pub fn stats_global(&self) -> GlobalStats {
        GlobalStats {
            total: self.global.total(),
            prefix: self.global.current_prefix().map(|p| format!("{}/{}", p.network(), p.bits())),
        }
    }

    pub fn stats_mirror(&self, dbname: &str) -> Result<MirrorStats, PoolError> {
        let mirror = self.mirror(dbname).ok_or_else(|| PoolError::NoMirror { dbname: dbname.to_string() })?;
        mirror.get_stats()
    }

    pub async fn spawn_one(&self) -> Result<Address, PoolError> {
        let _guard = self.route_lock.read().await;
        self.spawner.spawn(&self.global).await?.ok_or(PoolError::NoAddress)
    }

    pub async fn spawn_many(&self, n: usize) -> Result<(Vec<Address>, bool), PoolError> {
        let _guard = self.route_lock.read().await;
        self.spawner.spawns(&self.global, n, self.config.spawn_attempt_budget_factor).await
    }

    pub async fn check_one(&self, addr: Address) -> bool {
        self.checker.check(addr).await
    }

    pub async fn check_many(&self, addrs: Vec<Address>) -> Vec<bool> {
        self.checker.checks(addrs).await
    }

    pub fn pick(&self, dbname: &str) -> Result<Address, PoolError> {
        let mirror = self.ensure_mirror(dbname);
        if let Some(addr) = mirror.get_idle_addr()? {
            return Ok(addr);
        }
        // Mirror was empty: sync once from GlobalDB before giving up, per
        // Mirror was empty even after a sync: genuinely nothing idle.
        let addrs: HashSet<Address> = self.global.get_all_addrs().into_iter().collect();
        mirror.sync_from_global(&addrs)?;
        mirror.get_idle_addr()?.ok_or(PoolError::NoAddress)
    }

    pub fn picks(&self, dbname: &str, n: usize) -> Result<Vec<Address>, PoolError> {
        let mirror = self.ensure_mirror(dbname);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match mirror.get_idle_addr()? {
                Some(addr) => out.push(addr),
                None => break,
            }
        }
        if out.is_empty() && n > 0 {
            let addrs: HashSet<Address> = self.global.get_all_addrs().into_iter().collect();
            mirror.sync_from_global(&addrs)?;
            for _ in 0..n {
                match mirror.get_idle_addr()? {
                    Some(addr) => out.push(addr),
                    None => break,
                }
            }
        }
        if out.is_empty() && n > 0 {
            return Err(PoolError::NoAddress);
        }
        Ok(out)
    }

    pub fn report(&self, dbname: &str, info: AddrReportInfo) -> Result<bool, PoolError> {
        let mirror = self.mirror(dbname).ok_or_else(|| PoolError::NoMirror { dbname: dbname.to_string() })?;
        mirror.release_addr(&info)
    }

    pub fn reports(&self, dbname: &str, infos: Vec<AddrReportInfo>) -> Result<bool, PoolError> {
        let mirror = self.mirror(dbname).ok_or_else(|| PoolError::NoMirror { dbname: dbname.to_string() })?;
        let mut any = false;
        for info in infos {
            if mirror.release_addr(&info)? {
                any = true;
            }
        }
        Ok(any)
    }

    pub async fn flush(&self, dbname: Option<&str>) -> Result<(), PoolError> {
        match dbname {
            Some(name) => {
                if let Some(mirror) = self.mirror(name) {
                    mirror.flush().await?;
                }
                Ok(())
            }
            None => {
                self.global.flush().await?;
                let mirrors: Vec<_> = self.mirrors.read().values().cloned().collect();
                for mirror in mirrors {
                    mirror.flush().await?;
                }
                Ok(())
            }
        }
    }

    fn wake_replenish(&self) {
        self.replenish_notify.notify_one();
    }

    // ---- Background loops -----------------------------------------------------

    pub async fn run_route_monitor(self: Arc<Self>, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.config.route_check_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.route_tick().await,
                _ = drain.signaled() => break,
            }
        }
    }

    async fn route_tick(&self) {
        let observed = match self.prefixer.current_prefix() {
            Ok(p) => p,
            Err(error) => {
                tracing::warn!(%error, "prefix probe failed");
                return;
            }
        };

        let changed = self.global.current_prefix().as_ref() != Some(&observed);
        if !changed && !self.needs_reconcile.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.route_lock.write().await;

        if changed {
            tracing::info!(prefix = %observed.network(), bits = observed.bits(), "prefix changed, flushing pool");
            if let Err(error) = self.global.flush().await {
                tracing::warn!(%error, "flush during prefix change failed, will retry");
                self.needs_reconcile.store(true, Ordering::Release);
                return;
            }
            let mirrors: Vec<_> = self.mirrors.read().values().cloned().collect();
            for mirror in mirrors {
                if let Err(error) = mirror.flush().await {
                    tracing::warn!(%error, "mirror flush during prefix change failed, will retry");
                }
            }
            if let Err(error) = self.global.set_prefix(observed.clone()) {
                tracing::warn!(%error, "installing new prefix failed, will retry");
                self.needs_reconcile.store(true, Ordering::Release);
                return;
            }
        }

        match self.route.run(&observed).await {
            Ok(_) => {
                self.needs_reconcile.store(false, Ordering::Release);
                self.wake_replenish();
            }
            Err(error) => {
                tracing::warn!(%error, "route reconcile failed, will retry next tick");
                self.needs_reconcile.store(true, Ordering::Release);
            }
        }
    }

    pub async fn run_replenish(self: Arc<Self>, drain: drain::Watch) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.replenish_poll_interval) => {}
                _ = self.replenish_notify.notified() => {}
                _ = drain.signaled() => break,
            }
            self.replenish_tick().await;
        }
    }

    async fn replenish_tick(&self) {
        if self.replenish_inflight.swap(true, Ordering::AcqRel) {
            return;
        }
        let total = self.global.total();
        if total < self.config.usable_num {
            let need = self.config.usable_num - total;
            let _guard = self.route_lock.read().await;
            match self.spawner.spawns(&self.global, need, self.config.spawn_attempt_budget_factor).await {
                Ok((accepted, complete)) => {
                    if !accepted.is_empty() {
                        tracing::debug!(accepted = accepted.len(), complete, "replenished pool");
                    }
                }
                Err(PoolError::NoPrefix) => {
                    tracing::debug!("replenish parked: no prefix installed");
                }
                Err(error) => {
                    tracing::warn!(%error, "replenish failed");
                }
            }
        }
        self.replenish_inflight.store(false, Ordering::Release);
    }

    pub async fn run_mirror_sync(self: Arc<Self>, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.config.mirror_sync_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.mirror_sync_tick(),
                _ = drain.signaled() => break,
            }
        }
    }

    fn mirror_sync_tick(&self) {
        let addrs: HashSet<Address> = self.global.get_all_addrs().into_iter().collect();
        for mirror in self.mirrors.read().values() {
            if let Err(error) = mirror.sync_from_global(&addrs) {
                tracing::warn!(%error, "mirror sync failed");
            }
        }
    }

    pub async fn run_persistence(self: Arc<Self>, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.config.save_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.save_all().await {
                        tracing::warn!(%error, "periodic save failed");
                    }
                }
                _ = drain.signaled() => break,
            }
        }
    }
}
