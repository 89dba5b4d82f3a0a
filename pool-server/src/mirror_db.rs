//! Per-tenant view of `GlobalDB`, annotated with per-address status.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use ipv6_pool_core::wire::{MirrorDoc, MirrorEntryDoc};
use ipv6_pool_core::{Address, AddrReportInfo, AddrStatus, MirrorStats, PoolError};
use parking_lot::RwLock;

use crate::persist;
use crate::persist::unix_ts;

struct Entry {
    status: AddrStatus,
    ts: u64,
}

struct Inner {
    entries: HashMap<Address, Entry>,
    dirty: bool,
}

/// Per-dbname mapping Address -> AddrStatus. `idle -> using` only through
/// `get_idle_addr`; `using -> idle|bad` only through `release_addr`.
pub struct MirrorDb {
    path: PathBuf,
    lock_timeout: Duration,
    inner: RwLock<Inner>,
}

impl MirrorDb {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                dirty: false,
            }),
        }
    }

    fn write(&self) -> Result<parking_lot::RwLockWriteGuard<'_, Inner>, PoolError> {
        self.inner.try_write_for(self.lock_timeout).ok_or(PoolError::Busy)
    }

    /// Set-intersects with `global_addrs`: new addresses enter as `idle`,
    /// addresses no longer in GlobalDB are dropped, existing statuses are
    /// preserved. One atomic update under the mirror's lock.
    pub fn sync_from_global(&self, global_addrs: &HashSet<Address>) -> Result<(), PoolError> {
        let mut inner = self.write()?;
        inner.entries.retain(|addr, _| global_addrs.contains(addr));
        let now = unix_ts();
        for addr in global_addrs {
            inner.entries.entry(*addr).or_insert_with(|| Entry {
                status: AddrStatus::Idle,
                ts: now,
            });
        }
        inner.dirty = true;
        Ok(())
    }

    /// Selects the least-recently-transitioned `idle` address (textual
    /// order breaks ties), atomically flips it to `using`, and returns it.
    /// `Ok(None)` if no idle address exists -- not an error.
    pub fn get_idle_addr(&self) -> Result<Option<Address>, PoolError> {
        let mut inner = self.write()?;
        let picked = inner
            .entries
            .iter()
            .filter(|(_, e)| e.status == AddrStatus::Idle)
            .min_by(|(a_addr, a_e), (b_addr, b_e)| a_e.ts.cmp(&b_e.ts).then_with(|| a_addr.cmp(b_addr)))
            .map(|(addr, _)| *addr);

        if let Some(addr) = picked {
            if let Some(entry) = inner.entries.get_mut(&addr) {
                entry.status = AddrStatus::Using;
                entry.ts = unix_ts();
            }
            inner.dirty = true;
        }
        Ok(picked)
    }

    /// Transitions `report.addr` from `using` to `idle`/`bad`. A no-op
    /// (returns `false`) if the address is unknown or not currently
    /// `using` -- networks may duplicate or drop reports.
    pub fn release_addr(&self, report: &AddrReportInfo) -> Result<bool, PoolError> {
        let mut inner = self.write()?;
        match inner.entries.get_mut(&report.addr) {
            Some(entry) if entry.status == AddrStatus::Using => {
                entry.status = report.status.into();
                entry.ts = unix_ts();
                inner.dirty = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn get_stats(&self) -> Result<MirrorStats, PoolError> {
        let inner = self.inner.try_read_for(self.lock_timeout).ok_or(PoolError::Busy)?;
        let mut stats = MirrorStats::default();
        for entry in inner.entries.values() {
            stats.total += 1;
            match entry.status {
                AddrStatus::Idle => stats.idle += 1,
                AddrStatus::Using => stats.using += 1,
                AddrStatus::Bad => stats.bad += 1,
            }
        }
        Ok(stats)
    }

    /// Clears every entry, including `bad` ones -- the only way `bad`
    /// addresses are ever reclaimed -- and writes the now-empty state to
    /// disk before returning, so a crash immediately after `flush` never
    /// observes the stale pre-flush file.
    pub async fn flush(&self) -> Result<(), PoolError> {
        {
            let mut inner = self.write()?;
            inner.entries.clear();
            inner.dirty = true;
        }
        self.save().await
    }

    pub async fn save(&self) -> Result<(), PoolError> {
        let doc = {
            let mut inner = self.write()?;
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            let addrs = inner
                .entries
                .iter()
                .map(|(addr, e)| {
                    (
                        *addr,
                        MirrorEntryDoc {
                            status: e.status,
                            ts: e.ts,
                        },
                    )
                })
                .collect();
            MirrorDoc { addrs }
        };
        persist::atomic_write_json(&self.path, &doc)
            .await
            .map_err(PoolError::Internal)
    }

    pub async fn load(&self) -> Result<(), PoolError> {
        let doc: Option<MirrorDoc> = persist::read_json_tolerant(&self.path)
            .await
            .map_err(PoolError::Internal)?;
        if let Some(doc) = doc {
            let mut inner = self.write()?;
            inner.entries = doc
                .addrs
                .into_iter()
                .map(|(addr, e)| (addr, Entry { status: e.status, ts: e.ts }))
                .collect();
            inner.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn sync_adds_idle_and_drops_missing() {
        let mirror = MirrorDb::new("/tmp/unused.json", Duration::from_secs(1));
        let mut set = HashSet::new();
        set.insert(addr("2001:db8::1"));
        set.insert(addr("2001:db8::2"));
        mirror.sync_from_global(&set).unwrap();
        assert_eq!(mirror.get_stats().unwrap().idle, 2);

        set.remove(&addr("2001:db8::2"));
        mirror.sync_from_global(&set).unwrap();
        let stats = mirror.get_stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn bad_status_survives_sync() {
        let mirror = MirrorDb::new("/tmp/unused.json", Duration::from_secs(1));
        let mut set = HashSet::new();
        set.insert(addr("2001:db8::1"));
        mirror.sync_from_global(&set).unwrap();
        let picked = mirror.get_idle_addr().unwrap().unwrap();
        mirror
            .release_addr(&AddrReportInfo {
                addr: picked,
                status: ipv6_pool_core::ReportStatus::Bad,
                reason: None,
            })
            .unwrap();
        mirror.sync_from_global(&set).unwrap();
        assert_eq!(mirror.get_stats().unwrap().bad, 1);
        assert_eq!(mirror.get_idle_addr().unwrap(), None);
    }

    #[test]
    fn release_unknown_address_is_noop() {
        let mirror = MirrorDb::new("/tmp/unused.json", Duration::from_secs(1));
        let ok = mirror
            .release_addr(&AddrReportInfo {
                addr: addr("2001:db8::9"),
                status: ipv6_pool_core::ReportStatus::Idle,
                reason: None,
            })
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn save_then_load_preserves_using_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.json");
        let mirror = MirrorDb::new(&path, Duration::from_secs(1));
        let mut set = HashSet::new();
        set.insert(addr("2001:db8::1"));
        mirror.sync_from_global(&set).unwrap();
        mirror.get_idle_addr().unwrap();
        mirror.save().await.unwrap();

        let reloaded = MirrorDb::new(&path, Duration::from_secs(1));
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get_stats().unwrap().using, 1);
    }
}
