//! Durable set of verified-usable addresses for one host, versioned by prefix.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use ipv6_pool_core::wire::GlobalDoc;
use ipv6_pool_core::{Address, PoolError, Prefix};
use parking_lot::RwLock;

use crate::persist;

struct Inner {
    prefix: Option<Prefix>,
    addrs: HashSet<Address>,
    dirty: bool,
}

/// In-memory address set backed by a JSON file. All mutations serialize
/// through a single exclusive lock; reads proceed under a shared lock.
/// RPC-facing callers never block on that lock past `lock_timeout` --
/// on contention they observe `PoolError::Busy`.
pub struct GlobalDb {
    path: PathBuf,
    lock_timeout: Duration,
    inner: RwLock<Inner>,
}

impl GlobalDb {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
            inner: RwLock::new(Inner {
                prefix: None,
                addrs: HashSet::new(),
                dirty: false,
            }),
        }
    }

    fn read(&self) -> Result<parking_lot::RwLockReadGuard<'_, Inner>, PoolError> {
        self.inner.try_read_for(self.lock_timeout).ok_or(PoolError::Busy)
    }

    fn write(&self) -> Result<parking_lot::RwLockWriteGuard<'_, Inner>, PoolError> {
        self.inner.try_write_for(self.lock_timeout).ok_or(PoolError::Busy)
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        self.inner.read().prefix.clone()
    }

    /// Installs the prefix GlobalDB's contents are now valid under. Does
    /// NOT clear `addrs` -- callers that are changing prefix call `flush`
    /// first.
    pub fn set_prefix(&self, prefix: Prefix) -> Result<(), PoolError> {
        let mut inner = self.write()?;
        inner.prefix = Some(prefix);
        inner.dirty = true;
        Ok(())
    }

    pub fn has_addr(&self, addr: Address) -> bool {
        self.inner.read().addrs.contains(&addr)
    }

    pub fn get_all_addrs(&self) -> Vec<Address> {
        self.inner.read().addrs.iter().copied().collect()
    }

    pub fn total(&self) -> usize {
        self.inner.read().addrs.len()
    }

    /// Inserts `addr`, failing with `NoPrefix` if `expected_prefix` no
    /// longer matches what GlobalDB is currently versioned under -- a
    /// prefix change raced ahead of this insert: a route change during a
    /// pending spawn must invalidate that spawn's output.
    pub fn add_addr(&self, expected_prefix: &Prefix, addr: Address) -> Result<(), PoolError> {
        let mut inner = self.write()?;
        if inner.prefix.as_ref() != Some(expected_prefix) {
            return Err(PoolError::NoPrefix);
        }
        if !addr.in_prefix(expected_prefix) {
            return Err(PoolError::Malformed(format!("{addr} is not within {expected_prefix:?}")));
        }
        inner.addrs.insert(addr);
        inner.dirty = true;
        Ok(())
    }

    /// Clears the in-memory address set and writes the now-empty state to
    /// disk before returning, so a crash immediately after `flush` never
    /// observes the stale pre-flush file. Prefix is left untouched -- the
    /// caller installs the new prefix via `set_prefix` separately, so the
    /// empty-then-refill sequence is explicit at the call site.
    pub async fn flush(&self) -> Result<(), PoolError> {
        {
            let mut inner = self.write()?;
            inner.addrs.clear();
            inner.dirty = true;
        }
        self.save().await
    }

    /// Writes the current state to disk if it has changed since the last
    /// `save`. No-op otherwise, so repeated calls on an idle store are free.
    pub async fn save(&self) -> Result<(), PoolError> {
        let doc = {
            let mut inner = self.write()?;
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            GlobalDoc {
                prefix: inner.prefix.as_ref().map(|p| format!("{}/{}", p.network(), p.bits())),
                addrs: inner.addrs.iter().copied().collect(),
            }
        };
        persist::atomic_write_json(&self.path, &doc)
            .await
            .map_err(PoolError::Internal)
    }

    /// Loads addresses from disk along with the prefix they were stored
    /// under. That prefix is only a hint, not trusted outright: the route
    /// monitor's next tick re-derives the live prefix from the interface
    /// and compares it against this value, flushing only if they actually
    /// differ. This is what lets a plain restart keep its pool intact
    /// while a reboot onto different hardware (or a real prefix change)
    /// still triggers the usual flush-and-refill.
    pub async fn load(&self) -> Result<(), PoolError> {
        let doc: Option<GlobalDoc> = persist::read_json_tolerant(&self.path)
            .await
            .map_err(PoolError::Internal)?;
        if let Some(doc) = doc {
            let mut inner = self.write()?;
            inner.addrs = doc.addrs.into_iter().collect();
            inner.prefix = doc.prefix.as_deref().and_then(parse_prefix_hint);
            inner.dirty = false;
        }
        Ok(())
    }
}

fn parse_prefix_hint(s: &str) -> Option<Prefix> {
    let (net, bits) = s.split_once('/')?;
    let addr: Ipv6Addr = net.parse().ok()?;
    let bits: u8 = bits.parse().ok()?;
    Prefix::new(String::new(), addr, bits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix() -> Prefix {
        Prefix::new("eth0", "2001:db8::".parse().unwrap(), 64).unwrap()
    }

    #[test]
    fn add_addr_rejects_stale_prefix() {
        let db = GlobalDb::new("/tmp/unused.json", Duration::from_secs(1));
        db.set_prefix(prefix()).unwrap();
        let other = Prefix::new("eth0", "2001:db8:1::".parse().unwrap(), 64).unwrap();
        let addr: Address = "2001:db8:1::1".parse().unwrap();
        assert!(matches!(db.add_addr(&other, addr), Err(PoolError::NoPrefix)));
    }

    #[test]
    fn add_addr_rejects_out_of_prefix() {
        let db = GlobalDb::new("/tmp/unused.json", Duration::from_secs(1));
        db.set_prefix(prefix()).unwrap();
        let addr: Address = "2001:db9::1".parse().unwrap();
        assert!(matches!(db.add_addr(&prefix(), addr), Err(PoolError::Malformed(_))));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.json");
        let db = GlobalDb::new(&path, Duration::from_secs(1));
        db.set_prefix(prefix()).unwrap();
        let addr: Address = "2001:db8::1".parse().unwrap();
        db.add_addr(&prefix(), addr).unwrap();
        db.save().await.unwrap();

        let reloaded = GlobalDb::new(&path, Duration::from_secs(1));
        reloaded.load().await.unwrap();
        assert!(reloaded.has_addr(addr));
        assert_eq!(reloaded.current_prefix(), Some(prefix()));
    }

    #[tokio::test]
    async fn load_tolerates_missing_file() {
        let db = GlobalDb::new("/tmp/does-not-exist-ipv6-pool.json", Duration::from_secs(1));
        db.load().await.unwrap();
        assert_eq!(db.total(), 0);
    }

    #[tokio::test]
    async fn load_quarantines_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let db = GlobalDb::new(&path, Duration::from_secs(1));
        db.load().await.unwrap();
        assert_eq!(db.total(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn flush_clears_addrs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.json");
        let db = GlobalDb::new(&path, Duration::from_secs(1));
        db.set_prefix(prefix()).unwrap();
        let addr: Address = "2001:db8::1".parse().unwrap();
        db.add_addr(&prefix(), addr).unwrap();
        db.flush().await.unwrap();
        assert_eq!(db.total(), 0);
    }
}
