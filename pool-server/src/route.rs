//! Reconciles kernel routing and the NDP-proxy daemon with the current prefix.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use ipv6_pool_core::{Prefix, PoolError};

use crate::persist;

/// Installs/replaces the kernel route for a prefix. A trait object so tests
/// can swap in a no-op installer instead of shelling out to `ip`.
pub trait RouteInstaller: Send + Sync {
    fn add_route(&self, prefix: &Prefix) -> io::Result<()>;
}

/// Shells out to `ip -6 route replace`, which is idempotent by construction
/// (unlike `ip -6 route add`, it does not error if the route already exists).
#[derive(Default)]
pub struct IpRouteInstaller;

impl RouteInstaller for IpRouteInstaller {
    fn add_route(&self, prefix: &Prefix) -> io::Result<()> {
        let cidr = format!("{}/{}", prefix.network(), prefix.bits());
        let status = std::process::Command::new("ip")
            .args(["-6", "route", "replace", &cidr, "dev", prefix.iface()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("ip route replace exited with {status}")))
        }
    }
}

/// Restarts (and probes the liveness of) the NDP-proxy daemon. A trait
/// object so the actual init system is pluggable and testable.
#[async_trait]
pub trait ProxyRestarter: Send + Sync {
    async fn restart(&self) -> io::Result<()>;
    async fn is_running(&self) -> bool;
}

/// Runs a configured restart command (default `service ndppd restart`) and
/// probes liveness with `pidof`.
pub struct CommandProxyRestarter {
    command: Vec<String>,
}

impl CommandProxyRestarter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ProxyRestarter for CommandProxyRestarter {
    async fn restart(&self) -> io::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(io::Error::other("empty restart command"));
        };
        let status = tokio::process::Command::new(program).args(args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("restart command exited with {status}")))
        }
    }

    async fn is_running(&self) -> bool {
        tokio::process::Command::new("pidof")
            .arg("ndppd")
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Outcome of one `RouteUpdater::run` call.
pub struct RunOutcome {
    pub config_changed: bool,
}

/// Reconciles kernel routes and the NDP-proxy configuration file with a
/// given prefix. Does not itself decide *whether* the prefix changed --
/// that's the caller's job (`PoolService::route_tick`), since only the
/// caller can also coordinate flushing the pool.
pub struct RouteUpdater {
    conf_path: PathBuf,
    restart_retries: u32,
    installer: Box<dyn RouteInstaller>,
    restarter: Box<dyn ProxyRestarter>,
}

impl RouteUpdater {
    pub fn new(conf_path: PathBuf, restart_command: Vec<String>, restart_retries: u32) -> Self {
        Self {
            conf_path,
            restart_retries,
            installer: Box::new(IpRouteInstaller),
            restarter: Box::new(CommandProxyRestarter::new(restart_command)),
        }
    }

    /// Test-support constructor: swaps in fake collaborators instead of
    /// shelling out to `ip`/the init system.
    pub fn with_collaborators(
        conf_path: PathBuf,
        restart_retries: u32,
        installer: Box<dyn RouteInstaller>,
        restarter: Box<dyn ProxyRestarter>,
    ) -> Self {
        Self {
            conf_path,
            restart_retries,
            installer,
            restarter,
        }
    }

    pub fn add_route(&self, prefix: &Prefix) -> Result<(), PoolError> {
        self.installer.add_route(prefix).map_err(|e| PoolError::Internal(e.into()))
    }

    pub async fn is_ndppd_conf_latest(&self, prefix: &Prefix) -> Result<bool, PoolError> {
        let expected = render_ndppd_conf(prefix);
        match tokio::fs::read_to_string(&self.conf_path).await {
            Ok(existing) => Ok(existing == expected),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PoolError::Internal(e.into())),
        }
    }

    pub async fn modify_ndppd_conf(&self, prefix: &Prefix) -> Result<(), PoolError> {
        let content = render_ndppd_conf(prefix);
        persist::atomic_write_json_raw(&self.conf_path, content.into_bytes())
            .await
            .map_err(PoolError::Internal)
    }

    pub async fn restart_ndppd(&self) -> Result<(), PoolError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.restarter.restart().await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < self.restart_retries => {
                    tracing::warn!(%error, attempt, "ndppd restart failed, retrying");
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(error) => {
                    tracing::error!(%error, attempts = attempt, "ndppd restart exhausted retries");
                    return Err(PoolError::ProxyRestart { attempts: attempt });
                }
            }
        }
    }

    /// Adds the route, rewrites the NDP-proxy config if stale, and restarts
    /// the proxy only if the config changed or it isn't currently running.
    pub async fn run(&self, prefix: &Prefix) -> Result<RunOutcome, PoolError> {
        self.add_route(prefix)?;
        let latest = self.is_ndppd_conf_latest(prefix).await?;
        if !latest {
            self.modify_ndppd_conf(prefix).await?;
        }
        let running = self.restarter.is_running().await;
        if !latest || !running {
            self.restart_ndppd().await?;
        }
        Ok(RunOutcome { config_changed: !latest })
    }
}

fn render_ndppd_conf(prefix: &Prefix) -> String {
    format!(
        "proxy {} {{\n  rule {}/{} {{\n    static;\n  }}\n}}\n",
        prefix.iface(),
        prefix.network(),
        prefix.bits()
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    struct NoopInstaller;
    impl RouteInstaller for NoopInstaller {
        fn add_route(&self, _prefix: &Prefix) -> io::Result<()> {
            Ok(())
        }
    }

    struct FlakyRestarter {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ProxyRestarter for FlakyRestarter {
        async fn restart(&self) -> io::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(io::Error::other("simulated failure"))
            } else {
                Ok(())
            }
        }

        async fn is_running(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn modify_then_is_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let conf_path = dir.path().join("ndppd.conf");
        let updater = RouteUpdater::with_collaborators(
            conf_path,
            3,
            Box::new(NoopInstaller),
            Box::new(FlakyRestarter {
                fail_times: 0,
                calls: Arc::new(AtomicU32::new(0)),
            }),
        );
        let prefix = Prefix::new("eth0", "2001:db8::".parse().unwrap(), 64).unwrap();
        assert!(!updater.is_ndppd_conf_latest(&prefix).await.unwrap());
        updater.modify_ndppd_conf(&prefix).await.unwrap();
        assert!(updater.is_ndppd_conf_latest(&prefix).await.unwrap());
    }

    #[tokio::test]
    async fn restart_retries_before_succeeding() {
        let calls = Arc::new(AtomicU32::new(0));
        let updater = RouteUpdater::with_collaborators(
            PathBuf::from("/tmp/unused.conf"),
            3,
            Box::new(NoopInstaller),
            Box::new(FlakyRestarter {
                fail_times: 2,
                calls: calls.clone(),
            }),
        );
        updater.restart_ndppd().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn restart_fails_after_exhausting_retries() {
        let updater = RouteUpdater::with_collaborators(
            PathBuf::from("/tmp/unused.conf"),
            2,
            Box::new(NoopInstaller),
            Box::new(FlakyRestarter {
                fail_times: 99,
                calls: Arc::new(AtomicU32::new(0)),
            }),
        );
        assert!(matches!(
            updater.restart_ndppd().await,
            Err(PoolError::ProxyRestart { attempts: 2 })
        ));
    }
}
