use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for a `PoolService`, built once by the CLI layer and
/// passed down explicitly -- there is no process-wide mutable configuration
/// state.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub iface: String,
    pub db_root: PathBuf,
    pub usable_num: usize,
    pub check_url: String,
    pub check_timeout: Duration,
    pub check_concurrency: usize,
    pub route_check_interval: Duration,
    pub save_interval: Duration,
    pub mirror_sync_interval: Duration,
    pub replenish_poll_interval: Duration,
    pub rpc_lock_timeout: Duration,
    pub spawn_collision_retries: u32,
    pub spawn_attempt_budget_factor: u32,
    pub ndppd_conf_path: PathBuf,
    pub ndppd_restart_command: Vec<String>,
    pub ndppd_restart_retries: u32,
}

impl ServiceConfig {
    pub fn new(iface: impl Into<String>, db_root: impl Into<PathBuf>) -> Self {
        Self {
            iface: iface.into(),
            db_root: db_root.into(),
            usable_num: 20,
            check_url: "http://address-echo.invalid/echo".to_string(),
            check_timeout: Duration::from_secs(5),
            check_concurrency: 8,
            route_check_interval: Duration::from_secs(1800),
            save_interval: Duration::from_secs(2),
            mirror_sync_interval: Duration::from_secs(2),
            replenish_poll_interval: Duration::from_secs(5),
            rpc_lock_timeout: Duration::from_secs(1),
            spawn_collision_retries: 16,
            spawn_attempt_budget_factor: 4,
            ndppd_conf_path: PathBuf::from("/etc/ndppd.conf"),
            ndppd_restart_command: vec![
                "service".to_string(),
                "ndppd".to_string(),
                "restart".to_string(),
            ],
            ndppd_restart_retries: 3,
        }
    }

    pub fn global_db_path(&self) -> PathBuf {
        self.db_root.join("ipv6_global_addrs.json")
    }

    pub fn mirrors_dir(&self) -> PathBuf {
        self.db_root.join("ipv6_mirrors")
    }

    pub fn mirror_path(&self, dbname: &str) -> PathBuf {
        self.mirrors_dir().join(format!("{dbname}.json"))
    }
}

/// Defaults consumed by `ipv6-pool-client` when adapting a session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: String,
    pub dbname: String,
    pub request_timeout: Duration,
    pub adapt_retry_interval: Duration,
    pub adapt_max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:16000".to_string(),
            dbname: "default".to_string(),
            request_timeout: Duration::from_secs(10),
            adapt_retry_interval: Duration::from_secs(5),
            adapt_max_retries: 15,
        }
    }
}
