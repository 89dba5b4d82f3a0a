//! CLI surface: `-p PORT`, `-n USABLE_NUM`, `-v` verbose, plus
//! the operational knobs that don't have a short flag.

use std::path::PathBuf;

use clap::Parser;
use ipv6_pool_core::ServiceConfig;

#[derive(Debug, Parser)]
#[command(name = "ipv6-poold", about = "IPv6 source-address pool service")]
pub struct Args {
    /// Listen port for the RPC surface.
    #[arg(short = 'p', long, default_value_t = 16000, env = "IPV6_POOLD_PORT")]
    pub port: u16,

    /// Target number of verified-usable addresses to maintain.
    #[arg(short = 'n', long, default_value_t = 20, env = "IPV6_POOLD_USABLE_NUM")]
    pub usable_num: usize,

    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Interface to read the routed prefix from.
    #[arg(long, default_value = "eth0", env = "IPV6_POOLD_IFACE")]
    pub iface: String,

    /// Directory holding the global address store and per-tenant mirrors.
    #[arg(long, default_value = "/var/lib/ipv6-pool", env = "IPV6_POOLD_DB_ROOT")]
    pub db_root: PathBuf,

    /// URL the Checker probes to verify a candidate address is routed.
    #[arg(long, default_value = "http://address-echo.invalid/echo", env = "IPV6_POOLD_CHECK_URL")]
    pub check_url: String,

    /// Path to the NDP-proxy daemon's configuration file.
    #[arg(long, default_value = "/etc/ndppd.conf", env = "IPV6_POOLD_NDPPD_CONF")]
    pub ndppd_conf_path: PathBuf,
}

impl Args {
    pub fn into_service_config(self) -> ServiceConfig {
        let mut config = ServiceConfig::new(self.iface, self.db_root);
        config.usable_num = self.usable_num;
        config.check_url = self.check_url;
        config.ndppd_conf_path = self.ndppd_conf_path;
        config
    }
}
