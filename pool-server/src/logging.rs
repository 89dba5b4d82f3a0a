//! Structured logging setup: an `EnvFilter` driven by `RUST_LOG`, defaulting
//! to `info` (or `debug` under `-v`), with a plain `fmt` layer.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
