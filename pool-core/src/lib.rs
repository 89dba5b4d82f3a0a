//! Shared data model for the IPv6 source-address pool: addresses, prefixes,
//! per-address status, the error taxonomy, and configuration types common to
//! both the pool server and its clients.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod config;
mod error;
mod status;
pub mod wire;

pub use address::{addr_to_segs, segs_to_addr, Address, Prefix};
pub use config::{ClientConfig, ServiceConfig};
pub use error::{PoolError, Result};
pub use status::{AddrReportInfo, AddrStatus, MirrorStats, ReportStatus};
