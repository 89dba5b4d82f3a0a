//! The IPv6 source-address pool service: route reconciliation, address
//! spawning/verification, per-tenant mirrors, and the RPC surface over them.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod checker;
pub mod cli;
pub mod global_db;
pub mod logging;
pub mod mirror_db;
mod persist;
pub mod prefixer;
pub mod rpc;
pub mod route;
pub mod service;
pub mod spawner;

pub use service::PoolService;
