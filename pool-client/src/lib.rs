//! Client-side binding between an HTTP session and a pool-managed IPv6
//! source address.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod rpc_client;
pub mod session;

pub use rpc_client::RpcClient;
pub use session::{Session, SessionAdapter};
