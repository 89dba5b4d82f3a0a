//! On-disk and on-wire JSON shapes. These are shared between
//! the server (which produces them) and the client (which parses them) so
//! the two sides can never drift on the `AddrStatus` string encoding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Address, AddrStatus, ReportStatus};

/// `ipv6_global_addrs.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub addrs: Vec<Address>,
}

/// One entry of `ipv6_mirrors/<dbname>.json`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MirrorEntryDoc {
    pub status: AddrStatus,
    pub ts: u64,
}

/// `ipv6_mirrors/<dbname>.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MirrorDoc {
    pub addrs: HashMap<Address, MirrorEntryDoc>,
}

/// `GET /stats` without a `dbname`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalStatsResponse {
    pub global: GlobalStats,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total: usize,
    pub prefix: Option<String>,
}

/// `GET /stats?dbname=...`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MirrorStatsResponse {
    pub total: usize,
    pub idle: usize,
    pub using: usize,
    pub bad: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddrResponse {
    pub addr: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddrsResponse {
    pub addrs: Vec<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnsResponse {
    pub addrs: Vec<Address>,
    pub complete: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub addr: Address,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub usable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecksRequest {
    pub addrs: Vec<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecksResponse {
    pub usables: Vec<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportRequest {
    pub addr: Address,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportsRequest {
    pub reports: Vec<ReportRequest>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
