use serde::{Deserialize, Serialize};

use crate::Address;

/// Lifecycle state of an address within one tenant's mirror.
///
/// `idle -> using` only via `MirrorDb::get_idle_addr`; `using -> idle|bad`
/// only via `MirrorDb::release_addr`. `bad` is sticky until an explicit
/// flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrStatus {
    Idle,
    Using,
    Bad,
}

impl AddrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Using => "using",
            Self::Bad => "bad",
        }
    }
}

impl Default for AddrStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// The status a client may report back for an address it was handed. `using`
/// is never reported by a client -- it is set only by the server when
/// handing an address out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Idle,
    Bad,
}

impl From<ReportStatus> for AddrStatus {
    fn from(s: ReportStatus) -> Self {
        match s {
            ReportStatus::Idle => AddrStatus::Idle,
            ReportStatus::Bad => AddrStatus::Bad,
        }
    }
}

/// A client's outcome report for one address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrReportInfo {
    pub addr: Address,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Totals per status, as returned by `MirrorDb::get_stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStats {
    pub total: usize,
    pub idle: usize,
    pub using: usize,
    pub bad: usize,
}
