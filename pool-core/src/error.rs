use thiserror::Error;

/// The system's error taxonomy. Probe-level failures never
/// surface through this type -- `Checker::check` collapses them into a
/// boolean -- so `CheckFailed` exists here only as the variant `Spawner`
/// attaches to a rejected candidate for logging, not as something that
/// escapes to an RPC caller.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("interface {iface} not found")]
    NoInterface { iface: String },

    #[error("no global IPv6 address on {iface}")]
    NoGlobalAddress { iface: String },

    #[error("no prefix currently installed")]
    NoPrefix,

    #[error("no idle address available")]
    NoAddress,

    #[error("unknown mirror {dbname:?}")]
    NoMirror { dbname: String },

    #[error("usability check failed for {addr}")]
    CheckFailed { addr: String },

    #[error("failed to restart the NDP proxy after {attempts} attempts")]
    ProxyRestart { attempts: u32 },

    #[error("pool exhausted after {retries} retries")]
    PoolExhausted { retries: u32 },

    #[error("operation timed out")]
    Timeout,

    #[error("resource busy, try again")]
    Busy,

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PoolError {
    /// The HTTP status code the RPC layer maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Malformed(_) => 400,
            Self::NoMirror { .. } => 404,
            Self::Busy => 409,
            Self::NoAddress | Self::NoPrefix => 503,
            Self::NoInterface { .. }
            | Self::NoGlobalAddress { .. }
            | Self::CheckFailed { .. }
            | Self::ProxyRestart { .. }
            | Self::PoolExhausted { .. }
            | Self::Timeout
            | Self::Cancelled
            | Self::Internal(_) => 500,
        }
    }

    /// The machine-readable tag placed in `{"error": "..."}` bodies.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NoInterface { .. } => "NoInterface",
            Self::NoGlobalAddress { .. } => "NoGlobalAddress",
            Self::NoPrefix => "NoPrefix",
            Self::NoAddress => "NoAddress",
            Self::NoMirror { .. } => "NoMirror",
            Self::CheckFailed { .. } => "CheckFailed",
            Self::ProxyRestart { .. } => "ProxyRestart",
            Self::PoolExhausted { .. } => "PoolExhausted",
            Self::Timeout => "Timeout",
            Self::Busy => "Busy",
            Self::Cancelled => "Cancelled",
            Self::Malformed(_) => "Malformed",
            Self::Internal(_) => "Internal",
        }
    }
}

pub type Result<T, E = PoolError> = std::result::Result<T, E>;
