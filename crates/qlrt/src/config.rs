pub const ENV_TRACE_RELEASES: &str = "QLRT_TRACE_RELEASES";
pub const ENV_MAX_SQL_BYTES: &str = "QLRT_MAX_SQL_BYTES";
pub const ENV_BUSY_TIMEOUT_MS: &str = "QLRT_BUSY_TIMEOUT_MS";

const DEFAULT_MAX_SQL_BYTES: u32 = 1024 * 1024;
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Knobs shared by the value runtime and the query layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Record a [`crate::ReleaseEvent`] for every object the runtime frees.
    pub trace_releases: bool,
    /// Upper bound on generated statement text, checked at prepare time.
    pub max_sql_bytes: u32,
    /// Busy timeout installed on every connection opened through this config.
    pub busy_timeout_ms: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            trace_releases: false,
            max_sql_bytes: DEFAULT_MAX_SQL_BYTES,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        RuntimeConfig {
            trace_releases: env_bool(ENV_TRACE_RELEASES, false),
            max_sql_bytes: env_u32_nonzero(ENV_MAX_SQL_BYTES, DEFAULT_MAX_SQL_BYTES),
            busy_timeout_ms: env_u32_nonzero(ENV_BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    pub fn with_release_trace(mut self) -> Self {
        self.trace_releases = true;
        self
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

pub fn env_u32_nonzero(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}
