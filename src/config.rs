//! Channel configuration

use std::env;
use std::time::Duration;

use tracing::warn;

/// 64 KiB: object sizes are not known in advance and large rule sets
/// come back in big dump datagrams.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65536;

/// Upper bound on a single snapshot or query response (10 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10_000_000;

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Datagrams a single query drain may consume before giving up
pub const DEFAULT_MAX_DRAIN_DATAGRAMS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `SO_RCVBUF` and the size of the user-space receive buffer
    pub recv_buffer_size: usize,
    /// Deadline for each blocking receive; `None` blocks indefinitely
    pub recv_timeout: Option<Duration>,
    pub max_response_bytes: usize,
    pub max_drain_datagrams: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            recv_timeout: Some(DEFAULT_RECV_TIMEOUT),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_drain_datagrams: DEFAULT_MAX_DRAIN_DATAGRAMS,
        }
    }
}

impl ChannelConfig {
    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Defaults overridden by the environment
    ///
    /// * `NFTSYNC_RCVBUF` - receive buffer size in bytes
    /// * `NFTSYNC_RECV_TIMEOUT_MS` - receive deadline; `0` disables it
    /// * `NFTSYNC_MAX_RESPONSE` - response size cap in bytes
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize>(&lookup, "NFTSYNC_RCVBUF") {
            config.recv_buffer_size = size;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "NFTSYNC_RECV_TIMEOUT_MS") {
            config.recv_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = parse_var::<usize>(&lookup, "NFTSYNC_MAX_RESPONSE") {
            config.max_response_bytes = max;
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
