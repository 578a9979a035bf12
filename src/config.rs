//! Tunables left to callers rather than hard-coded as constants.

/// Reactor-wide tunables.
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// How many events the readiness backends (epoll/kqueue) ask the
    /// kernel for per `wait_for_input` wakeup. Ignored on the completion
    /// backend, which dequeues one completion at a time.
    pub event_batch_size: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig {
            event_batch_size: 256,
        }
    }
}

/// Per-socket tunables.
///
/// Read/write scratch size defaults to 1024 bytes and the pending-write
/// buffer is unbounded by default; both are exposed as configuration
/// rather than hard-coded constants so callers can bound memory use.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Size of the scratch buffer used for each `recv`/`WSARecv`.
    pub read_scratch_size: usize,
    /// Size of the scratch buffer the completion backend copies into
    /// before issuing `WSASend`. Readiness backends write directly from
    /// the caller's buffer and ignore this field.
    pub write_scratch_size: usize,
    /// Maximum number of bytes the per-socket pending-write buffer may
    /// hold before `write` starts reporting `ErrorKind::IoFailed` via
    /// `on_error` (hint `"write"`) instead of growing further. `None`
    /// means unbounded.
    pub write_high_water_mark: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            read_scratch_size: 1024,
            write_scratch_size: 1024,
            write_high_water_mark: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactor_config_defaults_match_the_documented_batch_size() {
        let config = ReactorConfig::default();
        assert_eq!(config.event_batch_size, 256);
    }

    #[test]
    fn socket_config_defaults_are_unbounded_pending_write() {
        let config = SocketConfig::default();
        assert_eq!(config.read_scratch_size, 1024);
        assert_eq!(config.write_scratch_size, 1024);
        assert_eq!(config.write_high_water_mark, None);
    }
}
