//! Engine configuration.

use std::time::Duration;

use ramses_proto::Address;

/// Environment variable that puts the engine in listen-only mode.
pub const DISABLE_SENDING_ENV: &str = "RAMSES_DISABLE_SENDING";

/// Time allowed for the transport to echo a written frame.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(500);

/// Time allowed for an expected reply after the echo.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause before re-sending after a reply timeout.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Default retry budget; total sends are one more than this.
pub const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Submissions beyond this queue depth fail with `Busy`.
pub const DEFAULT_QUEUE_LIMIT: usize = 64;

/// Binding handshake timers.
#[derive(Debug, Clone)]
pub struct BindTimers {
    /// How long a supplicant waits for an ACCEPT after each tender.
    pub accept_wait: Duration,
    /// How long a respondent waits for the AFFIRM after each accept.
    pub confirm_wait: Duration,
    /// How long either side waits for a RATIFY.
    pub ratify_wait: Duration,
    /// Attempts allowed at each sending step.
    pub retry_limit: u8,
}

impl Default for BindTimers {
    fn default() -> Self {
        Self {
            accept_wait: Duration::from_secs(5),
            confirm_wait: Duration::from_secs(3),
            ratify_wait: Duration::from_secs(5),
            retry_limit: 3,
        }
    }
}

/// Settings for the transaction engine and the runtime around it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Echo-wait timeout.
    pub echo_timeout: Duration,
    /// Reply-wait timeout; commands may override per submission.
    pub reply_timeout: Duration,
    /// Backoff after a reply timeout.
    pub retry_backoff: Duration,
    /// Retry budget; commands may override per submission.
    pub retry_limit: u8,
    /// Maximum queued submissions.
    pub queue_limit: usize,
    /// Listen-only mode; every submission fails with `ReadOnly`.
    pub read_only: bool,
    /// The gateway's own address, injected as the source of commands that
    /// do not set one.
    pub gateway: Address,
    /// Binding handshake timers.
    pub bind: BindTimers,
}

impl EngineConfig {
    /// Defaults for a gateway address, with listen-only mode taken from
    /// the process environment.
    #[must_use]
    pub fn new(gateway: Address) -> Self {
        let read_only = std::env::var(DISABLE_SENDING_ENV).is_ok_and(|value| value == "1");
        Self {
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            retry_limit: DEFAULT_RETRY_LIMIT,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            read_only,
            gateway,
            bind: BindTimers::default(),
        }
    }

    /// Force listen-only mode regardless of the environment.
    #[must_use]
    pub fn listen_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}
