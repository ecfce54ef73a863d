//! Line transport seam and the packet-log replay transport.
//!
//! The engine runtime drives exactly one [`Transport`]. Serial radios
//! echo every written line back on the read stream; transports that do
//! not (MQTT) report it via [`Transport::echoes`] and the runtime
//! synthesizes the echo locally. Inbound `#` comments and `!` firmware
//! status lines are out-of-band and never reach the frame decoder.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ramses_proto::Frame;
use thiserror::Error;

/// Transport-level failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error from the underlying device
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The device went away
    #[error("transport closed")]
    Closed,

    /// Writes are not supported on this transport
    #[error("transport is read-only")]
    ReadOnly,
}

/// One line-oriented frame stream.
///
/// Implementations exist for serial devices, MQTT gateways, packet-log
/// replay, and test harness radios; the engine is written against this
/// seam only.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound line. `None` means the stream ended.
    async fn recv_line(&mut self) -> Option<Result<String, TransportError>>;

    /// Write one line.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]; the engine treats a write failure as
    /// fatal and fails all pending work.
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Whether written lines come back on the read stream by themselves.
    ///
    /// Serial adapters echo; MQTT gateways do not, so the runtime loops
    /// the line back locally.
    fn echoes(&self) -> bool {
        true
    }
}

/// Whether a line is out-of-band chatter rather than a frame.
#[must_use]
pub fn is_out_of_band(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!')
}

/// Replays a packet log, advancing recorded timestamps to wall clock.
///
/// The first frame plays immediately; later frames keep their recorded
/// gaps. Writes are rejected — a log is not a radio.
pub struct ReplayTransport {
    frames: VecDeque<Frame>,
    origin: Option<Origin>,
}

struct Origin {
    started: tokio::time::Instant,
    wall: DateTime<Utc>,
    first_ts: DateTime<Utc>,
}

impl ReplayTransport {
    /// Parse a packet log.
    ///
    /// Out-of-band lines are skipped silently; undecodable lines are
    /// skipped with a warning, matching the engine's drop-and-count
    /// policy.
    #[must_use]
    pub fn from_log(text: &str) -> Self {
        let frames = text
            .lines()
            .filter(|line| !is_out_of_band(line))
            .filter_map(|line| match Frame::decode(line) {
                Ok(frame) => Some(frame),
                Err(error) => {
                    tracing::warn!(%error, line, "skipping unparseable log line");
                    None
                },
            })
            .collect();
        Self { frames, origin: None }
    }

    /// Frames remaining to replay.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn recv_line(&mut self) -> Option<Result<String, TransportError>> {
        let mut frame = self.frames.pop_front()?;

        let origin = self.origin.get_or_insert_with(|| Origin {
            started: tokio::time::Instant::now(),
            wall: Utc::now(),
            first_ts: frame.ts,
        });

        let offset = (frame.ts - origin.first_ts).to_std().unwrap_or_default();
        tokio::time::sleep_until(origin.started + offset).await;

        frame.ts =
            origin.wall + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Some(Ok(frame.encode()))
    }

    async fn send_line(&mut self, _line: &str) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }
}
