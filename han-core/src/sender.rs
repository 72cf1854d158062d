//! Sender: frame outgoing commands and optionally wait for an acknowledgement.
//!
//! Frame: `<id><FS><payload><CS>` plus `\r\n` when newline printing is on.

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::protocol::{DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_MS};
use crate::stream::Stream;
use crate::tokenizer::Framing;

/// How long and how often to wait for the peer to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    /// Wait per attempt.
    pub timeout: Duration,
    /// Number of attempts; `0` is treated as `1`.
    pub retries: u32,
}

impl AckPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    /// Upper bound on the total time spent waiting.
    pub fn max_wait(&self) -> Duration {
        self.timeout.saturating_mul(self.retries.max(1))
    }
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRY_COUNT,
        }
    }
}

/// Successful send outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written; no acknowledgement requested.
    Sent,
    /// Peer started answering during attempt number `attempts`.
    Acknowledged { attempts: u32 },
}

/// Error sending a command.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no acknowledgement after {attempts} attempts")]
    AckTimeout { attempts: u32 },
    #[error("unknown command name {0:?}")]
    UnknownCommand(String),
    #[error("payload contains the command separator")]
    SeparatorInPayload,
    #[error("link error: {0}")]
    Io(#[from] io::Error),
}

/// Append one framed command to `out`.
pub fn encode_command(
    framing: &Framing,
    id: u16,
    payload: &str,
    out: &mut Vec<u8>,
) -> Result<(), SendError> {
    if payload.as_bytes().contains(&framing.command_separator) {
        return Err(SendError::SeparatorInPayload);
    }
    out.extend_from_slice(id.to_string().as_bytes());
    out.push(framing.field_separator);
    out.extend_from_slice(payload.as_bytes());
    out.push(framing.command_separator);
    if framing.print_newlines {
        out.extend_from_slice(b"\r\n");
    }
    Ok(())
}

/// Frame and write one command. Does not wait for anything.
pub fn write_command<S: Stream + ?Sized>(
    stream: &mut S,
    framing: &Framing,
    id: u16,
    payload: &str,
) -> Result<(), SendError> {
    let mut frame = Vec::with_capacity(payload.len() + 8);
    encode_command(framing, id, payload, &mut frame)?;
    stream.write_all(&frame)?;
    stream.flush()?;
    debug!(id, len = frame.len(), "command sent");
    Ok(())
}

/// Busy-wait until the stream has a readable byte or `timeout` passes.
pub fn wait_for_reply<S: Stream + ?Sized>(stream: &mut S, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if stream.available()? > 0 {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::hint::spin_loop();
    }
}

/// Wait for the peer to answer, up to `policy.retries` windows of `policy.timeout`.
/// The reply bytes are left in the stream.
pub fn await_ack<S: Stream + ?Sized>(stream: &mut S, policy: &AckPolicy) -> Result<Delivery, SendError> {
    let attempts = policy.retries.max(1);
    for attempt in 1..=attempts {
        if wait_for_reply(stream, policy.timeout)? {
            return Ok(Delivery::Acknowledged { attempts: attempt });
        }
        debug!(attempt, "no reply yet");
    }
    warn!(attempts, timeout_ms = policy.timeout.as_millis() as u64, "acknowledgement timed out");
    Err(SendError::AckTimeout { attempts })
}

/// Write one command and, with a policy, wait for the acknowledgement.
pub fn send<S: Stream + ?Sized>(
    stream: &mut S,
    framing: &Framing,
    id: u16,
    payload: &str,
    ack: Option<AckPolicy>,
) -> Result<Delivery, SendError> {
    write_command(stream, framing, id, payload)?;
    match ack {
        Some(policy) => await_ack(stream, &policy),
        None => Ok(Delivery::Sent),
    }
}
