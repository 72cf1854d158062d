//! Messenger settings. Deserializable so hosts can embed them in their own config files.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{
    DEFAULT_BUFFER_SIZE, DEFAULT_COMMAND_SEPARATOR, DEFAULT_FIELD_SEPARATOR, DEFAULT_RETRY_COUNT,
    DEFAULT_TIMEOUT_MS,
};
use crate::sender::AckPolicy;
use crate::tokenizer::Framing;

/// Default time after which a partial message is abandoned.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

/// Invalid messenger configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("separator {0:?} is not a single ASCII byte")]
    NonAsciiSeparator(char),
    #[error("field and command separators must differ (both {0:?})")]
    SameSeparators(char),
    #[error("buffer size {0} is too small (minimum 2)")]
    BufferTooSmall(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessengerConfig {
    #[serde(default = "default_field_separator")]
    pub field_separator: char,
    #[serde(default = "default_command_separator")]
    pub command_separator: char,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub discard_newlines: bool,
    #[serde(default)]
    pub print_newlines: bool,
    /// Acknowledgement wait per attempt.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// `0` keeps partial messages forever.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_field_separator() -> char {
    DEFAULT_FIELD_SEPARATOR as char
}
fn default_command_separator() -> char {
    DEFAULT_COMMAND_SEPARATOR as char
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_ack_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}
fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            field_separator: default_field_separator(),
            command_separator: default_command_separator(),
            buffer_size: default_buffer_size(),
            discard_newlines: false,
            print_newlines: false,
            ack_timeout_ms: default_ack_timeout_ms(),
            retry_count: default_retry_count(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl MessengerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.framing().map(|_| ())
    }

    /// Separator and newline settings as bytes.
    pub fn framing(&self) -> Result<Framing, ConfigError> {
        let field_separator = ascii_byte(self.field_separator)?;
        let command_separator = ascii_byte(self.command_separator)?;
        if field_separator == command_separator {
            return Err(ConfigError::SameSeparators(self.field_separator));
        }
        if self.buffer_size < 2 {
            return Err(ConfigError::BufferTooSmall(self.buffer_size));
        }
        Ok(Framing {
            field_separator,
            command_separator,
            discard_newlines: self.discard_newlines,
            print_newlines: self.print_newlines,
        })
    }

    pub fn ack_policy(&self) -> AckPolicy {
        AckPolicy::new(Duration::from_millis(self.ack_timeout_ms), self.retry_count)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

fn ascii_byte(c: char) -> Result<u8, ConfigError> {
    // NUL is ignored by the tokenizer, so it cannot delimit anything.
    if c.is_ascii() && c != '\0' {
        Ok(c as u8)
    } else {
        Err(ConfigError::NonAsciiSeparator(c))
    }
}
