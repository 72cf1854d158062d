//! Tokenizer: accumulate bytes into the message buffer and detect message boundaries.

use crate::protocol::{DEFAULT_BUFFER_SIZE, DEFAULT_COMMAND_SEPARATOR, DEFAULT_FIELD_SEPARATOR};

/// Result of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Byte stored (or ignored); no complete message yet.
    Incomplete,
    /// A non-empty message just completed and is available via [`Tokenizer::message`].
    Ready,
    /// The message outgrew the buffer and was dropped. Reported once per message.
    Overflow,
    /// A stray line feed / carriage return reset the in-progress message.
    Discarded,
}

/// Separator bytes and newline handling shared by the tokenizer and the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub field_separator: u8,
    pub command_separator: u8,
    /// Swallow inbound `\n` / `\r` that are not the field separator.
    pub discard_newlines: bool,
    /// Append `\r\n` after every outgoing command separator.
    pub print_newlines: bool,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            field_separator: DEFAULT_FIELD_SEPARATOR,
            command_separator: DEFAULT_COMMAND_SEPARATOR,
            discard_newlines: false,
            print_newlines: false,
        }
    }
}

/// Incremental message assembler over a fixed-capacity buffer.
///
/// At most `capacity - 1` bytes fit in one message (the last slot mirrors the
/// terminator the device firmware reserves). A completed message stays
/// readable until the next call to [`Tokenizer::feed`].
pub struct Tokenizer {
    framing: Framing,
    buffer: Box<[u8]>,
    write_pos: usize,
    /// Length of the completed message, if the last byte completed one.
    ready_len: Option<usize>,
    /// Set after an overflow; bytes are dropped until the next command separator.
    dropping: bool,
}

impl Tokenizer {
    /// Create a tokenizer. Capacities below 2 are raised to 2 so one byte always fits.
    pub fn new(framing: Framing, capacity: usize) -> Self {
        Self {
            framing,
            buffer: vec![0u8; capacity.max(2)].into_boxed_slice(),
            write_pos: 0,
            ready_len: None,
            dropping: false,
        }
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes accumulated for the message in progress.
    pub fn pending(&self) -> usize {
        self.write_pos
    }

    /// No partial message is being assembled or swallowed after an overflow.
    pub fn is_idle(&self) -> bool {
        self.write_pos == 0 && !self.dropping
    }

    /// Consume one byte.
    pub fn feed(&mut self, byte: u8) -> MessageState {
        self.ready_len = None;

        if byte == 0 {
            return MessageState::Incomplete;
        }

        if byte == self.framing.command_separator {
            let len = self.write_pos;
            let dropped = self.dropping;
            self.reset();
            if len > 0 && !dropped {
                self.ready_len = Some(len);
                return MessageState::Ready;
            }
            return MessageState::Incomplete;
        }

        if self.dropping {
            return MessageState::Incomplete;
        }

        if self.framing.discard_newlines
            && byte != self.framing.field_separator
            && (byte == b'\n' || byte == b'\r')
        {
            self.reset();
            return MessageState::Discarded;
        }

        if self.write_pos >= self.buffer.len() - 1 {
            self.reset();
            self.dropping = true;
            return MessageState::Overflow;
        }

        self.buffer[self.write_pos] = byte;
        self.write_pos += 1;
        MessageState::Incomplete
    }

    /// The message completed by the most recent `feed`, if any.
    pub fn message(&self) -> Option<&[u8]> {
        self.ready_len.map(|len| &self.buffer[..len])
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.dropping = false;
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(Framing::default(), DEFAULT_BUFFER_SIZE)
    }
}
