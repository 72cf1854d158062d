//! Argument cursor: pull fields out of a completed message one at a time.

/// Error reading a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("no more fields in message")]
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Message complete, cursor not yet positioned.
    Ready,
    /// Cursor positioned somewhere inside the message.
    Scanning,
}

/// Forward-only field reader over one message.
///
/// Fields are separated by the field separator; runs of separators count as
/// one and leading separators are skipped, so fields are never empty.
/// `available` positions the cursor on the next field only once the current
/// one has been consumed by a `read_*` call, so it can be called repeatedly
/// as a presence check. Every `read_*` call consumes a field.
#[derive(Debug, Clone)]
pub struct Args<'a> {
    message: &'a [u8],
    separator: u8,
    state: CursorState,
    /// Scan position for the next field.
    pos: usize,
    current: Option<&'a [u8]>,
    consumed: bool,
}

impl<'a> Args<'a> {
    pub fn new(message: &'a [u8], separator: u8) -> Self {
        Self {
            message,
            separator,
            state: CursorState::Ready,
            pos: 0,
            current: None,
            consumed: true,
        }
    }

    /// Whether another field is available; positions the cursor on it.
    pub fn available(&mut self) -> bool {
        if self.state == CursorState::Ready {
            self.pos = 0;
            self.state = CursorState::Scanning;
        }
        if self.consumed {
            self.current = self.split_next();
        }
        if self.current.is_some() {
            self.consumed = false;
            true
        } else {
            false
        }
    }

    fn split_next(&mut self) -> Option<&'a [u8]> {
        let rest = &self.message[self.pos..];
        let start = rest.iter().position(|&b| b != self.separator)?;
        let len = rest[start..]
            .iter()
            .position(|&b| b == self.separator)
            .unwrap_or(rest.len() - start);
        let field = &rest[start..start + len];
        // Step past the terminating separator, if any.
        self.pos = (self.pos + start + len + 1).min(self.message.len());
        Some(field)
    }

    /// Next field as raw bytes, consuming it.
    pub fn next_field(&mut self) -> Option<&'a [u8]> {
        if !self.available() {
            return None;
        }
        self.consumed = true;
        self.current
    }

    /// Next field parsed as a decimal integer; `0` when missing or not numeric.
    pub fn read_int(&mut self) -> i32 {
        self.try_read_int().unwrap_or(0)
    }

    /// Like [`Args::read_int`] but distinguishes a missing field from a literal zero.
    pub fn try_read_int(&mut self) -> Result<i32, FieldError> {
        self.next_field().map(parse_int).ok_or(FieldError::Missing)
    }

    /// First byte of the next field; `0` when missing.
    pub fn read_char(&mut self) -> u8 {
        self.next_field().and_then(|f| f.first().copied()).unwrap_or(0)
    }

    /// Next field as UTF-8 text. Consumes the field even when it is not valid UTF-8.
    pub fn read_str(&mut self) -> Option<&'a str> {
        self.next_field().and_then(|f| std::str::from_utf8(f).ok())
    }

    /// Copy the next field into `dest`, truncating to fit. Returns bytes copied.
    pub fn copy_into(&mut self, dest: &mut [u8]) -> usize {
        match self.next_field() {
            Some(field) => {
                let n = field.len().min(dest.len());
                dest[..n].copy_from_slice(&field[..n]);
                n
            }
            None => 0,
        }
    }

    /// Whether the next field equals `literal`. The field is consumed either way.
    pub fn equals(&mut self, literal: &[u8]) -> bool {
        self.next_field().is_some_and(|f| f == literal)
    }
}

impl<'a> Iterator for Args<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field()
    }
}

/// Decimal parse with C `atoi` leniency: leading whitespace, optional sign,
/// digits up to the first non-digit. Saturates instead of wrapping.
pub fn parse_int(field: &[u8]) -> i32 {
    let mut bytes = field
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .peekable();
    let negative = match bytes.peek() {
        Some(b'-') => {
            bytes.next();
            true
        }
        Some(b'+') => {
            bytes.next();
            false
        }
        _ => false,
    };
    let mut value: i32 = 0;
    for b in bytes.take_while(u8::is_ascii_digit) {
        let digit = i32::from(b - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }
    value
}
