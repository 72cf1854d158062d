//! HAN wire protocol: limits, reserved command ids, and the command name catalog.

/// Number of handler slots; valid handler ids are `1..=MAX_CALLBACKS`.
pub const MAX_CALLBACKS: usize = 50;

/// Catalog names are stored null-terminated in this many bytes on the device.
pub const MAX_COMMAND_LENGTH: usize = 16;

/// Default message buffer capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Default acknowledgement wait per attempt, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of acknowledgement attempts.
pub const DEFAULT_RETRY_COUNT: u32 = 10;

pub const DEFAULT_FIELD_SEPARATOR: u8 = b',';
pub const DEFAULT_COMMAND_SEPARATOR: u8 = b';';

/// First id handed out by the default catalog (right after the reserved ids).
pub const FIRST_CATALOG_ID: u16 = 4;

/// Command names known to the device firmware, in id order.
pub const DEFAULT_COMMANDS: &[&str] = &[
    "system_reset",
    "system_status",
    "valve_on",
    "valve_off",
    "valve_toggle",
    "valve_state",
];

/// Protocol-level command ids. Conventions for the coordinator; the core never enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Reserved {
    /// Link-level communication error.
    CommError = 0,
    /// Peer acknowledges a received command.
    Ack = 1,
    /// Sent by the device after the link opens.
    Ready = 2,
    /// Malformed or unknown command.
    Error = 3,
}

impl Reserved {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Self::CommError),
            1 => Some(Self::Ack),
            2 => Some(Self::Ready),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error building a command catalog.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog holds at most 50 commands, got {0}")]
    TooManyCommands(usize),
    #[error("command name {0:?} exceeds 15 bytes")]
    NameTooLong(String),
    #[error("command name is empty")]
    EmptyName,
    #[error("duplicate command name {0:?}")]
    Duplicate(String),
    #[error("command id {0} is outside 1..=50")]
    IdOutOfRange(usize),
}

/// Fixed name -> id table. Ids are consecutive starting at `first_id`.
#[derive(Debug, Clone)]
pub struct Catalog {
    first_id: u16,
    names: Vec<String>,
}

impl Catalog {
    pub fn new<I, S>(first_id: u16, names: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() > MAX_CALLBACKS {
            return Err(CatalogError::TooManyCommands(names.len()));
        }
        if first_id == 0 {
            return Err(CatalogError::IdOutOfRange(0));
        }
        let last_id = first_id as usize + names.len().saturating_sub(1);
        if !names.is_empty() && last_id > MAX_CALLBACKS {
            return Err(CatalogError::IdOutOfRange(last_id));
        }
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if name.len() >= MAX_COMMAND_LENGTH {
                return Err(CatalogError::NameTooLong(name.clone()));
            }
            if names[..i].contains(name) {
                return Err(CatalogError::Duplicate(name.clone()));
            }
        }
        Ok(Self { first_id, names })
    }

    /// Resolve a textual command name to its id.
    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.first_id + i as u16)
    }

    pub fn name_of(&self, id: u16) -> Option<&str> {
        let index = id.checked_sub(self.first_id)? as usize;
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (self.first_id + i as u16, n.as_str()))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            first_id: FIRST_CATALOG_ID,
            names: DEFAULT_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
