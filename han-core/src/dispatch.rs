//! Dispatch table: command id -> handler, with a default handler for everything else.

use tracing::{debug, warn};

use crate::args::Args;
use crate::protocol::{Catalog, MAX_CALLBACKS};
use crate::sender::{self, SendError};
use crate::stream::Stream;
use crate::tokenizer::Framing;

/// Error registering a handler.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("command id 0 is reserved")]
    ReservedId,
    #[error("command id {0} exceeds the {} handler slots", MAX_CALLBACKS)]
    OutOfRange(u16),
    #[error("unknown command name {0:?}")]
    UnknownCommand(String),
}

/// Which handler a message was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Registered handler at this id ran.
    Handler(u16),
    /// No handler for this id; the default handler ran.
    Default(i32),
    /// No handler for this id and no default handler.
    Unhandled(i32),
}

/// What a handler sees while it runs: the parsed id, the remaining fields,
/// and a way to answer on the same link.
pub struct Context<'a> {
    id: i32,
    args: Args<'a>,
    framing: &'a Framing,
    stream: &'a mut dyn Stream,
}

impl<'a> Context<'a> {
    pub(crate) fn new(message: &'a [u8], framing: &'a Framing, stream: &'a mut dyn Stream) -> Self {
        Self {
            id: 0,
            args: Args::new(message, framing.field_separator),
            framing,
            stream,
        }
    }

    /// Command id of the message being handled (`0` if it did not parse).
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Cursor over the fields after the command id.
    pub fn args(&mut self) -> &mut Args<'a> {
        &mut self.args
    }

    /// Write a command back to the peer. Never waits for an acknowledgement.
    pub fn reply(&mut self, id: u16, payload: &str) -> Result<(), SendError> {
        sender::write_command(&mut *self.stream, self.framing, id, payload)
    }
}

/// Command handler. Implemented for any `FnMut(&mut Context<'_>)`.
pub trait Handler {
    fn handle(&mut self, ctx: &mut Context<'_>);
}

impl<F> Handler for F
where
    F: FnMut(&mut Context<'_>),
{
    fn handle(&mut self, ctx: &mut Context<'_>) {
        self(ctx)
    }
}

/// Fixed-size handler table plus one default slot.
pub struct DispatchTable {
    slots: Vec<Option<Box<dyn Handler>>>,
    default: Option<Box<dyn Handler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CALLBACKS).map(|_| None).collect(),
            default: None,
        }
    }

    /// Register `handler` for `id` (1..=MAX_CALLBACKS), replacing any previous one.
    pub fn register<H: Handler + 'static>(&mut self, id: u16, handler: H) -> Result<(), RegisterError> {
        let index = slot_index(id)?;
        self.slots[index] = Some(Box::new(handler));
        Ok(())
    }

    /// Register by catalog name. Returns the resolved id.
    pub fn register_name<H: Handler + 'static>(
        &mut self,
        catalog: &Catalog,
        name: &str,
        handler: H,
    ) -> Result<u16, RegisterError> {
        let id = catalog
            .id_of(name)
            .ok_or_else(|| RegisterError::UnknownCommand(name.to_string()))?;
        self.register(id, handler)?;
        Ok(id)
    }

    pub fn register_default<H: Handler + 'static>(&mut self, handler: H) {
        self.default = Some(Box::new(handler));
    }

    pub fn is_registered(&self, id: u16) -> bool {
        slot_index(id).is_ok_and(|i| self.slots[i].is_some())
    }

    /// Read the command id from the first field and run the matching handler.
    pub fn dispatch(&mut self, ctx: &mut Context<'_>) -> Dispatched {
        let id = ctx.args.read_int();
        ctx.id = id;
        let slot = u16::try_from(id)
            .ok()
            .and_then(|id| slot_index(id).ok())
            .and_then(|i| self.slots[i].as_mut());
        if let Some(handler) = slot {
            debug!(id, "dispatching command");
            handler.handle(ctx);
            // Range checked by slot_index above.
            return Dispatched::Handler(id as u16);
        }
        match self.default.as_mut() {
            Some(handler) => {
                debug!(id, "no handler registered, using default");
                handler.handle(ctx);
                Dispatched::Default(id)
            }
            None => {
                warn!(id, "no handler registered and no default handler");
                Dispatched::Unhandled(id)
            }
        }
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_index(id: u16) -> Result<usize, RegisterError> {
    match id as usize {
        0 => Err(RegisterError::ReservedId),
        n if n > MAX_CALLBACKS => Err(RegisterError::OutOfRange(id)),
        n => Ok(n - 1),
    }
}
