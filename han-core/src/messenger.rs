//! Messenger: one tokenizer, one dispatch table and one link, driven by a single feed loop.

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::args::Args;
use crate::config::{ConfigError, MessengerConfig, DEFAULT_IDLE_TIMEOUT_MS};
use crate::dispatch::{Context, DispatchTable, Dispatched, Handler, RegisterError};
use crate::protocol::{Catalog, DEFAULT_BUFFER_SIZE};
use crate::sender::{self, AckPolicy, Delivery, SendError};
use crate::stream::Stream;
use crate::tokenizer::{Framing, MessageState, Tokenizer};

/// Whether inbound bytes may be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    /// An outbound exchange is in flight; the feed loop must not read.
    Sending,
}

/// Sets the link to `Sending` for as long as it lives.
struct PauseGuard<'a> {
    state: &'a mut LinkState,
}

impl<'a> PauseGuard<'a> {
    fn engage(state: &'a mut LinkState) -> Self {
        *state = LinkState::Sending;
        Self { state }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        *self.state = LinkState::Idle;
    }
}

pub struct Messenger<S> {
    stream: S,
    tokenizer: Tokenizer,
    table: DispatchTable,
    catalog: Catalog,
    ack_policy: AckPolicy,
    idle_timeout: Option<Duration>,
    last_byte_at: Option<Instant>,
    last_dispatch: Option<Dispatched>,
    state: LinkState,
}

impl<S: Stream> Messenger<S> {
    /// Messenger with default separators, buffer size and catalog.
    pub fn new(stream: S) -> Self {
        Self::with_framing(stream, Framing::default(), DEFAULT_BUFFER_SIZE)
    }

    pub fn with_framing(stream: S, framing: Framing, buffer_size: usize) -> Self {
        Self {
            stream,
            tokenizer: Tokenizer::new(framing, buffer_size),
            table: DispatchTable::new(),
            catalog: Catalog::default(),
            ack_policy: AckPolicy::default(),
            idle_timeout: Some(Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS)),
            last_byte_at: None,
            last_dispatch: None,
            state: LinkState::Idle,
        }
    }

    pub fn with_config(stream: S, config: &MessengerConfig) -> Result<Self, ConfigError> {
        let framing = config.framing()?;
        let mut messenger = Self::with_framing(stream, framing, config.buffer_size);
        messenger.ack_policy = config.ack_policy();
        messenger.idle_timeout = config.idle_timeout();
        Ok(messenger)
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn framing(&self) -> &Framing {
        self.tokenizer.framing()
    }

    /// Acknowledgement policy used by [`Messenger::send_acked`].
    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn link_state(&self) -> LinkState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == LinkState::Sending
    }

    pub fn register<H: Handler + 'static>(&mut self, id: u16, handler: H) -> Result<(), RegisterError> {
        self.table.register(id, handler)
    }

    /// Register by catalog name; returns the resolved id.
    pub fn register_name<H: Handler + 'static>(
        &mut self,
        name: &str,
        handler: H,
    ) -> Result<u16, RegisterError> {
        self.table.register_name(&self.catalog, name, handler)
    }

    pub fn register_default<H: Handler + 'static>(&mut self, handler: H) {
        self.table.register_default(handler);
    }

    /// Consume one byte; a completed message is dispatched before this returns.
    pub fn feed(&mut self, byte: u8) -> MessageState {
        self.last_byte_at = Some(Instant::now());
        let state = self.tokenizer.feed(byte);
        match state {
            MessageState::Ready => self.dispatch(),
            MessageState::Overflow => {
                warn!(
                    capacity = self.tokenizer.capacity(),
                    "message exceeds buffer, dropped"
                );
            }
            MessageState::Discarded => debug!("newline discarded partial message"),
            MessageState::Incomplete => {}
        }
        state
    }

    fn dispatch(&mut self) {
        let Self {
            tokenizer,
            table,
            stream,
            last_dispatch,
            ..
        } = self;
        if let Some(message) = tokenizer.message() {
            let mut ctx = Context::new(message, tokenizer.framing(), stream);
            *last_dispatch = Some(table.dispatch(&mut ctx));
        }
    }

    /// Outcome of the most recent dispatch.
    pub fn last_dispatch(&self) -> Option<Dispatched> {
        self.last_dispatch
    }

    /// Feed every byte the stream has ready, unless an exchange is in flight.
    /// Returns the number of bytes consumed.
    pub fn feed_available(&mut self) -> io::Result<usize> {
        self.expire_idle(Instant::now());
        let mut fed = 0;
        while self.state == LinkState::Idle && self.stream.available()? > 0 {
            let Some(byte) = self.stream.read_byte()? else {
                break;
            };
            self.feed(byte);
            fed += 1;
        }
        Ok(fed)
    }

    /// Drop a partial message, or the tail of an overflowed one, whose last
    /// byte is older than the idle timeout. Returns true if something was dropped.
    pub fn expire_idle(&mut self, now: Instant) -> bool {
        let (Some(timeout), Some(last)) = (self.idle_timeout, self.last_byte_at) else {
            return false;
        };
        if self.tokenizer.is_idle() || now.saturating_duration_since(last) < timeout {
            return false;
        }
        warn!(
            pending = self.tokenizer.pending(),
            "abandoning incomplete message after idle timeout"
        );
        self.tokenizer.reset();
        true
    }

    /// Cursor over the message completed by the last fed byte, starting at field 1.
    pub fn args(&self) -> Option<Args<'_>> {
        let separator = self.tokenizer.framing().field_separator;
        self.tokenizer
            .message()
            .map(|message| Args::new(message, separator))
    }

    /// Send one command. With a policy, blocks until the peer answers or the
    /// policy is exhausted; inbound feeding is paused for the duration.
    pub fn send(
        &mut self,
        id: u16,
        payload: &str,
        ack: Option<AckPolicy>,
    ) -> Result<Delivery, SendError> {
        let _pause = PauseGuard::engage(&mut self.state);
        sender::send(&mut self.stream, self.tokenizer.framing(), id, payload, ack)
    }

    /// Send and wait using the configured acknowledgement policy.
    pub fn send_acked(&mut self, id: u16, payload: &str) -> Result<Delivery, SendError> {
        let policy = self.ack_policy;
        self.send(id, payload, Some(policy))
    }

    /// Send to a remote node: `addr` goes out as the leading payload field.
    pub fn send_to(
        &mut self,
        id: u16,
        addr: u16,
        payload: &str,
        ack: Option<AckPolicy>,
    ) -> Result<Delivery, SendError> {
        let mut addressed = addr.to_string();
        if !payload.is_empty() {
            addressed.push(char::from(self.tokenizer.framing().field_separator));
            addressed.push_str(payload);
        }
        self.send(id, &addressed, ack)
    }

    /// Send by catalog name.
    pub fn send_command(
        &mut self,
        name: &str,
        data: &str,
        ack: Option<AckPolicy>,
    ) -> Result<Delivery, SendError> {
        let id = self
            .catalog
            .id_of(name)
            .ok_or_else(|| SendError::UnknownCommand(name.to_string()))?;
        self.send(id, data, ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Reserved;
    use crate::stream::MemoryStream;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counter() -> (Rc<RefCell<u32>>, impl FnMut(&mut Context<'_>)) {
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        (hits, move |_: &mut Context<'_>| *h.borrow_mut() += 1)
    }

    fn feed_str<S: Stream>(m: &mut Messenger<S>, bytes: &[u8]) -> Vec<MessageState> {
        bytes.iter().map(|&b| m.feed(b)).collect()
    }

    #[test]
    fn dispatches_registered_handler_once() {
        let (hits, handler) = counter();
        let mut m = Messenger::new(MemoryStream::new());
        m.register(3, handler).unwrap();
        feed_str(&mut m, b"3;;");
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(m.last_dispatch(), Some(Dispatched::Handler(3)));
    }

    #[test]
    fn unknown_id_dispatches_default_once() {
        let (h_hits, h) = counter();
        let (d_hits, d) = counter();
        let mut m = Messenger::new(MemoryStream::new());
        m.register(3, h).unwrap();
        m.register_default(d);
        feed_str(&mut m, b"99;;");
        assert_eq!(*h_hits.borrow(), 0);
        assert_eq!(*d_hits.borrow(), 1);
        assert_eq!(m.last_dispatch(), Some(Dispatched::Default(99)));
    }

    #[test]
    fn cursor_yields_all_fields() {
        let mut m = Messenger::new(MemoryStream::new());
        let states = feed_str(&mut m, b"7,a,b;");
        assert_eq!(*states.last().unwrap(), MessageState::Ready);
        let mut args = m.args().unwrap();
        assert_eq!(args.next_field(), Some(&b"7"[..]));
        assert_eq!(args.next_field(), Some(&b"a"[..]));
        assert_eq!(args.next_field(), Some(&b"b"[..]));
        assert!(!args.available());
    }

    #[test]
    fn handler_reads_remaining_fields() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut m = Messenger::new(MemoryStream::new());
        m.register(7, move |ctx: &mut Context<'_>| {
            let args = ctx.args();
            sink.borrow_mut().push((args.read_char(), args.read_int()));
        })
        .unwrap();
        feed_str(&mut m, b"7,x,12;7,y;");
        assert_eq!(*seen.borrow(), vec![(b'x', 12), (b'y', 0)]);
    }

    #[test]
    fn cursor_resets_between_messages() {
        let ids = Rc::new(RefCell::new(Vec::new()));
        let sink = ids.clone();
        let mut m = Messenger::new(MemoryStream::new());
        m.register_default(move |ctx: &mut Context<'_>| {
            // Consume only part of the first message.
            ctx.args().read_int();
            sink.borrow_mut().push(ctx.id());
        });
        feed_str(&mut m, b"11,a,b,c;12;");
        assert_eq!(*ids.borrow(), vec![11, 12]);
    }

    #[test]
    fn register_by_name_uses_catalog() {
        let (hits, handler) = counter();
        let mut m = Messenger::new(MemoryStream::new());
        assert_eq!(m.register_name("valve_on", handler).unwrap(), 6);
        feed_str(&mut m, b"6,1;");
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn custom_catalog() {
        let (hits, handler) = counter();
        let catalog = Catalog::new(3, ["valve_on"]).unwrap();
        let mut m = Messenger::new(MemoryStream::new()).with_catalog(catalog);
        assert_eq!(m.register_name("valve_on", handler).unwrap(), 3);
        feed_str(&mut m, b"3;;");
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn overflow_drops_message_without_dispatch() {
        let (hits, handler) = counter();
        let mut m = Messenger::with_framing(MemoryStream::new(), Framing::default(), 8);
        m.register_default(handler);
        let states = feed_str(&mut m, b"1234567;12345678;");
        assert_eq!(states[7], MessageState::Ready);
        assert!(states.contains(&MessageState::Overflow));
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn feed_available_drains_stream() {
        let (hits, handler) = counter();
        let mut stream = MemoryStream::new();
        stream.push_inbound(b"4,a;4,b;4");
        let mut m = Messenger::new(stream);
        m.register(4, handler).unwrap();
        assert_eq!(m.feed_available().unwrap(), 9);
        assert_eq!(*hits.borrow(), 2);
        m.stream_mut().push_inbound(b";");
        m.feed_available().unwrap();
        assert_eq!(*hits.borrow(), 3);
    }

    #[test]
    fn handler_reply_goes_to_stream() {
        let mut m = Messenger::new(MemoryStream::new());
        m.register(5, |ctx: &mut Context<'_>| {
            ctx.reply(Reserved::Ack.id(), "ok").unwrap();
        })
        .unwrap();
        feed_str(&mut m, b"5;");
        assert_eq!(m.stream().written(), b"1,ok;");
    }

    #[test]
    fn send_roundtrip_via_second_messenger() {
        let mut a = Messenger::new(MemoryStream::new());
        a.send(9, "kitchen,3", None).unwrap();
        let wire = a.stream_mut().take_written();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut b = Messenger::new(MemoryStream::new());
        b.register(9, move |ctx: &mut Context<'_>| {
            let fields: Vec<String> = ctx
                .args()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .collect();
            sink.borrow_mut().push(fields);
        })
        .unwrap();
        b.stream_mut().push_inbound(&wire);
        b.feed_available().unwrap();
        assert_eq!(*seen.borrow(), vec![vec!["kitchen".to_string(), "3".to_string()]]);
    }

    #[test]
    fn ack_timeout_releases_pause() {
        let mut m = Messenger::new(MemoryStream::new());
        let policy = AckPolicy::new(Duration::from_millis(100), 2);
        let started = Instant::now();
        let err = m.send(5, "ping", Some(policy)).unwrap_err();
        assert!(matches!(err, SendError::AckTimeout { attempts: 2 }));
        assert!(started.elapsed() >= policy.max_wait());
        assert_eq!(m.link_state(), LinkState::Idle);
        assert!(!m.is_paused());
    }

    #[test]
    fn ack_reply_dispatched_after_send() {
        let (hits, handler) = counter();
        let mut stream = MemoryStream::new();
        stream.push_inbound(b"1,5;");
        let mut m = Messenger::new(stream);
        m.register(Reserved::Ack.id(), handler).unwrap();
        let delivery = m
            .send(5, "ping", Some(AckPolicy::new(Duration::from_millis(10), 1)))
            .unwrap();
        assert_eq!(delivery, Delivery::Acknowledged { attempts: 1 });
        assert_eq!(*hits.borrow(), 0);
        m.feed_available().unwrap();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn send_acked_uses_configured_policy() {
        let cfg = MessengerConfig {
            ack_timeout_ms: 20,
            retry_count: 3,
            ..MessengerConfig::default()
        };
        let mut m = Messenger::with_config(MemoryStream::new(), &cfg).unwrap();
        assert_eq!(m.ack_policy(), AckPolicy::new(Duration::from_millis(20), 3));
        let err = m.send_acked(4, "").unwrap_err();
        assert!(matches!(err, SendError::AckTimeout { attempts: 3 }));
        m.stream_mut().push_inbound(b"1;");
        assert_eq!(
            m.send_acked(4, "").unwrap(),
            Delivery::Acknowledged { attempts: 1 }
        );
    }

    #[test]
    fn send_command_resolves_names() {
        let mut m = Messenger::new(MemoryStream::new());
        m.send_command("valve_off", "2", None).unwrap();
        assert_eq!(m.stream().written(), b"7,2;");
        let err = m.send_command("launch", "", None).unwrap_err();
        assert!(matches!(err, SendError::UnknownCommand(name) if name == "launch"));
    }

    #[test]
    fn idle_partial_message_expires() {
        let cfg = MessengerConfig {
            idle_timeout_ms: 50,
            ..MessengerConfig::default()
        };
        let (hits, handler) = counter();
        let mut stream = MemoryStream::new();
        stream.push_inbound(b"4,stale");
        let mut m = Messenger::with_config(stream, &cfg).unwrap();
        m.register_default(handler);
        m.feed_available().unwrap();
        assert!(!m.expire_idle(Instant::now()));
        assert!(m.expire_idle(Instant::now() + Duration::from_millis(60)));
        m.stream_mut().push_inbound(b";");
        m.feed_available().unwrap();
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn idle_expiry_ends_overflow_drop() {
        let cfg = MessengerConfig {
            buffer_size: 8,
            idle_timeout_ms: 50,
            ..MessengerConfig::default()
        };
        let (hits, handler) = counter();
        let mut m = Messenger::with_config(MemoryStream::new(), &cfg).unwrap();
        m.register(4, handler).unwrap();
        let states = feed_str(&mut m, b"123456789");
        assert!(states.contains(&MessageState::Overflow));
        assert!(m.expire_idle(Instant::now() + Duration::from_millis(60)));
        feed_str(&mut m, b"4,a;");
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn direct_feed_arms_idle_expiry() {
        let mut m = Messenger::new(MemoryStream::new());
        feed_str(&mut m, b"4,par");
        assert!(!m.expire_idle(Instant::now()));
        let later = Instant::now() + Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS + 1);
        assert!(m.expire_idle(later));
        assert!(!m.expire_idle(later));
    }

    #[test]
    fn send_to_prefixes_address() {
        let mut m = Messenger::new(MemoryStream::new());
        m.send_to(6, 12, "1", None).unwrap();
        m.send_to(5, 3, "", None).unwrap();
        assert_eq!(m.stream().written(), b"6,12,1;5,3;");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut remote = Messenger::new(MemoryStream::new());
        remote
            .register(6, move |ctx: &mut Context<'_>| {
                let args = ctx.args();
                sink.borrow_mut().push((args.read_int(), args.read_int()));
            })
            .unwrap();
        let wire = m.stream_mut().take_written();
        remote.stream_mut().push_inbound(&wire);
        remote.feed_available().unwrap();
        assert_eq!(*seen.borrow(), vec![(12, 1)]);
    }

    #[test]
    fn config_applies_separators() {
        let cfg = MessengerConfig {
            field_separator: ' ',
            command_separator: '\n',
            ..MessengerConfig::default()
        };
        let (hits, handler) = counter();
        let mut m = Messenger::with_config(MemoryStream::new(), &cfg).unwrap();
        m.register(8, handler).unwrap();
        feed_str(&mut m, b"8 on\n");
        assert_eq!(*hits.borrow(), 1);
        m.send(2, "", None).unwrap();
        assert_eq!(m.stream().written(), b"2 \n");
    }
}
