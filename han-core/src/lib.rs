//! HAN messenger: command framing and dispatch over a single ordered byte stream.
//! Host-driven: the host owns the link and feeds bytes; handlers run synchronously.

pub mod args;
pub mod config;
pub mod dispatch;
pub mod messenger;
pub mod protocol;
pub mod request;
pub mod sender;
pub mod stream;
pub mod tokenizer;

pub use args::{Args, FieldError};
pub use config::{ConfigError, MessengerConfig};
pub use dispatch::{Context, DispatchTable, Dispatched, Handler, RegisterError};
pub use messenger::{LinkState, Messenger};
pub use protocol::{Catalog, CatalogError, Reserved, MAX_CALLBACKS};
pub use request::{RequestError, RestRequest};
pub use sender::{AckPolicy, Delivery, SendError};
pub use stream::{IoStream, MemoryStream, Stream};
pub use tokenizer::{Framing, MessageState, Tokenizer};
