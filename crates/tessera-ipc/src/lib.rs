//! # Tessera IPC
//!
//! The browser side of renderer connections: the message vocabulary, the
//! envelope codec, the [`Transport`] abstraction and the [`ConnectionActor`]
//! that pumps one connection, plus the [`ProcessHost`] through which the rest
//! of the browser sends messages to renderers.

pub mod channel;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod process_host;
pub mod traits;

pub use channel::ChannelTransport;
pub use connection::{
    CloseConnection, ConnectionActor, ConnectionState, ConnectionStatusUpdate, IncomingMessage,
    SendMessage,
};
pub use envelope::{Decoded, Envelope, RawMessage, decode, encode};
pub use error::IpcError;
pub use messages::{
    FrameHostMsg, FrameMsg, HandleIndex, InputEvent, KeyEventKind, KeyboardEvent, MouseEvent,
    MouseEventKind, TerminationStatus, WheelEvent, WidgetInputEvent,
};
pub use process_host::{ConnectionRegistry, OutgoingMessage, ProcessHost};
pub use traits::Transport;
