pub mod connection;
pub mod events;
pub mod socket;

pub use connection::{ConnectionManager, SocketHandle};
pub use events::{
    ConnectionStatus, DeletedPayload, Frame, InboundEvent, Lifecycle, OutboundEvent, PresencePayload,
    SocketEvent, TypingPayload,
};
pub use socket::{SocketConnector, SocketLink, WsConnector};
