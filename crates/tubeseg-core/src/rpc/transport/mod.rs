//! Transport implementations.

pub mod channel;
pub mod websocket;

pub use crate::rpc::{Connection, Connector};
pub use channel::{ChannelConnector, ChannelPeer};
pub use websocket::WebSocketConnector;
