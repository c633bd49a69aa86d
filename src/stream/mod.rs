//! Component F: Stream Receiver (§4.F).

pub mod backpressure;
pub mod connection;
pub mod model;
pub mod receiver;

pub use backpressure::OutboundMessage;
pub use connection::ConnectionState;
pub use model::{
    ClientReconnectRequest, ClientReconnectResponse, Health, RecoveryStrategy, RejectedSymbol, SubscribeAck,
    SubscribeRequest, TickMessage, WsCapabilityType,
};
pub use receiver::{StreamReceiver, StreamReceiverConfig};
