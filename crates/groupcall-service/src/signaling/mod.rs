//! Client signaling: wire messages, routing and the WebSocket endpoint.

pub mod messages;
pub mod router;
pub mod websocket;

pub use messages::{InboundMessage, OutboundMessage};
pub use router::{ClientSession, SignalingRouter};
pub use websocket::{signaling_router, SignalingState, WebSocketTransport};
