//! Connection to the remote live model: wire messages, the WebSocket
//! transport and the per-session lifecycle.

pub mod protocol;
pub mod session;
pub mod transport;
