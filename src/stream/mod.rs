//! Live telemetry stream: transport, envelope decoding and the connection
//! manager that ties them to the shared view.

mod envelope;
mod manager;
mod transport;

pub use envelope::{decode_envelope, DecodeError};
pub use manager::{ConnectionManager, ConnectionState, StreamSettings, DEFAULT_RECONNECT_DELAY};
pub use transport::{Frame, FrameStream, Transport, TransportError, WsTransport};
