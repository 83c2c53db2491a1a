//! Wire protocol for Puppetry.
//!
//! Two halves:
//!
//! - [`messages`]: the JSON events exchanged with the conversation backend
//!   (outbound text/audio/ping, inbound `ai_response`, `speech_started`, ...).
//! - [`transport`]: [`EventTransport`], a duplex WebSocket connection that
//!   reconnects on its own until its owner closes it.
//!
//! The transport never queues. `send` either hands the payload to a live
//! socket or returns `false`; real-time audio and animation cues lose their
//! value when delayed, so callers decide what to drop.

pub mod messages;
pub mod reconnect;
pub mod transport;

pub use messages::{AiResponse, InboundEvent, Incoming, Outbound, ResponseMode, TextCue};
pub use reconnect::ReconnectPolicy;
pub use transport::{
    ConnectionState, EventTransport, MessageChannel, Subscription, TransportConfig,
    TransportError,
};
