//! Puppetry - drives a virtual character from a conversation backend
//!
//! The binary connects three sockets and one HTTP endpoint:
//!
//! - **Event server** (WebSocket): inbound `ai_response` / speech events,
//!   outbound user text
//! - **VAD server** (WebSocket, optional): outbound microphone batches
//! - **Runtime bridge** (WebSocket, optional): commands to the character
//! - **Backend** (HTTP): voice audio by id
//!
//! The timing-sensitive work lives in `puppetstage`; this crate only wires it
//! up and routes events.

pub mod app;
pub mod bridge;
pub mod fetch;
pub mod router;
pub mod settings;
pub mod telemetry;

pub use app::{App, AppOptions};
pub use bridge::{BridgeTarget, LogTarget};
pub use fetch::{AudioFetcher, AudioSource, FetchError};
pub use router::{Router, Stage};
