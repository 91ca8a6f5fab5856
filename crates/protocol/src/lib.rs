//! Tandem Protocol
//!
//! Shared types for communication between the Tandem generation server and
//! its chat clients. Push-channel frames are serialized as tagged JSON over
//! WebSocket; the fallback endpoint speaks plain JSON bodies over HTTP.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::ClientFrame;
pub use server::ServerEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
