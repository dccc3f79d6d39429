//! # Realtime Relay
//!
//! A bidirectional audio relay between a voice client and a realtime speech
//! service.
//!
//! ## Crate Layout:
//! - **Server side**: `server`, `websocket`, `upstream`, `handlers`, `health`,
//!   `middleware`, `state`
//! - **Client side**: `audio` (slicing, send windows, PCM, playback, devices)
//!   and `client` (connection and session lifecycle)
//! - **Shared**: `config`, `error`, `protocol`

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod state;
pub mod upstream;
pub mod websocket;

/// Install the process-wide TLS crypto provider used by upstream `wss://`
/// connections. Must run before the first TLS handshake; repeated calls are
/// harmless.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
