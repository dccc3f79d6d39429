//! # Voice Client
//!
//! Connects to the relay, streams captured audio up and plays the streamed
//! response back.
//!
//! - `connection`: socket setup with a single timeout-triggered retry
//! - `session`: the [`VoiceSession`] lifecycle and its status channel

pub mod connection;
pub mod session;

pub use connection::{connect_with_retry, ClientSocket};
pub use session::{SessionStats, SessionStatus, VoiceSession};
