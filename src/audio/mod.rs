//! # Audio Pipeline
//!
//! Capture-side and playback-side building blocks of the voice client.
//!
//! ## Key Components:
//! - **Frame Slicer** (`slicer`): irregular device callbacks → fixed-size frames
//! - **Send Buffer** (`send_buffer`): frames → 200 ms windows → base64 PCM16 messages
//! - **PCM codec** (`pcm`): float ↔ 16-bit little-endian PCM, base64
//! - **Playback** (`playback`): receive queue and the single-consumer scheduler
//! - **Devices** (`device`): capture/output traits and their WAV implementations
//!
//! ## Audio Format:
//! - **Sample Rate**: 24kHz (configurable)
//! - **Bit Depth**: 16-bit PCM on the wire, `f32` in [-1.0, 1.0] in memory
//! - **Channels**: Mono
//! - **Encoding**: Little-endian signed integers

pub mod device;
pub mod pcm;
pub mod playback;
pub mod send_buffer;
pub mod slicer;

pub use device::{AudioInput, AudioOutput, PlayableBuffer, WavInput, WavOutput};
pub use playback::{EncodedChunk, PlaybackHandle, PlaybackScheduler, PlaybackState, PlaybackStats, ReceiveQueue};
pub use send_buffer::{FlushedWindow, SendBuffer};
pub use slicer::{AudioFrame, FrameSlicer};
