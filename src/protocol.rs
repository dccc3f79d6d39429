//! # Realtime Message Types
//!
//! JSON messages exchanged between the voice client, the relay server and the
//! upstream realtime speech API.
//!
//! ## Message Format:
//! - **Client → Server → Upstream**: `input_audio_buffer.append` with base64 PCM16
//!   audio, plus `session.update` configuration events
//! - **Upstream → Server → Client**: session lifecycle notices, incremental
//!   audio (`response.audio.delta`) and `error` notices
//!
//! The relay never re-serializes forwarded messages: it only peeks at the
//! `type` field for logging. Typed events are built by the parties that
//! originate them.

use crate::config::UpstreamConfig;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events originated by the voice client or by the relay itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
}

/// Session parameters sent in a `session.update` event.
///
/// Every field is optional so a client can update only its instructions
/// while the relay owns the audio and turn-detection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl SessionConfig {
    /// The session configuration the relay sends once per upstream connection.
    pub fn from_upstream(upstream: &UpstreamConfig) -> Self {
        Self {
            modalities: Some(upstream.modalities.clone()),
            instructions: None,
            input_audio_format: Some(upstream.audio_format.clone()),
            output_audio_format: Some(upstream.audio_format.clone()),
            voice: Some(upstream.voice.clone()),
            turn_detection: Some(TurnDetection {
                detection_type: "server_vad".to_string(),
                threshold: upstream.vad_threshold,
                prefix_padding_ms: upstream.vad_prefix_padding_ms,
                silence_duration_ms: upstream.vad_silence_duration_ms,
            }),
        }
    }

    /// An instructions-only update, as sent by the voice client.
    pub fn instructions(text: impl Into<String>) -> Self {
        Self {
            instructions: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
}

/// Read the `type` field of a forwarded message without interpreting the rest.
///
/// Returns `None` for anything that is not a JSON object with a string `type`.
pub fn peek_type(text: &str) -> Option<String> {
    serde_json::from_str::<Envelope>(text)
        .ok()
        .map(|envelope| envelope.event_type)
}

/// Inbound events the voice client reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SessionCreated,
    SessionUpdated,
    ConversationCreated,
    /// `response.audio.delta`: base64 PCM16 in the `delta` field.
    AudioDelta { delta: String },
    /// Legacy `audio_buffer.append`: base64 PCM16 in the `audio` field.
    AudioAppend { audio: String },
    AudioDone,
    /// `error`, with the upstream's human-readable message.
    Error { message: String },
    /// Any other type starting with `error`.
    ErrorLike { event_type: String },
    Other { event_type: String },
}

impl InboundEvent {
    /// Classify one inbound text message.
    ///
    /// ## Errors:
    /// `PipelineError::Malformed` for invalid JSON, a missing `type`, or an
    /// audio event without its payload field.
    pub fn parse(text: &str) -> PipelineResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| PipelineError::Malformed(format!("invalid JSON: {}", e)))?;
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::Malformed("missing \"type\" field".to_string()))?;

        let string_field = |name: &str| -> PipelineResult<String> {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    PipelineError::Malformed(format!("{} without \"{}\" field", event_type, name))
                })
        };

        let event = match event_type {
            "session.created" => InboundEvent::SessionCreated,
            "session.updated" => InboundEvent::SessionUpdated,
            "conversation.created" => InboundEvent::ConversationCreated,
            "response.audio.delta" => InboundEvent::AudioDelta {
                delta: string_field("delta")?,
            },
            "audio_buffer.append" => InboundEvent::AudioAppend {
                audio: string_field("audio")?,
            },
            "response.audio.done" => InboundEvent::AudioDone,
            "error" => InboundEvent::Error {
                message: value
                    .pointer("/error/message")
                    .or_else(|| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            other if other.starts_with("error") => InboundEvent::ErrorLike {
                event_type: other.to_string(),
            },
            other => InboundEvent::Other {
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }
}

/// The error message the relay sends to its client before closing, shaped
/// like an upstream `error` event so clients handle both the same way.
pub fn relay_error_message(message: &str) -> String {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": "relay_error",
            "message": message,
        }
    })
    .to_string()
}
