//! # Configuration Management
//!
//! This module handles loading and managing configuration for both the relay
//! server and the voice client, from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and TOML/env values
//! - **derive macros**: Automatically generate Debug, Clone, Serialize, Deserialize
//! - **Option<T>**: The upstream credential is optional at load time and only
//!   required by the requests that actually need it
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER__HOST, APP_AUDIO__FRAME_SIZE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Name of the environment variable holding the upstream API credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main configuration shared by the server and the client binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub upstream: UpstreamConfig,
    pub audio: AudioConfig,
    pub client: ClientConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" accepts connections on all interfaces)
/// - `port`: first TCP port to try
/// - `port_retry_limit`: how many successive ports to try when the first is occupied
/// - `static_dir`: directory served as static assets, containing `index.html`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub port_retry_limit: u16,
    pub static_dir: String,
}

/// Origins allowed for both plain HTTP requests and WebSocket upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    /// Exact, case-sensitive match against the allow list.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

/// Upstream realtime speech service settings.
///
/// The `vad_*` fields are the voice-activity-detection parameters sent in the
/// one-time `session.update` message; they decide when the service considers
/// the speaker's turn complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub model: String,
    pub voice: String,
    pub modalities: Vec<String>,
    pub audio_format: String,
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    /// Never serialized back out (e.g. into a config dump).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl UpstreamConfig {
    /// Full WebSocket URL including the model query parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

/// Audio pipeline settings.
///
/// ## Defaults:
/// - 24 kHz mono, matching the upstream pcm16 format
/// - 4096-sample frames from the frame slicer
/// - 200 ms send windows (4800 samples at 24 kHz)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub flush_threshold_ms: u32,
    pub receive_queue_capacity: usize,
}

impl AudioConfig {
    /// Number of samples a send window must reach before it is flushed.
    pub fn flush_threshold_samples(&self) -> usize {
        (self.sample_rate as usize * self.flush_threshold_ms as usize) / 1000
    }
}

/// Voice client settings (used by the `relay-client` binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    pub origin: String,
    pub connect_timeout_ms: u64,
    /// Samples delivered per simulated device callback (10 ms at 24 kHz).
    pub callback_samples: usize,
    pub input_wav: String,
    pub output_wav: String,
    pub realtime_playback: bool,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                port_retry_limit: 10,
                static_dir: "public".to_string(),
            },
            cors: CorsConfig {
                allowed_origins: vec![
                    "https://realtime-syntax-ad5r.vercel.app".to_string(),
                    "http://localhost:3000".to_string(),
                ],
            },
            upstream: UpstreamConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
                voice: "sage".to_string(),
                modalities: vec!["text".to_string(), "audio".to_string()],
                audio_format: "pcm16".to_string(),
                vad_threshold: 0.5,
                vad_prefix_padding_ms: 300,
                vad_silence_duration_ms: 500,
                api_key: None,
            },
            audio: AudioConfig {
                sample_rate: 24000,
                frame_size: 4096,
                flush_threshold_ms: 200,
                receive_queue_capacity: 256,
            },
            client: ClientConfig {
                server_url: "ws://127.0.0.1:3000/ws".to_string(),
                origin: "http://localhost:3000".to_string(),
                connect_timeout_ms: 5000,
                callback_samples: 240,
                input_wav: "input.wav".to_string(),
                output_wav: "output.wav".to_string(),
                realtime_playback: true,
                instructions: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=4000`: Override the first port to try
    /// - `APP_AUDIO__FRAME_SIZE=2048`: Smaller capture frames
    /// - `APP_CLIENT__SERVER_URL=ws://host:3000/ws`: Where the client connects
    /// - `HOST`, `PORT`: Special cases used by deployment platforms
    /// - `OPENAI_API_KEY`: The upstream credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;

        // The credential bypasses the config builder so it never lands in a dump.
        config.upstream.api_key = env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty());

        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one CORS origin is configured
    /// - Audio sample rate, frame size and flush threshold are non-zero
    /// - Client timeouts and callback sizes are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!("At least one allowed origin is required"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Audio frame size must be greater than 0"));
        }

        if self.audio.flush_threshold_samples() == 0 {
            return Err(anyhow::anyhow!("Flush threshold must be at least one sample"));
        }

        if self.audio.receive_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Receive queue capacity must be greater than 0"));
        }

        if self.client.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.client.callback_samples == 0 {
            return Err(anyhow::anyhow!("Callback size must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.audio.frame_size, 4096);
        assert!(config.upstream.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flush_threshold_is_200ms_at_24khz() {
        let config = AppConfig::default();
        assert_eq!(config.audio.flush_threshold_samples(), 4800);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cors.allowed_origins.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.flush_threshold_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cors_allow_list_is_exact() {
        let cors = AppConfig::default().cors;
        assert!(cors.is_allowed("http://localhost:3000"));
        assert!(cors.is_allowed("https://realtime-syntax-ad5r.vercel.app"));
        assert!(!cors.is_allowed("http://localhost:3001"));
        assert!(!cors.is_allowed("https://evil.example"));
        assert!(!cors.is_allowed(""));
    }

    #[test]
    fn test_upstream_url_includes_model() {
        let upstream = AppConfig::default().upstream;
        assert_eq!(
            upstream.ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
        );
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = AppConfig::default();
        config.upstream.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
