//! # Configuration Management
//!
//! Loads the companion configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - `config.toml` in the working directory (optional)
//! - Environment variables with the `APP_` prefix (`__` separates nested keys,
//!   e.g. `APP_AUDIO__SENSITIVITY=1.5`)
//! - A few well-known variables: `HOST`, `PORT`, `GEMINI_API_KEY` / `API_KEY`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables
//! 2. `APP_` environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! The `avatar` section and `audio.sensitivity` are the only values the
//! configuration panel may change at runtime (see [`AppConfig::update_from_json`]).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Lowest microphone gain the configuration panel may set.
pub const MIN_SENSITIVITY: f32 = 0.1;
/// Highest microphone gain the configuration panel may set.
pub const MAX_SENSITIVITY: f32 = 3.0;

/// Capture rate the live speech service accepts (`audio/pcm;rate=16000`).
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Accent colours understood by the renderer.
pub const THEMES: [&str; 5] = ["indigo", "rose", "emerald", "amber", "cyan"];

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub avatar: AvatarConfig,
    pub memory: MemoryConfig,
}

/// Local HTTP API settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only the local renderer can connect (default)
/// - `host = "0.0.0.0"`: renderer running on another machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote conversational speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the bidirectional streaming API
    pub endpoint: String,
    /// Model used for the session
    pub model: String,
    /// Prebuilt voice name ("Kore" is the soft female voice)
    pub voice: String,
    /// API key, appended to the endpoint as `?key=`
    pub api_key: String,
}

/// Audio capture and playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Frame source: `"microphone"` or `"wav"`
    pub input: String,
    /// WAV file replayed when `input = "wav"`
    pub input_wav_path: Option<String>,
    /// Playback sink: `"speaker"` or `"silent"`
    pub output: String,
    /// Capture rate sent to the service (Hz)
    pub capture_sample_rate: u32,
    /// Rate of the PCM the service sends back (Hz)
    pub playback_sample_rate: u32,
    /// Samples per capture frame
    pub frame_size: usize,
    /// Microphone gain applied to every captured sample
    pub sensitivity: f32,
}

/// Values consumed by the excluded avatar renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Custom VRM model the renderer should load (None = bundled model)
    pub model_url: Option<String>,
    pub animation_intensity: f32,
    pub show_transcript: bool,
    pub theme: String,
}

/// Persistence of the memory string and transcript sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// TOML file holding the memory string
    pub path: String,
    /// Number of transcript entries kept in the log
    pub transcript_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                model: "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
                voice: "Kore".to_string(),
                api_key: String::new(),
            },
            audio: AudioConfig {
                input: "microphone".to_string(),
                input_wav_path: None,
                output: "speaker".to_string(),
                capture_sample_rate: CAPTURE_SAMPLE_RATE,
                playback_sample_rate: 24000,
                frame_size: 4096,
                sensitivity: 1.0,
            },
            avatar: AvatarConfig {
                model_url: None,
                animation_intensity: 1.0,
                show_transcript: true,
                theme: "rose".to_string(),
            },
            memory: MemoryConfig {
                path: "azumi_memory.toml".to_string(),
                transcript_capacity: 11,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: override the API port
    /// - `APP_AUDIO__INPUT=wav`: replay a WAV file instead of the microphone
    /// - `GEMINI_API_KEY=...`: API key for the speech service
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

        if let Some(key) = env::var("GEMINI_API_KEY")
            .ok()
            .or_else(|| env::var("API_KEY").ok())
            .filter(|key| !key.is_empty())
        {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// The sensitivity range is enforced here, at the configuration boundary;
    /// the capture pipeline applies whatever gain it is handed.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.live.endpoint.starts_with("ws://") || self.live.endpoint.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Live endpoint must be a ws:// or wss:// URL, got '{}'",
                self.live.endpoint
            ));
        }

        if self.live.model.is_empty() {
            return Err(anyhow::anyhow!("Live model cannot be empty"));
        }

        if !matches!(self.audio.input.as_str(), "microphone" | "wav") {
            return Err(anyhow::anyhow!("Unknown audio input '{}'", self.audio.input));
        }

        if self.audio.input == "wav" && self.audio.input_wav_path.is_none() {
            return Err(anyhow::anyhow!("audio.input_wav_path is required when audio.input = \"wav\""));
        }

        if !matches!(self.audio.output.as_str(), "speaker" | "silent") {
            return Err(anyhow::anyhow!("Unknown audio output '{}'", self.audio.output));
        }

        if self.audio.capture_sample_rate != CAPTURE_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Capture sample rate must be {} Hz, the rate the speech service expects; got {}",
                CAPTURE_SAMPLE_RATE,
                self.audio.capture_sample_rate
            ));
        }

        if self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Playback sample rate must be greater than 0"));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Frame size must be greater than 0"));
        }

        if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&self.audio.sensitivity) {
            return Err(anyhow::anyhow!(
                "Microphone sensitivity must be between {} and {}, got {}",
                MIN_SENSITIVITY,
                MAX_SENSITIVITY,
                self.audio.sensitivity
            ));
        }

        if !(self.avatar.animation_intensity >= 0.0) {
            return Err(anyhow::anyhow!("Animation intensity cannot be negative"));
        }

        if !THEMES.contains(&self.avatar.theme.as_str()) {
            return Err(anyhow::anyhow!("Unknown theme '{}'", self.avatar.theme));
        }

        if self.memory.transcript_capacity == 0 {
            return Err(anyhow::anyhow!("Transcript capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update coming from the configuration panel.
    ///
    /// Only the runtime-tunable values are accepted:
    /// `{"audio": {"sensitivity": 1.4}, "avatar": {"model_url": "...", "animation_intensity": 0.8,
    /// "show_transcript": false, "theme": "cyan"}}`. Sending `"model_url": null`
    /// goes back to the bundled model.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(audio) = partial_config.get("audio") {
            if let Some(sensitivity) = audio.get("sensitivity").and_then(|v| v.as_f64()) {
                self.audio.sensitivity = sensitivity as f32;
            }
        }

        if let Some(avatar) = partial_config.get("avatar") {
            match avatar.get("model_url") {
                Some(serde_json::Value::Null) => self.avatar.model_url = None,
                Some(url) => {
                    if let Some(url) = url.as_str() {
                        self.avatar.model_url = Some(url.to_string());
                    }
                }
                None => {}
            }
            if let Some(intensity) = avatar.get("animation_intensity").and_then(|v| v.as_f64()) {
                self.avatar.animation_intensity = intensity as f32;
            }
            if let Some(show) = avatar.get("show_transcript").and_then(|v| v.as_bool()) {
                self.avatar.show_transcript = show;
            }
            if let Some(theme) = avatar.get("theme").and_then(|v| v.as_str()) {
                self.avatar.theme = theme.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Endpoint URL with the API key attached.
    pub fn live_url(&self) -> String {
        if self.live.api_key.is_empty() {
            self.live.endpoint.clone()
        } else {
            format!("{}?key={}", self.live.endpoint, self.live.api_key)
        }
    }
}
