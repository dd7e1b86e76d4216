//! Configuration module for the Parley Gateway server
//!
//! Configuration is assembled from three layers with the following priority
//! (highest to lowest): YAML file values, environment variables (a `.env`
//! file is loaded into the environment at startup), built-in defaults.
//! After loading and merging, the final configuration is validated; a
//! missing completion-service credential is fatal because the server could
//! not take a single call without it.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

pub mod yaml;

pub use yaml::YamlConfig;

use crate::core::completion::chunker::{DEFAULT_CHUNK_BOUNDARIES, DEFAULT_FLUSH_THRESHOLD};

/// Default system instruction given to the completion service.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful phone assistant. \
     Keep answers short, conversational, and easy to speak aloud. \
     Never use markup or emoji; your words are read out to a caller.";

/// Default greeting spoken by the relay when a call connects.
pub const DEFAULT_GREETING: &str = "Hello! How can I help you today?";

/// Default farewell spoken when the caller requests end-of-call.
pub const DEFAULT_FAREWELL: &str = "Thank you for calling. Goodbye!";

/// Default apology spoken when a completion request fails.
pub const DEFAULT_APOLOGY: &str =
    "I'm sorry, I'm having trouble answering right now. Please say that again in a moment.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The server cannot accept calls without a completion credential.
    #[error("missing completion service API key (set OPENAI_API_KEY)")]
    MissingCompletionCredential,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Server configuration
///
/// Contains everything needed to run the gateway: server binding and TLS,
/// completion-service access and sampling parameters, the conversation
/// texts handed to the relay, chunking behavior, and security settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Completion service
    /// API key for the completion service. Required at startup.
    pub completion_api_key: Option<String>,
    /// Base URL of an OpenAI-compatible chat completion API.
    pub completion_base_url: String,
    pub completion_model: String,
    /// Upper bound on tokens per completion; voice turns should stay short.
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,

    // Conversation
    pub system_instruction: String,
    pub greeting: String,
    pub farewell: String,
    pub apology: String,
    /// Language tag handed to the relay for transcription and synthesis.
    pub language: String,
    /// Voice identifier handed to the relay for synthesis.
    pub voice: String,

    // Speech chunking
    pub chunk_flush_threshold: usize,
    pub chunk_boundaries: String,

    // Relay channel
    /// Externally visible WebSocket URL advertised in the call-setup
    /// document. Derived from host/port when not set, which is only
    /// useful behind no proxy.
    pub relay_public_url: Option<String>,
    /// Delay between the farewell chunk and the end directive, giving the
    /// relay time to speak the farewell.
    pub end_call_grace_ms: u64,
    /// Relay connections silent for this long are torn down.
    pub idle_timeout_secs: u64,

    // Security settings
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_relay_connections: Option<usize>,
    pub max_connections_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3100,
            tls: None,
            completion_api_key: None,
            completion_base_url: "https://api.openai.com/v1".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            max_completion_tokens: Some(256),
            temperature: Some(0.7),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            farewell: DEFAULT_FAREWELL.to_string(),
            apology: DEFAULT_APOLOGY.to_string(),
            language: "en-US".to_string(),
            voice: "en-US-Journey-D".to_string(),
            chunk_flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            chunk_boundaries: DEFAULT_CHUNK_BOUNDARIES.to_string(),
            relay_public_url: None,
            end_call_grace_ms: 3_000,
            idle_timeout_secs: 300,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_relay_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_env_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variables as
    /// the base layer, then validate the merged result.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_env_unvalidated()?;
        config.apply_yaml(YamlConfig::from_file(path)?);
        config.validate()?;
        Ok(config)
    }

    fn from_env_unvalidated() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_string("HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            config.port = port;
        }
        config.tls = match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                ));
            }
        };

        config.completion_api_key = env_string("OPENAI_API_KEY");
        if let Some(base_url) = env_string("COMPLETION_BASE_URL") {
            config.completion_base_url = base_url;
        }
        if let Some(model) = env_string("COMPLETION_MODEL") {
            config.completion_model = model;
        }
        if let Some(max_tokens) = env_parse::<u32>("MAX_COMPLETION_TOKENS")? {
            config.max_completion_tokens = Some(max_tokens);
        }
        if let Some(temperature) = env_parse::<f32>("TEMPERATURE")? {
            config.temperature = Some(temperature);
        }

        if let Some(instruction) = env_string("SYSTEM_INSTRUCTION") {
            config.system_instruction = instruction;
        }
        if let Some(greeting) = env_string("GREETING_TEXT") {
            config.greeting = greeting;
        }
        if let Some(farewell) = env_string("FAREWELL_TEXT") {
            config.farewell = farewell;
        }
        if let Some(apology) = env_string("APOLOGY_TEXT") {
            config.apology = apology;
        }
        if let Some(language) = env_string("LANGUAGE") {
            config.language = language;
        }
        if let Some(voice) = env_string("TTS_VOICE") {
            config.voice = voice;
        }

        if let Some(threshold) = env_parse::<usize>("CHUNK_FLUSH_THRESHOLD")? {
            config.chunk_flush_threshold = threshold;
        }
        if let Some(boundaries) = env_string("CHUNK_BOUNDARIES") {
            config.chunk_boundaries = boundaries;
        }

        config.relay_public_url = env_string("RELAY_PUBLIC_URL");
        if let Some(grace) = env_parse::<u64>("END_CALL_GRACE_MS")? {
            config.end_call_grace_ms = grace;
        }
        if let Some(idle) = env_parse::<u64>("IDLE_TIMEOUT_SECS")? {
            config.idle_timeout_secs = idle;
        }

        config.cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS");
        if let Some(rps) = env_parse::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND")? {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = env_parse::<u32>("RATE_LIMIT_BURST_SIZE")? {
            config.rate_limit_burst_size = burst;
        }
        config.max_relay_connections = env_parse::<usize>("MAX_RELAY_CONNECTIONS")?;
        if let Some(per_ip) = env_parse::<usize>("MAX_CONNECTIONS_PER_IP")? {
            config.max_connections_per_ip = per_ip;
        }

        Ok(config)
    }

    /// Apply YAML overrides on top of the current values.
    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(tls) = server.tls
                && let (Some(cert), Some(key)) = (tls.cert_path, tls.key_path)
            {
                self.tls = Some(TlsConfig {
                    cert_path: PathBuf::from(cert),
                    key_path: PathBuf::from(key),
                });
            }
        }
        if let Some(completion) = yaml.completion {
            if completion.api_key.is_some() {
                self.completion_api_key = completion.api_key;
            }
            if let Some(base_url) = completion.base_url {
                self.completion_base_url = base_url;
            }
            if let Some(model) = completion.model {
                self.completion_model = model;
            }
            if completion.max_tokens.is_some() {
                self.max_completion_tokens = completion.max_tokens;
            }
            if completion.temperature.is_some() {
                self.temperature = completion.temperature;
            }
        }
        if let Some(conversation) = yaml.conversation {
            if let Some(instruction) = conversation.system_instruction {
                self.system_instruction = instruction;
            }
            if let Some(greeting) = conversation.greeting {
                self.greeting = greeting;
            }
            if let Some(farewell) = conversation.farewell {
                self.farewell = farewell;
            }
            if let Some(apology) = conversation.apology {
                self.apology = apology;
            }
            if let Some(language) = conversation.language {
                self.language = language;
            }
            if let Some(voice) = conversation.voice {
                self.voice = voice;
            }
        }
        if let Some(chunking) = yaml.chunking {
            if let Some(threshold) = chunking.flush_threshold {
                self.chunk_flush_threshold = threshold;
            }
            if let Some(boundaries) = chunking.boundaries {
                self.chunk_boundaries = boundaries;
            }
        }
        if let Some(relay) = yaml.relay {
            if relay.public_url.is_some() {
                self.relay_public_url = relay.public_url;
            }
            if let Some(grace) = relay.end_call_grace_ms {
                self.end_call_grace_ms = grace;
            }
            if let Some(idle) = relay.idle_timeout_secs {
                self.idle_timeout_secs = idle;
            }
        }
        if let Some(security) = yaml.security {
            if security.cors_allowed_origins.is_some() {
                self.cors_allowed_origins = security.cors_allowed_origins;
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
            if security.max_relay_connections.is_some() {
                self.max_relay_connections = security.max_relay_connections;
            }
            if let Some(per_ip) = security.max_connections_per_ip {
                self.max_connections_per_ip = per_ip;
            }
        }
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.completion_api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingCompletionCredential),
        }
        if self.chunk_flush_threshold == 0 {
            return Err(ConfigError::Invalid(
                "chunk flush threshold must be at least 1".to_string(),
            ));
        }
        if self.chunk_boundaries.is_empty() {
            return Err(ConfigError::Invalid(
                "chunk boundaries must not be empty".to_string(),
            ));
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ConfigError::Invalid(format!(
                "temperature {temperature} outside the valid range 0.0..=2.0"
            )));
        }
        if let Some(url) = &self.relay_public_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("relay public URL: {e}")))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(ConfigError::Invalid(format!(
                    "relay public URL must use ws or wss, got {}",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }

    /// Get the server address as a string in the format "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// WebSocket URL the relay should dial, as advertised by `/call-setup`.
    pub fn relay_url(&self) -> String {
        if let Some(url) = &self.relay_public_url {
            return url.clone();
        }
        let scheme = if self.is_tls_enabled() { "wss" } else { "ws" };
        format!("{}://{}/relay", scheme, self.address())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{key}={raw}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            completion_api_key: Some("sk-test".to_string()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3100);
        assert_eq!(config.chunk_flush_threshold, 15);
        assert_eq!(config.chunk_boundaries, ".!?,");
        assert_eq!(config.end_call_grace_ms, 3_000);
        assert!(!config.is_tls_enabled());
    }

    #[test]
    fn test_missing_completion_credential_is_fatal() {
        let config = ServerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCompletionCredential)
        ));

        let blank = ServerConfig {
            completion_api_key: Some("   ".to_string()),
            ..ServerConfig::default()
        };
        assert!(matches!(
            blank.validate(),
            Err(ConfigError::MissingCompletionCredential)
        ));
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid_config();
        config.chunk_flush_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.chunk_boundaries = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.temperature = Some(3.5);
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.relay_public_url = Some("https://not-a-websocket.example".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_address_formatting() {
        let mut config = valid_config();
        config.host = "127.0.0.1".to_string();
        config.port = 9000;
        assert_eq!(config.address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_relay_url_derivation_and_override() {
        let mut config = valid_config();
        config.host = "gateway.example.com".to_string();
        config.port = 443;
        assert_eq!(config.relay_url(), "ws://gateway.example.com:443/relay");

        config.relay_public_url = Some("wss://edge.example.com/relay".to_string());
        assert_eq!(config.relay_url(), "wss://edge.example.com/relay");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
server:
  port: 4433
completion:
  api_key: "sk-yaml"
  temperature: 0.2
chunking:
  flush_threshold: 30
"#,
        )
        .expect("parse");

        let mut config = ServerConfig::default();
        config.apply_yaml(yaml);

        assert_eq!(config.port, 4433);
        assert_eq!(config.completion_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.chunk_flush_threshold, 30);
        // Untouched values keep their defaults.
        assert_eq!(config.completion_model, "gpt-4o-mini");
        assert!(config.validate().is_ok());
    }
}
