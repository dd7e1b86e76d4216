use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from
/// a YAML file. All fields are optional to allow partial configuration;
/// anything left out falls back to environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3100
///
/// completion:
///   api_key: "sk-your-key"
///   base_url: "https://api.openai.com/v1"
///   model: "gpt-4o-mini"
///   max_tokens: 256
///   temperature: 0.7
///
/// conversation:
///   system_instruction: "You are a concise phone assistant."
///   greeting: "Hello! How can I help you today?"
///   farewell: "Thank you for calling. Goodbye!"
///   language: "en-US"
///   voice: "en-US-Journey-D"
///
/// chunking:
///   flush_threshold: 15
///   boundaries: ".!?,"
///
/// relay:
///   public_url: "wss://gateway.example.com/relay"
///   end_call_grace_ms: 3000
///
/// security:
///   cors_allowed_origins: "*"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_relay_connections: 500
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub completion: Option<CompletionYaml>,
    pub conversation: Option<ConversationYaml>,
    pub chunking: Option<ChunkingYaml>,
    pub relay: Option<RelayYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Completion service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CompletionYaml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Conversation texts and relay voice selection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConversationYaml {
    pub system_instruction: Option<String>,
    pub greeting: Option<String>,
    pub farewell: Option<String>,
    pub apology: Option<String>,
    pub language: Option<String>,
    pub voice: Option<String>,
}

/// Sentence-boundary chunking settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChunkingYaml {
    pub flush_threshold: Option<usize>,
    pub boundaries: Option<String>,
}

/// Relay channel settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub public_url: Option<String>,
    pub end_call_grace_ms: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

/// Security settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_relay_connections: Option<usize>,
    pub max_connections_per_ip: Option<usize>,
}

impl YamlConfig {
    /// Load and parse a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_parses() {
        let yaml = r#"
server:
  port: 4000
completion:
  model: "gpt-4o"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.server.unwrap().port, Some(4000));
        let completion = config.completion.unwrap();
        assert_eq!(completion.model.as_deref(), Some("gpt-4o"));
        assert!(completion.api_key.is_none());
        assert!(config.security.is_none());
    }

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        let config: YamlConfig = serde_yaml::from_str("{}").expect("parse");
        assert!(config.server.is_none());
        assert!(config.completion.is_none());
    }

    #[test]
    fn test_full_yaml_round_trip() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8443
  tls:
    cert_path: "/etc/certs/fullchain.pem"
    key_path: "/etc/certs/privkey.pem"
completion:
  api_key: "sk-test"
  temperature: 0.5
conversation:
  greeting: "Hi there."
  voice: "en-GB-Journey-F"
chunking:
  flush_threshold: 20
  boundaries: ".!?"
relay:
  public_url: "wss://example.com/relay"
  end_call_grace_ms: 1500
security:
  cors_allowed_origins: "*"
  max_connections_per_ip: 5
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).expect("parse");
        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(
            server.tls.unwrap().cert_path.as_deref(),
            Some("/etc/certs/fullchain.pem")
        );
        assert_eq!(config.chunking.unwrap().flush_threshold, Some(20));
        assert_eq!(config.relay.unwrap().end_call_grace_ms, Some(1500));
        assert_eq!(config.security.unwrap().max_connections_per_ip, Some(5));
    }
}
