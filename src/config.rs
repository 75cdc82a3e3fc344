//! Konfiguration
//!
//! Alle Werte, die den Media-Server betreffen (Basis-URL, App-Namespace,
//! Codec-Paar, Timeouts), werden von außen hereingereicht. Defaults
//! entsprechen dem ZLMediaKit-Setup im lokalen Netz.

use crate::sdp::CodecProfile;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Standard-Adresse des Media-Servers (HTTP-API Port von ZLMediaKit)
pub const DEFAULT_BASE_URL: &str = "http://192.168.2.91:8080";

/// Standard App-Namespace auf dem Server
pub const DEFAULT_APP: &str = "live";

/// Fester API-Pfad für WHIP/WHEP im ZLMediaKit-Format
pub const API_PATH: &str = "/index/api/webrtc";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid base URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("Invalid number for {key}: '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Konfiguration für Signaling und Media-Engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Host + Port des Media-Servers
    pub base_url: Url,
    /// App-Namespace (`app=` Query-Parameter)
    pub app: String,
    /// Gepinntes Video/Audio Codec-Paar
    pub codecs: CodecProfile,
    /// Timeout pro HTTP-Request in Millisekunden
    pub request_timeout_ms: u64,
    /// Optionale STUN/TURN URLs für die Media-Engine
    pub ice_servers: Vec<String>,
}

impl CallConfig {
    /// Erstellt eine Konfiguration für den angegebenen Server
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// Liest die Konfiguration aus Umgebungsvariablen
    ///
    /// Nicht gesetzte Variablen fallen auf die Defaults zurück:
    /// `SFU_BASE_URL`, `SFU_APP`, `SFU_REQUEST_TIMEOUT_MS`, `SFU_ICE_SERVERS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SFU_BASE_URL") {
            config.base_url = parse_base_url(&url)?;
        }

        if let Some(app) = lookup("SFU_APP").filter(|a| !a.trim().is_empty()) {
            config.app = app.trim().to_string();
        }

        if let Some(timeout) = lookup("SFU_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms =
                timeout
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber {
                        key: "SFU_REQUEST_TIMEOUT_MS",
                        value: timeout.clone(),
                    })?;
        }

        if let Some(servers) = lookup("SFU_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    /// Request-Timeout als Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Wert für den `codec=` Query-Parameter, z.B. `H264/PCMA`
    pub fn codec_param(&self) -> String {
        format!(
            "{}/{}",
            self.codecs.video.encoding, self.codecs.audio.encoding
        )
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            app: DEFAULT_APP.to_string(),
            codecs: CodecProfile::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            ice_servers: Vec::new(),
        }
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.base_url.as_str(), "http://192.168.2.91:8080/");
        assert_eq!(config.app, "live");
        assert_eq!(config.codec_param(), "H264/PCMA");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = CallConfig::from_lookup(lookup_from(&[
            ("SFU_BASE_URL", "http://10.0.0.5:8000"),
            ("SFU_APP", "rooms"),
            ("SFU_REQUEST_TIMEOUT_MS", "2500"),
            ("SFU_ICE_SERVERS", "stun:a.example:3478, ,turn:b.example:3478"),
        ]))
        .unwrap();

        assert_eq!(config.base_url.host_str(), Some("10.0.0.5"));
        assert_eq!(config.app, "rooms");
        assert_eq!(config.request_timeout_ms, 2500);
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478", "turn:b.example:3478"]
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_url = CallConfig::from_lookup(lookup_from(&[("SFU_BASE_URL", "ws://host")]));
        assert!(matches!(bad_url, Err(ConfigError::InvalidUrl { .. })));

        let bad_timeout =
            CallConfig::from_lookup(lookup_from(&[("SFU_REQUEST_TIMEOUT_MS", "soon")]));
        assert!(matches!(
            bad_timeout,
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CallConfig =
            serde_json::from_str(r#"{ "base_url": "https://sfu.example", "app": "demo" }"#)
                .unwrap();
        assert_eq!(config.base_url.scheme(), "https");
        assert_eq!(config.app, "demo");
        assert_eq!(config.codecs, CodecProfile::default());
    }
}
