//! HTTP Client für WHIP/WHEP Signaling
//!
//! Verwaltet die Kommunikation mit der WebRTC-API des Media-Servers:
//! - SDP Offer per POST senden, Answer + Resource-Locator parsen
//! - Resourcen beim Teardown per DELETE freigeben
//! - Resource-Status abfragen

use super::messages::*;
use crate::config::{CallConfig, API_PATH};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

const SDP_CONTENT_TYPE: &str = "application/sdp";

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed signaling response: {0}")]
    MalformedResponse(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Zustandsloser WHIP/WHEP Client
///
/// Clone ist billig: der interne `reqwest::Client` teilt seinen
/// Connection-Pool, beide Legs nutzen dieselbe Instanz.
#[derive(Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    base_url: Url,
    app: String,
    codec: String,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient
    pub fn new(config: &CallConfig) -> Result<Self, SignalingError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            app: config.app.clone(),
            codec: config.codec_param(),
        })
    }

    /// Baut die Endpoint-URL für einen Stream
    ///
    /// `{base}/index/api/webrtc?app=live&stream={id}&type=push|play&codec=H264/PCMA`
    pub fn endpoint(&self, role: LegRole, stream_id: &str) -> Result<Url, SignalingError> {
        if stream_id.trim().is_empty() {
            return Err(SignalingError::InvalidEndpoint(
                "stream id must not be empty".to_string(),
            ));
        }

        let mut url = self.base_url.clone();
        let path = format!("{}{}", url.path().trim_end_matches('/'), API_PATH);
        url.set_path(&path);
        // `/` im Codec bleibt unkodiert (`codec=H264/PCMA`)
        let codec = self
            .codec
            .split('/')
            .map(encode_query_value)
            .collect::<Vec<_>>()
            .join("/");
        url.set_query(Some(&format!(
            "app={}&stream={}&type={}&codec={}",
            encode_query_value(&self.app),
            encode_query_value(stream_id),
            role.stream_type(),
            codec
        )));

        Ok(url)
    }

    /// Sendet das lokale Offer und liefert Answer + Resource-Handle
    pub async fn exchange(
        &self,
        role: LegRole,
        stream_id: &str,
        local_sdp: &str,
    ) -> Result<SignalingAnswer, SignalingError> {
        let url = self.endpoint(role, stream_id)?;

        tracing::debug!("{} POST to {}", role.protocol(), url);

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(local_sdp.to_owned())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                "{} POST for stream '{}' failed ({}): {}",
                role.protocol(),
                stream_id,
                status,
                body
            );
            return Err(SignalingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WhipWhepResponse = serde_json::from_str(&body).map_err(|e| {
            SignalingError::MalformedResponse(format!("invalid JSON body: {}", e))
        })?;

        if let Some(code) = parsed.code.filter(|code| *code != 0) {
            return Err(SignalingError::ServerError {
                code,
                message: parsed.msg.clone().unwrap_or_default(),
            });
        }

        let resource = parsed
            .resource_locator()
            .map(|locator| self.resolve_locator(locator))
            .transpose()?;

        let sdp = parsed
            .sdp
            .filter(|sdp| !sdp.trim().is_empty())
            .ok_or_else(|| {
                SignalingError::MalformedResponse("response contains no SDP answer".to_string())
            })?;

        tracing::info!(
            "{} exchange for stream '{}' succeeded, resource: {}",
            role.protocol(),
            stream_id,
            resource
                .as_ref()
                .map(ResourceHandle::as_str)
                .unwrap_or("none")
        );

        Ok(SignalingAnswer { sdp, resource })
    }

    /// Gibt eine Server-Resource per DELETE frei
    ///
    /// Fehler werden geloggt und zurückgegeben, der Aufrufer behandelt sie
    /// als Teardown-Warnung.
    pub async fn release(&self, handle: &ResourceHandle) -> Result<(), SignalingError> {
        tracing::debug!("DELETE {}", handle);

        let response = match self.http.delete(handle.as_str()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to delete resource {}: {}", handle, e);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::info!("Resource released: {}", handle);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            "DELETE {} failed (status {}), resource may still exist server-side",
            handle,
            status
        );
        Err(SignalingError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Fragt den Status einer Server-Resource ab
    pub async fn resource_status(
        &self,
        handle: &ResourceHandle,
    ) -> Result<ResourceStatus, SignalingError> {
        let response = self.http.get(handle.as_str()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SignalingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            SignalingError::MalformedResponse(format!("invalid resource status: {}", e))
        })
    }

    /// Relative Locators (z.B. `/index/api/delete_webrtc?...`) gegen die
    /// Basis-URL auflösen
    fn resolve_locator(&self, locator: &str) -> Result<ResourceHandle, SignalingError> {
        let url = match Url::parse(locator) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.base_url.join(locator).map_err(|e| {
                    SignalingError::MalformedResponse(format!(
                        "invalid resource locator '{}': {}",
                        locator, e
                    ))
                })?
            }
            Err(e) => {
                return Err(SignalingError::MalformedResponse(format!(
                    "invalid resource locator '{}': {}",
                    locator, e
                )))
            }
        };

        Ok(ResourceHandle::new(url.to_string()))
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("base_url", &self.base_url.as_str())
            .field("app", &self.app)
            .field("codec", &self.codec)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
