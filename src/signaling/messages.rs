//! Message Types für WHIP/WHEP Signaling
//!
//! Diese Strukturen spiegeln die JSON-Antworten der ZLMediaKit WebRTC-API
//! wider und ermöglichen typsichere Kommunikation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// LEG ROLE
// ============================================================================

/// Richtung eines Legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegRole {
    /// Eigenes Audio/Video zum Server senden (WHIP)
    Push,
    /// Audio/Video der Gegenseite vom Server empfangen (WHEP)
    Pull,
}

impl LegRole {
    /// Wert für den `type=` Query-Parameter
    pub fn stream_type(&self) -> &'static str {
        match self {
            LegRole::Push => "push",
            LegRole::Pull => "play",
        }
    }

    /// Protokollname für Logs
    pub fn protocol(&self) -> &'static str {
        match self {
            LegRole::Push => "WHIP",
            LegRole::Pull => "WHEP",
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegRole::Push => write!(f, "push"),
            LegRole::Pull => write!(f, "pull"),
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Antwort auf den WHIP/WHEP POST
///
/// ZLMediaKit liefert zusätzlich `code`/`msg`/`id`, andere Server nur
/// `sdp` und einen Resource-Locator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhipWhepResponse {
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl WhipWhepResponse {
    /// Resource-Locator, `location` hat Vorrang vor `link`
    pub fn resource_locator(&self) -> Option<&str> {
        [self.location.as_deref(), self.link.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Status einer Server-Resource (GET auf den Resource-Locator)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// ============================================================================
// RESOURCE HANDLE
// ============================================================================

/// Vom Server ausgegebene URL einer angelegten Resource
///
/// Wird beim Teardown genau einmal per DELETE freigegeben. Ein fehlender
/// Handle (`Option::None`) heißt: die Resource wurde nie angelegt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ergebnis eines erfolgreichen Offer/Answer Austauschs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingAnswer {
    /// SDP Answer des Servers
    pub sdp: String,
    /// Optionaler Resource-Locator für den späteren DELETE
    pub resource: Option<ResourceHandle>,
}

// ============================================================================
// TESTS
// ============================================================================
