//! Media-Engine Schnittstelle
//!
//! Die Call-Logik spricht nur über diesen Trait mit der eigentlichen
//! WebRTC-Implementierung. Pro Leg wird über die `EngineFactory` eine
//! eigene Engine erzeugt.

use crate::sdp::SdpDocument;
use crate::signaling::LegRole;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Engine already disposed")]
    Disposed,

    #[error("Not supported: {0}")]
    Unsupported(String),
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Verbindungsstatus der Engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Richtung des lokalen Offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDirection {
    /// Nur senden (Push)
    SendOnly,
    /// Nur empfangen (Pull)
    RecvOnly,
}

impl From<LegRole> for OfferDirection {
    fn from(role: LegRole) -> Self {
        match role {
            LegRole::Push => OfferDirection::SendOnly,
            LegRole::Pull => OfferDirection::RecvOnly,
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Peer Connection mit optionaler lokaler Kamera/Mikrofon
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Erzeugt ein vollständiges lokales Offer (ICE-Gathering abgeschlossen)
    async fn create_local_offer(&self, direction: OfferDirection)
        -> Result<String, EngineError>;

    /// Übernimmt das umgeschriebene Offer als lokale Beschreibung
    async fn apply_local_offer(&self, offer: &SdpDocument) -> Result<(), EngineError>;

    /// Übernimmt die Answer des Servers als Remote-Beschreibung
    async fn apply_remote_answer(&self, answer: &SdpDocument) -> Result<(), EngineError>;

    /// Gibt einen Receiver für Verbindungsänderungen zurück
    fn subscribe(&self) -> broadcast::Receiver<ConnectionState>;

    /// Gibt Kamera und Mikrofon frei (nur Push)
    async fn release_local_media(&self) -> Result<(), EngineError>;

    /// Schließt die Peer Connection endgültig
    async fn dispose(&self) -> Result<(), EngineError>;

    /// Schaltet das Mikrofon um, liefert `true` wenn jetzt stumm
    ///
    /// Stumm heißt: es werden keine Audio-Pakete mehr gesendet.
    async fn toggle_audio(&self) -> Result<bool, EngineError>;

    /// Schaltet die Kamera um, liefert `true` wenn jetzt aus
    async fn toggle_video(&self) -> Result<bool, EngineError>;

    /// Wechselt zwischen Front- und Rückkamera
    async fn switch_camera(&self) -> Result<(), EngineError>;
}

/// Erzeugt eine Engine pro Leg
pub trait EngineFactory: Send + Sync {
    fn create(&self, role: LegRole) -> Result<Arc<dyn MediaEngine>, EngineError>;
}

// ============================================================================
// TESTS
// ============================================================================
