//! SFU Call - Bidirektionale Anrufe über einen Media-Server
//!
//! Ein Anruf besteht aus zwei unabhängigen WebRTC-Verbindungen zum Server:
//! - Push (WHIP): eigene Kamera/Mikrofon unter der eigenen Stream-ID
//! - Pull (WHEP): Audio/Video der Gegenseite unter deren Stream-ID
//!
//! Lokale Offers werden vor dem Senden auf H264/PCMA umgeschrieben.

pub mod call_engine;
pub mod config;
pub mod sdp;
pub mod signaling;

pub use call_engine::{CallEvent, CallOrchestrator, CallSession, CallStatus, OrchestratorError};
pub use config::{CallConfig, ConfigError};

use tracing_subscriber::EnvFilter;

/// Initialisiert das Logging
///
/// `RUST_LOG` wird um die Standard-Direktiven ergänzt. Ein zweiter Aufruf
/// lässt den bestehenden Subscriber unverändert.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("sfu_call=debug".parse().expect("valid directive"))
        .add_directive("webrtc=warn".parse().expect("valid directive"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing already initialized");
    }
}
