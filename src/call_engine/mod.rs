//! Call Engine Module - Legs, Media-Engine und Orchestrierung
//!
//! Dieses Modul verwaltet:
//! - Die Schnittstelle zur WebRTC Media-Engine
//! - Push/Pull Legs (Offer/Answer + Verbindungsstatus)
//! - Den Anruf als Paar aus zwei Legs
//! - Call-Events für die UI

mod engine;
mod events;
mod leg;
mod media;
mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{ice_servers_from, WebRtcEngine, WebRtcEngineFactory};
pub use events::{CallEvent, CallStatus, TeardownWarning};
pub use leg::{LegError, LegState, MediaLeg};
pub use media::{ConnectionState, EngineError, EngineFactory, MediaEngine, OfferDirection};
pub use orchestrator::{CallOrchestrator, CallSession, EstablishedLatch, OrchestratorError};
