//! Call-Events und Teardown-Warnungen

use crate::signaling::LegRole;
use serde::Serialize;
use std::fmt;

/// Aggregierter Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Kein Anruf
    Idle,
    /// Beide Legs werden aufgebaut
    Establishing,
    /// Beide Legs verbunden
    Active,
    /// Wird beendet
    Ending,
    Ended,
    Failed,
}

/// Events die vom CallOrchestrator ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StatusChanged(CallStatus),
    /// Beide Legs verbunden (genau einmal pro Anruf)
    CallStarted,
    CallEnded,
    CallError(String),
    /// Eigene Kamera/Mikrofon werden gesendet
    LocalMediaReady,
    /// Audio/Video der Gegenseite kommt an
    RemoteMediaReady,
    Warning(String),
}

/// Nicht-fatales Problem beim Abbau
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownWarning {
    /// DELETE auf die Server-Resource fehlgeschlagen
    ResourceRelease {
        role: LegRole,
        resource: String,
        reason: String,
    },
    EngineDispose { role: LegRole, reason: String },
    LocalMedia { reason: String },
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownWarning::ResourceRelease {
                role,
                resource,
                reason,
            } => write!(
                f,
                "failed to release {} resource {}: {}",
                role, resource, reason
            ),
            TeardownWarning::EngineDispose { role, reason } => {
                write!(f, "failed to dispose {} engine: {}", role, reason)
            }
            TeardownWarning::LocalMedia { reason } => {
                write!(f, "failed to release local media: {}", reason)
            }
        }
    }
}
