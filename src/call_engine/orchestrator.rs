//! Call Orchestrator
//!
//! Ein Anruf besteht aus zwei Legs: Push sendet die eigenen Medien unter
//! der eigenen Stream-ID, Pull empfängt die Medien der Gegenseite. Der
//! Orchestrator startet beide parallel, fasst ihren Status zu einem
//! Anrufstatus zusammen und leitet Steuerbefehle an das Push-Leg weiter.

use super::engine::WebRtcEngineFactory;
use super::events::{CallEvent, CallStatus, TeardownWarning};
use super::leg::{LegError, LegState, MediaLeg};
use super::media::EngineFactory;
use crate::config::CallConfig;
use crate::sdp::SdpTransformer;
use crate::signaling::{LegRole, SignalingClient, SignalingError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No active call")]
    NotInCall,

    #[error("Call setup failed: {0}")]
    LegFailed(LegError),

    #[error("Control failed: {0}")]
    Control(LegError),

    #[error("Call setup cancelled")]
    Cancelled,

    #[error("Orchestrator released")]
    Released,
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ein laufender oder im Aufbau befindlicher Anruf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub id: Uuid,
    /// Eigene Stream-ID (Push)
    pub push_stream_id: String,
    /// Stream-ID der Gegenseite (Pull)
    pub pull_stream_id: String,
    pub started_at: DateTime<Utc>,
    pub status: CallStatus,
}

/// Feuert genau einmal, auch bei gleichzeitigem Aufruf aus mehreren Threads
#[derive(Debug, Default)]
pub struct EstablishedLatch(AtomicBool);

impl EstablishedLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` nur für den ersten Aufrufer
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Baut einen Anruf ab, dessen `start_call` vor dem Ende gedroppt wurde
struct SetupGuard {
    shared: Arc<Shared>,
    call_id: Uuid,
    armed: bool,
}

impl SetupGuard {
    fn new(shared: &Arc<Shared>, call_id: Uuid) -> Self {
        Self {
            shared: Arc::clone(shared),
            call_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let call_id = self.call_id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Setup of call {} aborted, tearing down", call_id);
                handle.spawn(async move {
                    shared
                        .fail_call(call_id, "call setup cancelled".to_string())
                        .await;
                });
            }
            Err(_) => {
                tracing::error!(
                    "Setup of call {} aborted outside a runtime, resources not released",
                    call_id
                );
            }
        }
    }
}

struct ActiveCall {
    session: CallSession,
    push: MediaLeg,
    pull: MediaLeg,
    monitor: Option<JoinHandle<()>>,
}

struct CallSlot {
    active: Option<ActiveCall>,
    status: CallStatus,
    last_legs: Vec<MediaLeg>,
    released: bool,
}

struct Shared {
    signaling: SignalingClient,
    transformer: SdpTransformer,
    engines: Arc<dyn EngineFactory>,
    slot: Mutex<CallSlot>,
    event_tx: broadcast::Sender<CallEvent>,
}

// ============================================================================
// CALL ORCHESTRATOR
// ============================================================================

/// Verwaltet genau einen Anruf (Push + Pull Leg)
pub struct CallOrchestrator {
    shared: Arc<Shared>,
}

impl CallOrchestrator {
    /// Erstellt einen Orchestrator mit eigener Engine-Factory
    pub fn new(
        signaling: SignalingClient,
        transformer: SdpTransformer,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            shared: Arc::new(Shared {
                signaling,
                transformer,
                engines,
                slot: Mutex::new(CallSlot {
                    active: None,
                    status: CallStatus::Idle,
                    last_legs: Vec::new(),
                    released: false,
                }),
                event_tx,
            }),
        }
    }

    /// Erstellt einen Orchestrator mit `WebRtcEngine`s aus der Konfiguration
    pub fn from_config(config: &CallConfig) -> Result<Self, SignalingError> {
        Ok(Self::new(
            SignalingClient::new(config)?,
            SdpTransformer::new(config.codecs.clone()),
            Arc::new(WebRtcEngineFactory::new(config)),
        ))
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn status(&self) -> CallStatus {
        self.shared.slot.lock().status
    }

    pub fn is_in_call(&self) -> bool {
        self.shared.slot.lock().active.is_some()
    }

    /// (Push, Pull) Stream-IDs des aktuellen Anrufs
    pub fn current_stream_ids(&self) -> Option<(String, String)> {
        self.shared.slot.lock().active.as_ref().map(|call| {
            (
                call.session.push_stream_id.clone(),
                call.session.pull_stream_id.clone(),
            )
        })
    }

    pub fn session(&self) -> Option<CallSession> {
        self.shared
            .slot
            .lock()
            .active
            .as_ref()
            .map(|call| call.session.clone())
    }

    /// Startet einen Anruf
    ///
    /// Kehrt zurück sobald beide Legs verhandelt sind. `CallStarted` folgt
    /// über `subscribe()`, sobald beide verbunden sind.
    ///
    /// Wird das Future vorher gedroppt, wird der Anruf im Hintergrund
    /// abgebaut (`Failed`, Server-Resourcen werden freigegeben).
    pub async fn start_call(
        &self,
        push_stream_id: &str,
        pull_stream_id: &str,
    ) -> Result<(), OrchestratorError> {
        let shared = &self.shared;
        let (call_id, push, pull) = shared.begin_call(push_stream_id, pull_stream_id)?;
        let guard = SetupGuard::new(shared, call_id);

        tracing::info!(
            "Starting call {} (push '{}', pull '{}')",
            call_id,
            push_stream_id,
            pull_stream_id
        );

        let (push_result, pull_result) = tokio::join!(push.start(), pull.start());

        if !shared.owns(call_id) {
            guard.disarm();
            tracing::info!("Call {} ended during setup", call_id);
            return Err(OrchestratorError::Cancelled);
        }

        let failure = match (push_result, pull_result) {
            (Err(e), _) | (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(())) => {
                if push.state() == LegState::Failed || pull.state() == LegState::Failed {
                    Some(LegError::ConnectionFailed)
                } else {
                    None
                }
            }
        };

        if let Some(error) = failure {
            let owned = shared.fail_call(call_id, error.to_string()).await;
            guard.disarm();
            return if owned {
                Err(OrchestratorError::LegFailed(error))
            } else {
                Err(OrchestratorError::Cancelled)
            };
        }

        let monitor = tokio::spawn(monitor_legs(
            Arc::downgrade(shared),
            call_id,
            push.watch_state(),
            pull.watch_state(),
            EstablishedLatch::new(),
        ));
        guard.disarm();

        let mut slot = shared.slot.lock();
        match slot.active.as_mut() {
            Some(call) if call.session.id == call_id => {
                call.monitor = Some(monitor);
                Ok(())
            }
            _ => {
                monitor.abort();
                Err(OrchestratorError::Cancelled)
            }
        }
    }

    /// Beendet den aktuellen Anruf
    ///
    /// Ohne aktiven Anruf passiert nichts. Fehler beim Abbau kommen als
    /// Warnungen zurück.
    pub async fn end_call(&self) -> Vec<TeardownWarning> {
        let shared = &self.shared;

        let active = shared.slot.lock().active.take();
        let Some(call) = active else {
            tracing::debug!("end_call ignored: not in a call");
            return Vec::new();
        };

        tracing::info!("Ending call {}", call.session.id);
        shared.set_status(CallStatus::Ending);

        let warnings = stop_legs(call).await;

        shared.set_status(CallStatus::Ended);
        shared.emit(CallEvent::CallEnded);

        warnings
    }

    /// Schaltet das Mikrofon um, liefert `true` wenn jetzt stumm
    pub async fn toggle_mute(&self) -> Result<bool, OrchestratorError> {
        let push = self.shared.push_leg("toggle_mute")?;
        push.toggle_mute()
            .await
            .map_err(|e| self.shared.control_failed("toggle_mute", e))
    }

    /// Schaltet die Kamera um, liefert `true` wenn jetzt aus
    pub async fn toggle_camera(&self) -> Result<bool, OrchestratorError> {
        let push = self.shared.push_leg("toggle_camera")?;
        push.toggle_camera()
            .await
            .map_err(|e| self.shared.control_failed("toggle_camera", e))
    }

    /// Wechselt zwischen Front- und Rückkamera
    pub async fn switch_camera(&self) -> Result<(), OrchestratorError> {
        let push = self.shared.push_leg("switch_camera")?;
        push.switch_camera()
            .await
            .map_err(|e| self.shared.control_failed("switch_camera", e))
    }

    /// Beendet den Anruf und gibt alle Ressourcen frei
    ///
    /// Danach sind keine neuen Anrufe mehr möglich.
    pub async fn release(&self) -> Vec<TeardownWarning> {
        let mut warnings = self.end_call().await;

        let legs = {
            let mut slot = self.shared.slot.lock();
            if slot.released {
                return warnings;
            }
            slot.released = true;
            std::mem::take(&mut slot.last_legs)
        };

        for leg in legs {
            warnings.extend(leg.stop().await);
        }

        tracing::info!("Call orchestrator released");
        warnings
    }
}

impl std::fmt::Debug for CallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOrchestrator")
            .field("status", &self.status())
            .field("session", &self.session())
            .finish()
    }
}

impl Shared {
    /// Legt Session und Legs an
    fn begin_call(
        &self,
        push_stream_id: &str,
        pull_stream_id: &str,
    ) -> Result<(Uuid, MediaLeg, MediaLeg), OrchestratorError> {
        let mut slot = self.slot.lock();

        if slot.released {
            return Err(OrchestratorError::Released);
        }
        if slot.active.is_some() {
            tracing::warn!("start_call ignored: already in a call");
            return Err(OrchestratorError::AlreadyInCall);
        }

        let engines = self
            .engines
            .create(LegRole::Push)
            .and_then(|push| Ok((push, self.engines.create(LegRole::Pull)?)));
        let (push_engine, pull_engine) = match engines {
            Ok(engines) => engines,
            Err(e) => {
                tracing::error!("Failed to create media engine: {}", e);
                slot.status = CallStatus::Failed;
                self.emit(CallEvent::StatusChanged(CallStatus::Failed));
                self.emit(CallEvent::CallError(e.to_string()));
                return Err(OrchestratorError::LegFailed(e.into()));
            }
        };

        let push = MediaLeg::new(
            LegRole::Push,
            push_stream_id,
            push_engine,
            self.signaling.clone(),
            self.transformer.clone(),
        );
        let pull = MediaLeg::new(
            LegRole::Pull,
            pull_stream_id,
            pull_engine,
            self.signaling.clone(),
            self.transformer.clone(),
        );

        let session = CallSession {
            id: Uuid::new_v4(),
            push_stream_id: push_stream_id.to_string(),
            pull_stream_id: pull_stream_id.to_string(),
            started_at: Utc::now(),
            status: CallStatus::Establishing,
        };
        let call_id = session.id;

        slot.active = Some(ActiveCall {
            session,
            push: push.clone(),
            pull: pull.clone(),
            monitor: None,
        });
        slot.last_legs = vec![push.clone(), pull.clone()];
        slot.status = CallStatus::Establishing;
        self.emit(CallEvent::StatusChanged(CallStatus::Establishing));

        Ok((call_id, push, pull))
    }

    fn owns(&self, call_id: Uuid) -> bool {
        self.slot
            .lock()
            .active
            .as_ref()
            .is_some_and(|call| call.session.id == call_id)
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_status(&self, status: CallStatus) {
        let mut slot = self.slot.lock();
        slot.status = status;
        if let Some(call) = slot.active.as_mut() {
            call.session.status = status;
        }
        self.emit(CallEvent::StatusChanged(status));
    }

    /// Beide Legs verbunden: `Active` + `CallStarted`
    fn mark_active(&self, call_id: Uuid) {
        {
            let mut slot = self.slot.lock();
            match slot.active.as_mut() {
                Some(call) if call.session.id == call_id => {
                    call.session.status = CallStatus::Active;
                }
                _ => return,
            }
            slot.status = CallStatus::Active;
        }

        tracing::info!("Call {} established", call_id);
        self.emit(CallEvent::StatusChanged(CallStatus::Active));
        self.emit(CallEvent::CallStarted);
    }

    /// Baut den Anruf nach einem Fehler ab
    ///
    /// Nur der Aufrufer, der die Session übernimmt, meldet `CallError`.
    async fn fail_call(&self, call_id: Uuid, reason: String) -> bool {
        let active = {
            let mut slot = self.slot.lock();
            let owned = slot
                .active
                .as_ref()
                .is_some_and(|call| call.session.id == call_id);
            if owned {
                slot.active.take()
            } else {
                None
            }
        };
        let Some(call) = active else {
            return false;
        };

        tracing::error!("Call {} failed: {}", call_id, reason);
        stop_legs(call).await;

        self.set_status(CallStatus::Failed);
        self.emit(CallEvent::CallError(reason));
        true
    }

    fn push_leg(&self, operation: &str) -> Result<MediaLeg, OrchestratorError> {
        let push = self
            .slot
            .lock()
            .active
            .as_ref()
            .map(|call| call.push.clone());

        push.ok_or_else(|| {
            tracing::warn!("{} ignored: not in a call", operation);
            self.emit(CallEvent::Warning(format!("{}: not in a call", operation)));
            OrchestratorError::NotInCall
        })
    }

    fn control_failed(&self, operation: &str, error: LegError) -> OrchestratorError {
        tracing::warn!("{} failed: {}", operation, error);
        self.emit(CallEvent::Warning(format!("{} failed: {}", operation, error)));
        OrchestratorError::Control(error)
    }
}

async fn stop_legs(call: ActiveCall) -> Vec<TeardownWarning> {
    if let Some(monitor) = call.monitor {
        monitor.abort();
    }

    let (mut warnings, pull_warnings) =
        futures::future::join(call.push.stop(), call.pull.stop()).await;
    warnings.extend(pull_warnings);
    warnings
}

/// Beobachtet beide Legs bis der Anruf endet
async fn monitor_legs(
    weak: Weak<Shared>,
    call_id: Uuid,
    mut push_rx: watch::Receiver<LegState>,
    mut pull_rx: watch::Receiver<LegState>,
    latch: EstablishedLatch,
) {
    let mut local_ready = false;
    let mut remote_ready = false;

    loop {
        let push_state = *push_rx.borrow_and_update();
        let pull_state = *pull_rx.borrow_and_update();

        let Some(shared) = weak.upgrade() else {
            return;
        };

        if let Some((role, state)) = [(LegRole::Push, push_state), (LegRole::Pull, pull_state)]
            .into_iter()
            .find(|(_, state)| matches!(state, LegState::Failed | LegState::Closed))
        {
            // fail_call bricht diesen Task ab, daher eigener Task
            let reason = format!("{} leg {:?}", role, state);
            tokio::spawn(async move {
                shared.fail_call(call_id, reason).await;
            });
            return;
        }

        if push_state == LegState::Connected && !local_ready {
            local_ready = true;
            shared.emit(CallEvent::LocalMediaReady);
        }
        if pull_state == LegState::Connected && !remote_ready {
            remote_ready = true;
            shared.emit(CallEvent::RemoteMediaReady);
        }
        if local_ready && remote_ready && latch.fire() {
            shared.mark_active(call_id);
        }

        drop(shared);

        tokio::select! {
            changed = push_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = pull_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
