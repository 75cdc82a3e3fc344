//! Media-Leg
//!
//! Ein Leg ist eine Richtung eines Anrufs: Push (eigene Medien senden) oder
//! Pull (Medien der Gegenseite empfangen). Es führt den Offer/Answer
//! Austausch durch und verfolgt den Verbindungsstatus der Engine.
//!
//! Zustandsänderungen laufen ausschließlich über `LegInner::apply`.

use super::events::TeardownWarning;
use super::media::{ConnectionState, EngineError, MediaEngine, OfferDirection};
use crate::sdp::{SdpDocument, SdpTransformer, TransformError};
use crate::signaling::{LegRole, ResourceHandle, SignalingClient, SignalingError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum LegError {
    #[error("SDP error: {0}")]
    Transform(#[from] TransformError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(LegState),

    #[error("Leg closed")]
    Closed,

    #[error("Connection failed")]
    ConnectionFailed,

    #[error("Control not available on {0} leg")]
    ControlUnavailable(LegRole),
}

// ============================================================================
// LEG STATE
// ============================================================================

/// Status eines Legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegState {
    New,
    /// Offer/Answer läuft oder ICE/DTLS noch nicht fertig
    Negotiating,
    Connected,
    Failed,
    /// Endzustand
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegInput {
    Start,
    Engine(ConnectionState),
    StartFailed,
    Stop,
}

fn transition(state: LegState, input: LegInput) -> LegState {
    use LegState::*;

    match (state, input) {
        (Closed, _) => Closed,
        (_, LegInput::Stop) => Closed,
        (New, LegInput::Start) => Negotiating,
        (Negotiating | Connected, LegInput::StartFailed) => Failed,
        (Negotiating, LegInput::Engine(ConnectionState::Connected)) => Connected,
        // Ein Close, das nicht von stop() kommt, ist ein Abbruch
        (
            Negotiating | Connected,
            LegInput::Engine(ConnectionState::Failed | ConnectionState::Closed),
        ) => Failed,
        (current, _) => current,
    }
}

// ============================================================================
// MEDIA LEG
// ============================================================================

#[derive(Default)]
struct SdpPair {
    local: Option<SdpDocument>,
    remote: Option<SdpDocument>,
}

struct LegInner {
    role: LegRole,
    stream_id: String,
    engine: Arc<dyn MediaEngine>,
    signaling: SignalingClient,
    transformer: SdpTransformer,
    state_tx: watch::Sender<LegState>,
    resource: Mutex<Option<ResourceHandle>>,
    sdp: Mutex<SdpPair>,
    pump: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

/// Eine Richtung eines Anrufs (Push oder Pull)
#[derive(Clone)]
pub struct MediaLeg {
    inner: Arc<LegInner>,
}

impl MediaLeg {
    /// Erstellt ein neues Leg im Status `New`
    pub fn new(
        role: LegRole,
        stream_id: impl Into<String>,
        engine: Arc<dyn MediaEngine>,
        signaling: SignalingClient,
        transformer: SdpTransformer,
    ) -> Self {
        let (state_tx, _) = watch::channel(LegState::New);

        Self {
            inner: Arc::new(LegInner {
                role,
                stream_id: stream_id.into(),
                engine,
                signaling,
                transformer,
                state_tx,
                resource: Mutex::new(None),
                sdp: Mutex::new(SdpPair::default()),
                pump: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn role(&self) -> LegRole {
        self.inner.role
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    /// Gibt den aktuellen Status zurück
    pub fn state(&self) -> LegState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver für Statusänderungen
    pub fn watch_state(&self) -> watch::Receiver<LegState> {
        self.inner.state_tx.subscribe()
    }

    /// Resource-Handle, solange es noch nicht freigegeben wurde
    pub fn resource(&self) -> Option<ResourceHandle> {
        self.inner.resource.lock().clone()
    }

    /// Das umgeschriebene lokale Offer
    pub fn local_sdp(&self) -> Option<SdpDocument> {
        self.inner.sdp.lock().local.clone()
    }

    /// Die Answer des Servers
    pub fn remote_sdp(&self) -> Option<SdpDocument> {
        self.inner.sdp.lock().remote.clone()
    }

    /// Startet den Offer/Answer Austausch
    ///
    /// Kehrt zurück sobald die Answer angewendet ist, die eigentliche
    /// Verbindung meldet die Engine asynchron über `watch_state()`.
    /// Schlägt der Start fehl, bleibt das Leg `Failed` bis `stop()`.
    pub async fn start(&self) -> Result<(), LegError> {
        let inner = &self.inner;

        let (previous, _) = inner.apply(LegInput::Start);
        match previous {
            LegState::New => {}
            LegState::Closed => return Err(LegError::Closed),
            other => return Err(LegError::InvalidState(other)),
        }

        tracing::info!(
            "Starting {} leg for stream '{}'",
            inner.role,
            inner.stream_id
        );

        inner.spawn_pump();

        match inner.negotiate().await {
            Ok(()) => {
                tracing::info!("{} leg negotiated, waiting for connection", inner.role);
                Ok(())
            }
            Err(_) if inner.is_closed() => Err(LegError::Closed),
            Err(e) => {
                tracing::error!("{} leg for '{}' failed: {}", inner.role, inner.stream_id, e);
                inner.apply(LegInput::StartFailed);
                Err(e)
            }
        }
    }

    /// Baut das Leg ab
    ///
    /// Gibt die Server-Resource frei, beendet lokale Medien (Push) und
    /// schließt die Engine. Mehrfacher Aufruf ist wirkungslos.
    pub async fn stop(&self) -> Vec<TeardownWarning> {
        let inner = &self.inner;

        let (previous, _) = inner.apply(LegInput::Stop);
        if previous != LegState::Closed {
            tracing::info!("Stopping {} leg for stream '{}'", inner.role, inner.stream_id);
        }

        if let Some(pump) = inner.pump.lock().take() {
            pump.abort();
        }

        let mut warnings = Vec::new();

        let resource = inner.resource.lock().take();
        if let Some(handle) = resource {
            if let Err(warning) = inner.release_resource(&handle).await {
                warnings.push(warning);
            }
        }

        if !inner.disposed.swap(true, Ordering::SeqCst) {
            if inner.role == LegRole::Push {
                if let Err(e) = inner.engine.release_local_media().await {
                    warnings.push(TeardownWarning::LocalMedia {
                        reason: e.to_string(),
                    });
                }
            }

            if let Err(e) = inner.engine.dispose().await {
                warnings.push(TeardownWarning::EngineDispose {
                    role: inner.role,
                    reason: e.to_string(),
                });
            }
        }

        for warning in &warnings {
            tracing::warn!("Teardown: {}", warning);
        }

        warnings
    }

    /// Schaltet das Mikrofon um (nur Push)
    pub async fn toggle_mute(&self) -> Result<bool, LegError> {
        Ok(self.control_engine()?.toggle_audio().await?)
    }

    /// Schaltet die Kamera um (nur Push)
    pub async fn toggle_camera(&self) -> Result<bool, LegError> {
        Ok(self.control_engine()?.toggle_video().await?)
    }

    /// Wechselt die Kamera (nur Push)
    pub async fn switch_camera(&self) -> Result<(), LegError> {
        Ok(self.control_engine()?.switch_camera().await?)
    }

    fn control_engine(&self) -> Result<&Arc<dyn MediaEngine>, LegError> {
        if self.inner.role != LegRole::Push {
            return Err(LegError::ControlUnavailable(self.inner.role));
        }

        match self.state() {
            LegState::Negotiating | LegState::Connected => Ok(&self.inner.engine),
            LegState::Closed => Err(LegError::Closed),
            other => Err(LegError::InvalidState(other)),
        }
    }
}

impl std::fmt::Debug for MediaLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLeg")
            .field("role", &self.inner.role)
            .field("stream_id", &self.inner.stream_id)
            .field("state", &self.state())
            .field("resource", &self.resource())
            .finish()
    }
}

impl LegInner {
    /// Einziger Ort an dem sich der Status ändert
    ///
    /// Liefert (vorher, nachher).
    fn apply(&self, input: LegInput) -> (LegState, LegState) {
        let mut previous = LegState::New;
        let mut next = LegState::New;

        self.state_tx.send_if_modified(|state| {
            previous = *state;
            next = transition(previous, input);
            if next == previous {
                return false;
            }
            *state = next;
            true
        });

        if next != previous {
            tracing::debug!(
                "{} leg '{}': {:?} -> {:?} ({:?})",
                self.role,
                self.stream_id,
                previous,
                next,
                input
            );
        }

        (previous, next)
    }

    fn is_closed(&self) -> bool {
        *self.state_tx.borrow() == LegState::Closed
    }

    fn ensure_open(&self) -> Result<(), LegError> {
        if self.is_closed() {
            return Err(LegError::Closed);
        }
        Ok(())
    }

    /// Engine-Events seriell in den Status übernehmen
    fn spawn_pump(self: &Arc<Self>) {
        let mut events = self.engine.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(state) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.on_engine_state(state);
                        if inner.is_closed() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Leg event pump lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        *self.pump.lock() = Some(handle);
    }

    fn on_engine_state(&self, state: ConnectionState) {
        let (previous, next) = self.apply(LegInput::Engine(state));

        if next == LegState::Connected && previous != LegState::Connected {
            tracing::info!("{} leg '{}' connected", self.role, self.stream_id);
        } else if next == LegState::Failed && previous != LegState::Failed {
            tracing::error!(
                "{} leg '{}' lost its connection ({:?})",
                self.role,
                self.stream_id,
                state
            );
        }
    }

    async fn negotiate(&self) -> Result<(), LegError> {
        let raw_offer = self
            .engine
            .create_local_offer(OfferDirection::from(self.role))
            .await?;
        self.ensure_open()?;

        let offer = SdpDocument::parse(&raw_offer)?;
        let rewritten = self.transformer.rewrite(&offer);
        tracing::debug!("Rewritten {} offer:\n{}", self.role, rewritten);

        self.engine.apply_local_offer(&rewritten).await?;
        self.sdp.lock().local = Some(rewritten.clone());
        self.ensure_open()?;

        let answer = self
            .signaling
            .exchange(self.role, &self.stream_id, &rewritten.to_string())
            .await?;

        self.store_resource(answer.resource).await?;

        let remote = SdpDocument::parse(&answer.sdp).map_err(|e| {
            SignalingError::MalformedResponse(format!("answer is not valid SDP: {}", e))
        })?;
        self.sdp.lock().remote = Some(remote.clone());

        self.engine.apply_remote_answer(&remote).await?;
        self.ensure_open()?;

        Ok(())
    }

    /// Übernimmt den Handle, oder gibt ihn sofort frei wenn das Leg
    /// inzwischen geschlossen wurde
    async fn store_resource(&self, resource: Option<ResourceHandle>) -> Result<(), LegError> {
        let orphan = {
            let mut slot = self.resource.lock();
            if self.is_closed() {
                resource
            } else {
                *slot = resource;
                return Ok(());
            }
        };

        if let Some(handle) = orphan {
            tracing::info!(
                "{} leg closed during negotiation, releasing {}",
                self.role,
                handle
            );
            if let Err(warning) = self.release_resource(&handle).await {
                tracing::warn!("Teardown: {}", warning);
            }
        }

        Err(LegError::Closed)
    }

    async fn release_resource(&self, handle: &ResourceHandle) -> Result<(), TeardownWarning> {
        self.signaling
            .release(handle)
            .await
            .map_err(|e| TeardownWarning::ResourceRelease {
                role: self.role,
                resource: handle.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
