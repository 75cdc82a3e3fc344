//! Skriptbare Media-Engine für Tests
//!
//! Erzeugt ein festes Offer, zählt Aufrufe und meldet nach der Answer
//! `Connecting` → `Connected`, ohne echte Netzwerkverbindung.

use super::leg::{LegState, MediaLeg};
use super::media::{ConnectionState, EngineError, EngineFactory, MediaEngine, OfferDirection};
use crate::sdp::SdpDocument;
use crate::signaling::LegRole;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Offer wie es ein Browser-Stack erzeugen würde (H264 auf PT 102, UDP + TCP)
pub(crate) const OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102 98\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
a=rtpmap:98 VP8/90000\r\n\
a=candidate:1 1 udp 2130706431 192.168.2.50 54400 typ host\r\n\
a=candidate:2 1 tcp 1518280447 192.168.2.50 9 typ host tcptype active\r\n\
a=sendrecv\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 8\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=sendrecv\r\n";

/// Minimale Answer des Servers
pub(crate) const ANSWER_SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 192.168.2.91\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=mid:0\r\n\
a=rtpmap:96 H264/90000\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 8\r\n\
a=mid:1\r\n\
a=rtpmap:8 PCMA/8000/1\r\n";

/// Verhalten einer `ScriptedEngine`
#[derive(Debug, Clone)]
pub(crate) struct EngineScript {
    /// Nach der Answer `Connecting` und `Connected` melden
    pub auto_connect: bool,
    pub fail_offer: bool,
    pub fail_answer: bool,
    pub fail_dispose: bool,
    /// Mute/Kamera-Steuerung schlägt fehl
    pub fail_controls: bool,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            auto_connect: true,
            fail_offer: false,
            fail_answer: false,
            fail_dispose: false,
            fail_controls: false,
        }
    }
}

pub(crate) struct ScriptedEngine {
    script: EngineScript,
    event_tx: broadcast::Sender<ConnectionState>,
    directions: Mutex<Vec<OfferDirection>>,
    applied_local: Mutex<Option<String>>,
    applied_remote: Mutex<Option<String>>,
    audio_muted: AtomicBool,
    video_disabled: AtomicBool,
    camera_switches: AtomicUsize,
    local_media_releases: AtomicUsize,
    disposals: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: EngineScript) -> Self {
        let (event_tx, _) = broadcast::channel(32);

        Self {
            script,
            event_tx,
            directions: Mutex::new(Vec::new()),
            applied_local: Mutex::new(None),
            applied_remote: Mutex::new(None),
            audio_muted: AtomicBool::new(false),
            video_disabled: AtomicBool::new(false),
            camera_switches: AtomicUsize::new(0),
            local_media_releases: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
        }
    }

    /// Meldet einen Verbindungsstatus an alle Subscriber
    pub fn emit(&self, state: ConnectionState) {
        let _ = self.event_tx.send(state);
    }

    pub fn offer_directions(&self) -> Vec<OfferDirection> {
        self.directions.lock().clone()
    }

    pub fn applied_local(&self) -> Option<String> {
        self.applied_local.lock().clone()
    }

    pub fn applied_remote(&self) -> Option<String> {
        self.applied_remote.lock().clone()
    }

    pub fn camera_switches(&self) -> usize {
        self.camera_switches.load(Ordering::SeqCst)
    }

    pub fn local_media_releases(&self) -> usize {
        self.local_media_releases.load(Ordering::SeqCst)
    }

    pub fn dispose_count(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    fn check_controls(&self) -> Result<(), EngineError> {
        if self.script.fail_controls {
            return Err(EngineError::Unsupported("no capture device".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for ScriptedEngine {
    async fn create_local_offer(&self, direction: OfferDirection) -> Result<String, EngineError> {
        self.directions.lock().push(direction);
        if self.script.fail_offer {
            return Err(EngineError::WebRTC("offer failed".to_string()));
        }
        Ok(OFFER_SDP.to_string())
    }

    async fn apply_local_offer(&self, offer: &SdpDocument) -> Result<(), EngineError> {
        *self.applied_local.lock() = Some(offer.to_string());
        Ok(())
    }

    async fn apply_remote_answer(&self, answer: &SdpDocument) -> Result<(), EngineError> {
        if self.script.fail_answer {
            return Err(EngineError::InvalidSdp("answer rejected".to_string()));
        }

        *self.applied_remote.lock() = Some(answer.to_string());

        if self.script.auto_connect {
            self.emit(ConnectionState::Connecting);
            self.emit(ConnectionState::Connected);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.event_tx.subscribe()
    }

    async fn release_local_media(&self) -> Result<(), EngineError> {
        self.local_media_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionState::Closed);

        if self.script.fail_dispose {
            return Err(EngineError::WebRTC("close failed".to_string()));
        }
        Ok(())
    }

    async fn toggle_audio(&self) -> Result<bool, EngineError> {
        self.check_controls()?;
        Ok(!self.audio_muted.fetch_xor(true, Ordering::SeqCst))
    }

    async fn toggle_video(&self) -> Result<bool, EngineError> {
        self.check_controls()?;
        Ok(!self.video_disabled.fetch_xor(true, Ordering::SeqCst))
    }

    async fn switch_camera(&self) -> Result<(), EngineError> {
        self.check_controls()?;
        self.camera_switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory mit eigenem Skript pro Rolle, merkt sich die erzeugten Engines
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    push: EngineScript,
    pull: EngineScript,
    created: Mutex<Vec<(LegRole, Arc<ScriptedEngine>)>>,
}

impl ScriptedFactory {
    pub fn new(push: EngineScript, pull: EngineScript) -> Self {
        Self {
            push,
            pull,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Zuletzt erzeugte Engine einer Rolle
    pub fn engine(&self, role: LegRole) -> Option<Arc<ScriptedEngine>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| *r == role)
            .map(|(_, engine)| Arc::clone(engine))
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, role: LegRole) -> Result<Arc<dyn MediaEngine>, EngineError> {
        let script = match role {
            LegRole::Push => self.push.clone(),
            LegRole::Pull => self.pull.clone(),
        };

        let engine = Arc::new(ScriptedEngine::new(script));
        self.created.lock().push((role, Arc::clone(&engine)));
        Ok(engine)
    }
}

/// Wartet (max. 5s) bis das Leg den Status erreicht
pub(crate) async fn wait_for_state(leg: &MediaLeg, expected: LegState) {
    let mut rx = leg.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}, at {:?}", expected, leg.state()))
        .unwrap_or_else(|_| panic!("state channel closed while waiting for {:?}", expected));
}
