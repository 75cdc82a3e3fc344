//! WebRTC Media-Engine
//!
//! Implementiert `MediaEngine` auf Basis von `webrtc`. Es werden nur die
//! gepinnten Codecs registriert (H264 + PCMA), damit der Server keine
//! Alternative aushandeln kann.
//!
//! Hinweis: Kamera/Mikrofon-Capture ist nicht Teil dieser Engine. Für Push
//! werden Sample-Tracks angelegt, die von außen befüllt werden.

use super::media::{ConnectionState, EngineError, EngineFactory, MediaEngine, OfferDirection};
use crate::config::CallConfig;
use crate::sdp::{CodecBinding, CodecProfile, SdpDocument};
use crate::signaling::LegRole;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const STREAM_ID: &str = "sfu-call";

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server aus der Konfiguration
///
/// Ohne Einträge wird nur mit Host-Kandidaten gearbeitet, der Media-Server
/// liegt typischerweise im selben Netz.
pub fn ice_servers_from(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }

    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
            Some(ConnectionState::Failed)
        }
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn codec_parameters(kind: &str, binding: &CodecBinding) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: format!("{}/{}", kind, binding.encoding),
            clock_rate: binding.clock_rate,
            channels: binding.channels.unwrap_or(0),
            sdp_fmtp_line: binding.format_params.clone(),
            rtcp_feedback: vec![],
        },
        payload_type: binding.payload_type,
        ..Default::default()
    }
}

// ============================================================================
// WEBRTC ENGINE
// ============================================================================

/// Lokaler Track mit dem Sender, über den er verschickt wird
#[derive(Clone)]
struct LocalSender {
    kind: RTPCodecType,
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

impl LocalSender {
    /// Hängt den Track an den Sender oder löst ihn (dann gehen keine RTP-Pakete mehr raus)
    async fn set_sending(&self, enabled: bool) -> Result<(), EngineError> {
        let track = if enabled {
            Some(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
        } else {
            None
        };

        self.sender
            .replace_track(track)
            .await
            .map_err(|e| EngineError::WebRTC(e.to_string()))
    }
}

/// Eine Peer Connection pro Leg
pub struct WebRtcEngine {
    role: LegRole,
    codecs: CodecProfile,
    ice_servers: Vec<RTCIceServer>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    local_senders: Mutex<Vec<LocalSender>>,
    /// Serialisiert Mute/Kamera-Umschaltungen
    controls: tokio::sync::Mutex<()>,
    audio_muted: AtomicBool,
    video_disabled: AtomicBool,
    disposed: AtomicBool,
    event_tx: broadcast::Sender<ConnectionState>,
}

impl WebRtcEngine {
    /// Erstellt eine neue Engine (Peer Connection wird erst beim Offer angelegt)
    pub fn new(role: LegRole, codecs: CodecProfile, ice_servers: Vec<RTCIceServer>) -> Self {
        let (event_tx, _) = broadcast::channel(32);

        Self {
            role,
            codecs,
            ice_servers,
            peer_connection: Mutex::new(None),
            local_senders: Mutex::new(Vec::new()),
            controls: tokio::sync::Mutex::new(()),
            audio_muted: AtomicBool::new(false),
            video_disabled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Lokale Sample-Tracks (nur Push), zum Befüllen mit Kamera/Mikrofon-Daten
    ///
    /// Samples auf stummgeschaltete Tracks werden verworfen, der Track hängt
    /// dann an keinem Sender.
    pub fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.local_senders
            .lock()
            .iter()
            .map(|local| Arc::clone(&local.track))
            .collect()
    }

    pub fn is_audio_muted(&self) -> bool {
        self.audio_muted.load(Ordering::SeqCst)
    }

    pub fn is_video_disabled(&self) -> bool {
        self.video_disabled.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Disposed);
        }
        Ok(())
    }

    fn senders_of(&self, kind: RTPCodecType) -> Vec<LocalSender> {
        self.local_senders
            .lock()
            .iter()
            .filter(|local| local.kind == kind)
            .cloned()
            .collect()
    }

    /// Schaltet das Senden einer Medienart um, `off` ist der neue Zustand
    async fn toggle_sending(
        &self,
        kind: RTPCodecType,
        flag: &AtomicBool,
    ) -> Result<bool, EngineError> {
        self.ensure_active()?;
        let _guard = self.controls.lock().await;

        let off = !flag.load(Ordering::SeqCst);
        for local in self.senders_of(kind) {
            local.set_sending(!off).await?;
        }
        flag.store(off, Ordering::SeqCst);

        Ok(off)
    }

    fn current_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        self.ensure_active()?;
        self.peer_connection
            .lock()
            .clone()
            .ok_or_else(|| EngineError::WebRTC("no peer connection".to_string()))
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Erstellt eine neue Peer Connection mit den gepinnten Codecs
    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_codec(
                codec_parameters("video", &self.codecs.video),
                RTPCodecType::Video,
            )
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;
        media_engine
            .register_codec(
                codec_parameters("audio", &self.codecs.audio),
                RTPCodecType::Audio,
            )
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| EngineError::WebRTC(e.to_string()))?,
        );

        self.setup_peer_connection_handlers(&pc);

        Ok(pc)
    }

    /// Leitet Verbindungsänderungen an die Subscriber weiter
    fn setup_peer_connection_handlers(&self, pc: &Arc<RTCPeerConnection>) {
        let event_tx = self.event_tx.clone();
        let role = self.role;

        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state ({}): {:?}", role, s);

            if let Some(state) = map_state(s) {
                let _ = event_tx.send(state);
            }

            Box::pin(async {})
        }));

        pc.on_track(Box::new(move |track, _, _| {
            Box::pin(async move {
                tracing::info!(
                    "Remote track ({}): kind={} codec={}",
                    role,
                    track.kind(),
                    track.codec().capability.mime_type
                );
            })
        }));
    }

    /// Legt die Transceiver für die gewünschte Richtung an
    async fn add_transceivers(
        &self,
        pc: &Arc<RTCPeerConnection>,
        direction: OfferDirection,
    ) -> Result<(), EngineError> {
        match direction {
            OfferDirection::SendOnly => {
                let video = Arc::new(TrackLocalStaticSample::new(
                    codec_parameters("video", &self.codecs.video).capability,
                    "video".to_string(),
                    STREAM_ID.to_string(),
                ));
                let audio = Arc::new(TrackLocalStaticSample::new(
                    codec_parameters("audio", &self.codecs.audio).capability,
                    "audio".to_string(),
                    STREAM_ID.to_string(),
                ));

                let mut senders = Vec::with_capacity(2);
                for (kind, track) in [(RTPCodecType::Video, video), (RTPCodecType::Audio, audio)] {
                    let transceiver = pc
                        .add_transceiver_from_track(
                            Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                            Some(RTCRtpTransceiverInit {
                                direction: RTCRtpTransceiverDirection::Sendonly,
                                send_encodings: vec![],
                            }),
                        )
                        .await
                        .map_err(|e| EngineError::WebRTC(e.to_string()))?;

                    let local = LocalSender {
                        kind,
                        track,
                        sender: transceiver.sender().await,
                    };

                    // Vor dem Offer umgeschaltet
                    let off = match kind {
                        RTPCodecType::Audio => self.is_audio_muted(),
                        _ => self.is_video_disabled(),
                    };
                    if off {
                        local.set_sending(false).await?;
                    }

                    senders.push(local);
                }

                *self.local_senders.lock() = senders;
            }
            OfferDirection::RecvOnly => {
                for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
                    pc.add_transceiver_from_kind(
                        kind,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await
                    .map_err(|e| EngineError::WebRTC(e.to_string()))?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_local_offer(&self, direction: OfferDirection) -> Result<String, EngineError> {
        self.ensure_active()?;

        let pc = self.create_peer_connection().await?;
        *self.peer_connection.lock() = Some(Arc::clone(&pc));

        self.add_transceivers(&pc, direction).await?;

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        // Kein Trickle-ICE: warten bis alle Kandidaten im SDP stehen
        let mut gather_complete = pc.gathering_complete_promise().await;

        pc.set_local_description(offer)
            .await
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        let _ = gather_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| EngineError::WebRTC("local description missing".to_string()))?;

        tracing::debug!("Local {} offer gathered ({} bytes)", self.role, local.sdp.len());
        Ok(local.sdp)
    }

    async fn apply_local_offer(&self, offer: &SdpDocument) -> Result<(), EngineError> {
        let pc = self.current_connection()?;

        let description = RTCSessionDescription::offer(offer.to_string())
            .map_err(|e| EngineError::InvalidSdp(e.to_string()))?;

        // Der Server verhandelt gegen das umgeschriebene Offer. Lehnt der
        // Stack die Änderungen ab, bleibt das ursprüngliche Offer aktiv.
        if let Err(e) = pc.set_local_description(description).await {
            tracing::warn!(
                "Rewritten {} offer not accepted locally, keeping original: {}",
                self.role,
                e
            );
        }

        Ok(())
    }

    async fn apply_remote_answer(&self, answer: &SdpDocument) -> Result<(), EngineError> {
        let pc = self.current_connection()?;

        let description = RTCSessionDescription::answer(answer.to_string())
            .map_err(|e| EngineError::InvalidSdp(e.to_string()))?;

        pc.set_remote_description(description)
            .await
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.event_tx.subscribe()
    }

    async fn release_local_media(&self) -> Result<(), EngineError> {
        let senders = std::mem::take(&mut *self.local_senders.lock());
        for local in &senders {
            // Nach dem Schließen der Peer Connection ist nichts mehr zu lösen
            if let Err(e) = local.set_sending(false).await {
                tracing::debug!("Detaching {:?} track failed: {}", local.kind, e);
            }
        }
        if !senders.is_empty() {
            tracing::debug!("Released {} local tracks", senders.len());
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pc = self.peer_connection.lock().take();
        if let Some(pc) = pc {
            pc.close()
                .await
                .map_err(|e| EngineError::WebRTC(e.to_string()))?;
        }

        let _ = self.event_tx.send(ConnectionState::Closed);
        Ok(())
    }

    async fn toggle_audio(&self) -> Result<bool, EngineError> {
        let muted = self
            .toggle_sending(RTPCodecType::Audio, &self.audio_muted)
            .await?;
        tracing::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    async fn toggle_video(&self) -> Result<bool, EngineError> {
        let disabled = self
            .toggle_sending(RTPCodecType::Video, &self.video_disabled)
            .await?;
        tracing::info!("Camera {}", if disabled { "disabled" } else { "enabled" });
        Ok(disabled)
    }

    async fn switch_camera(&self) -> Result<(), EngineError> {
        self.ensure_active()?;
        Err(EngineError::Unsupported(
            "camera selection is handled by the capture source".to_string(),
        ))
    }
}

impl std::fmt::Debug for WebRtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcEngine")
            .field("role", &self.role)
            .field("audio_muted", &self.is_audio_muted())
            .field("video_disabled", &self.is_video_disabled())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt `WebRtcEngine`s aus der Konfiguration
#[derive(Debug, Clone)]
pub struct WebRtcEngineFactory {
    codecs: CodecProfile,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngineFactory {
    pub fn new(config: &CallConfig) -> Self {
        Self {
            codecs: config.codecs.clone(),
            ice_servers: ice_servers_from(&config.ice_servers),
        }
    }
}

impl EngineFactory for WebRtcEngineFactory {
    fn create(&self, role: LegRole) -> Result<Arc<dyn MediaEngine>, EngineError> {
        Ok(Arc::new(WebRtcEngine::new(
            role,
            self.codecs.clone(),
            self.ice_servers.clone(),
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(role: LegRole) -> WebRtcEngine {
        WebRtcEngine::new(role, CodecProfile::default(), Vec::new())
    }

    #[test]
    fn test_ice_servers_from_config() {
        assert!(ice_servers_from(&[]).is_empty());

        let servers = ice_servers_from(&["stun:stun.example:3478".to_string()]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.example:3478".to_string()]);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            map_state(RTCPeerConnectionState::Disconnected),
            Some(ConnectionState::Failed)
        );
        assert_eq!(map_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_codec_parameters() {
        let profile = CodecProfile::default();

        let video = codec_parameters("video", &profile.video);
        assert_eq!(video.capability.mime_type, "video/H264");
        assert_eq!(video.payload_type, 96);
        assert_eq!(video.capability.channels, 0);

        let audio = codec_parameters("audio", &profile.audio);
        assert_eq!(audio.capability.mime_type, "audio/PCMA");
        assert_eq!(audio.payload_type, 8);
        assert_eq!(audio.capability.channels, 1);
    }

    #[tokio::test]
    async fn test_toggles_flip_state() {
        let engine = engine(LegRole::Push);

        assert_eq!(engine.toggle_audio().await, Ok(true));
        assert!(engine.is_audio_muted());
        assert_eq!(engine.toggle_audio().await, Ok(false));

        assert_eq!(engine.toggle_video().await, Ok(true));
        assert!(engine.is_video_disabled());
    }

    fn sender_of(engine: &WebRtcEngine, kind: RTPCodecType) -> Arc<RTCRtpSender> {
        let senders = engine.senders_of(kind);
        assert_eq!(senders.len(), 1);
        Arc::clone(&senders[0].sender)
    }

    /// Stummschalten löst den Track vom Sender, Aufheben hängt ihn wieder an
    #[tokio::test]
    async fn test_mute_detaches_sender_track() {
        let engine = engine(LegRole::Push);
        let pc = engine.create_peer_connection().await.unwrap();
        engine
            .add_transceivers(&pc, OfferDirection::SendOnly)
            .await
            .unwrap();

        let audio = sender_of(&engine, RTPCodecType::Audio);
        let video = sender_of(&engine, RTPCodecType::Video);
        assert!(audio.track().await.is_some());
        assert!(video.track().await.is_some());

        assert_eq!(engine.toggle_audio().await, Ok(true));
        assert!(audio.track().await.is_none());
        assert!(video.track().await.is_some());

        assert_eq!(engine.toggle_audio().await, Ok(false));
        let track = audio.track().await.unwrap();
        assert_eq!(track.kind(), RTPCodecType::Audio);

        assert_eq!(engine.toggle_video().await, Ok(true));
        assert!(video.track().await.is_none());
        assert!(audio.track().await.is_some());

        assert_eq!(engine.toggle_video().await, Ok(false));
        assert_eq!(video.track().await.unwrap().id(), "video");

        pc.close().await.unwrap();
    }

    /// Vor dem Offer stummgeschaltet: der Sender startet ohne Track
    #[tokio::test]
    async fn test_mute_before_offer_applies_to_new_senders() {
        let engine = engine(LegRole::Push);
        assert_eq!(engine.toggle_audio().await, Ok(true));

        let pc = engine.create_peer_connection().await.unwrap();
        engine
            .add_transceivers(&pc, OfferDirection::SendOnly)
            .await
            .unwrap();

        assert!(sender_of(&engine, RTPCodecType::Audio).track().await.is_none());
        assert!(sender_of(&engine, RTPCodecType::Video).track().await.is_some());
        assert_eq!(engine.local_tracks().len(), 2);

        engine.release_local_media().await.unwrap();
        assert!(engine.local_tracks().is_empty());
        assert!(engine.senders_of(RTPCodecType::Audio).is_empty());

        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let engine = engine(LegRole::Pull);
        let mut events = engine.subscribe();

        engine.dispose().await.unwrap();
        engine.dispose().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ConnectionState::Closed);
        assert!(events.try_recv().is_err());
        assert_eq!(engine.toggle_audio().await, Err(EngineError::Disposed));
        assert!(matches!(
            engine.create_local_offer(OfferDirection::RecvOnly).await,
            Err(EngineError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_switch_camera_unsupported() {
        let engine = engine(LegRole::Push);
        assert!(matches!(
            engine.switch_camera().await,
            Err(EngineError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_requires_offer() {
        let engine = engine(LegRole::Pull);
        let answer = SdpDocument::parse("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n")
            .unwrap();

        assert!(engine.apply_remote_answer(&answer).await.is_err());
    }
}
