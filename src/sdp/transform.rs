//! SDP Offer Rewrite
//!
//! Erzwingt genau einen Video- und einen Audio-Codec, entfernt UDP-Kandidaten
//! und ergänzt TCP-Transport-Hinweise. Reine Textmanipulation, kein I/O.

use super::document::{MediaKind, SdpDocument};
use serde::Deserialize;

// ============================================================================
// CONSTANTS
// ============================================================================

/// ICE soll TCP-artig sammeln
const ICE_OPTIONS_LINE: &str = "a=ice-options:tcp-so";

/// Wildcard RTCP-Feedback für alle Payload-Typen
const RTCP_FB_WILDCARD_LINE: &str = "a=rtcp-fb:* transport-cc";

const RTCP_MUX_LINE: &str = "a=rtcp-mux";
const RTCP_RSIZE_LINE: &str = "a=rtcp-rsize";

// ============================================================================
// CODEC PROFILE
// ============================================================================

/// Feste Codec-Bindung für eine Media-Section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodecBinding {
    pub payload_type: u8,
    /// Encoding-Name wie in `a=rtpmap`, z.B. `H264`
    pub encoding: String,
    pub clock_rate: u32,
    /// Nur für Audio relevant
    pub channels: Option<u16>,
    /// Format-Parameter ohne `a=fmtp:<pt> ` Präfix
    pub format_params: String,
}

impl CodecBinding {
    /// `a=rtpmap:96 H264/90000`
    pub fn rtpmap_line(&self) -> String {
        match self.channels {
            Some(channels) => format!(
                "a=rtpmap:{} {}/{}/{}",
                self.payload_type, self.encoding, self.clock_rate, channels
            ),
            None => format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type, self.encoding, self.clock_rate
            ),
        }
    }

    /// `a=fmtp:96 level-asymmetry-allowed=1;...`
    pub fn fmtp_line(&self) -> String {
        format!("a=fmtp:{} {}", self.payload_type, self.format_params)
    }

    /// Prüft ob eine `a=rtpmap` Zeile diesen Codec referenziert
    pub fn matches_rtpmap(&self, line: &str) -> bool {
        rtpmap_encoding(line).is_some_and(|enc| enc.eq_ignore_ascii_case(&self.encoding))
    }
}

/// Gepinntes Codec-Paar (Video + Audio)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodecProfile {
    pub video: CodecBinding,
    pub audio: CodecBinding,
}

impl CodecProfile {
    /// H264 Baseline (42e01f) + PCMA 8kHz mono
    pub fn h264_pcma() -> Self {
        Self {
            video: CodecBinding {
                payload_type: 96,
                encoding: "H264".to_string(),
                clock_rate: 90_000,
                channels: None,
                format_params:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
            },
            audio: CodecBinding {
                payload_type: 8,
                encoding: "PCMA".to_string(),
                clock_rate: 8_000,
                channels: Some(1),
                format_params: "maxplaybackrate=8000;stereo=0;useinbandfec=1".to_string(),
            },
        }
    }
}

impl Default for CodecProfile {
    fn default() -> Self {
        Self::h264_pcma()
    }
}

// ============================================================================
// LINE HELPERS
// ============================================================================

/// Encoding-Name aus `a=rtpmap:<pt> <encoding>/<clock>[/<channels>]`
fn rtpmap_encoding(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("a=rtpmap:")?;
    let (_, codec) = rest.split_once(' ')?;
    codec.trim().split('/').next()
}

/// Transport-Token aus `a=candidate:<foundation> <component> <transport> ...`
fn candidate_transport(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("a=candidate:")?;
    rest.split_whitespace().nth(2)
}

fn is_datagram_candidate(line: &str) -> bool {
    candidate_transport(line).is_some_and(|t| t.eq_ignore_ascii_case("udp"))
}

// ============================================================================
// TRANSFORMER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Audio,
    Video,
    Other,
}

/// Schreibt lokale Offers auf das gepinnte Codec-Paar um
#[derive(Debug, Clone, Default)]
pub struct SdpTransformer {
    profile: CodecProfile,
}

impl SdpTransformer {
    pub fn new(profile: CodecProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &CodecProfile {
        &self.profile
    }

    /// Wendet den Rewrite in einem Durchlauf über alle Zeilen an
    pub fn rewrite(&self, offer: &SdpDocument) -> SdpDocument {
        let mut out: Vec<String> = Vec::new();
        let mut section = Section::None;
        let mut dropped = 0usize;

        for line in offer.lines() {
            if line.starts_with("v=") {
                section = Section::None;
                out.push(line.to_string());
                out.push(ICE_OPTIONS_LINE.to_string());
                out.push(RTCP_FB_WILDCARD_LINE.to_string());
                continue;
            }

            if line.starts_with("m=") {
                out.push(line.to_string());
                section = match MediaKind::from_media_line(line) {
                    MediaKind::Video => {
                        out.push(self.profile.video.rtpmap_line());
                        out.push(self.profile.video.fmtp_line());
                        out.push(RTCP_MUX_LINE.to_string());
                        out.push(RTCP_RSIZE_LINE.to_string());
                        Section::Video
                    }
                    MediaKind::Audio => {
                        out.push(self.profile.audio.rtpmap_line());
                        out.push(self.profile.audio.fmtp_line());
                        out.push(RTCP_MUX_LINE.to_string());
                        Section::Audio
                    }
                    MediaKind::Other(_) => Section::Other,
                };
                continue;
            }

            let drop = match section {
                Section::Video if self.profile.video.matches_rtpmap(line) => true,
                Section::Audio if self.profile.audio.matches_rtpmap(line) => true,
                Section::Audio | Section::Video | Section::Other
                    if line.starts_with("a=fmtp:") =>
                {
                    true
                }
                _ => is_datagram_candidate(line),
            };

            if drop {
                dropped += 1;
                continue;
            }
            out.push(line.to_string());
        }

        tracing::debug!(
            "Rewrote SDP offer: {} media sections, {} lines dropped",
            offer.media_sections().len(),
            dropped
        );

        SdpDocument::from_lines(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Offer wie es eine Browser-/libwebrtc-Engine typischerweise erzeugt
    const ENGINE_OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0 1\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 8 0\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=candidate:1 1 udp 2122260223 192.168.1.10 54321 typ host\r\n\
        a=candidate:2 1 tcp 1518280447 192.168.1.10 9 typ host tcptype active\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n\
        a=rtpmap:8 PCMA/8000\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=sendonly\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 98 97 102\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:1\r\n\
        a=candidate:3 1 UDP 2122260223 192.168.1.10 54322 typ host\r\n\
        a=rtpmap:98 VP8/90000\r\n\
        a=rtpmap:97 H264/90000\r\n\
        a=fmtp:97 level-asymmetry-allowed=1;packetization-mode=0;profile-level-id=42001f\r\n\
        a=rtpmap:102 h264/90000\r\n\
        a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
        a=sendonly\r\n";

    fn rewrite(text: &str) -> SdpDocument {
        let doc = SdpDocument::parse(text).unwrap();
        SdpTransformer::default().rewrite(&doc)
    }

    fn count(lines: &[String], needle: &str) -> usize {
        lines.iter().filter(|l| l.as_str() == needle).count()
    }

    #[test]
    fn test_session_hints_after_version_line() {
        let out = rewrite(ENGINE_OFFER);
        let session = out.session_lines();

        assert_eq!(session[0], "v=0");
        assert_eq!(session[1], "a=ice-options:tcp-so");
        assert_eq!(session[2], "a=rtcp-fb:* transport-cc");
        assert_eq!(session[3], "o=- 4611731400430051336 2 IN IP4 127.0.0.1");
    }

    #[test]
    fn test_sections_preserved_in_order() {
        let input = SdpDocument::parse(ENGINE_OFFER).unwrap();
        let out = SdpTransformer::default().rewrite(&input);

        let kinds_in: Vec<_> = input.media_sections().iter().map(|m| m.kind()).collect();
        let kinds_out: Vec<_> = out.media_sections().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds_in, kinds_out);
        assert_eq!(out.count_sections(&MediaKind::Audio), 1);
        assert_eq!(out.count_sections(&MediaKind::Video), 1);
        assert_eq!(out.count_sections(&MediaKind::Other("application".to_string())), 0);

        for (a, b) in input.media_sections().iter().zip(out.media_sections()) {
            assert_eq!(a.media_line(), b.media_line());
        }
    }

    #[test]
    fn test_video_section_pinned_to_h264() {
        let out = rewrite(ENGINE_OFFER);
        let video = &out.media_sections()[1];

        // Direkt nach der m= Zeile: Bindung, fmtp, rtcp Marker
        assert_eq!(video.lines()[1], "a=rtpmap:96 H264/90000");
        assert_eq!(
            video.lines()[2],
            "a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
        );
        assert_eq!(video.lines()[3], "a=rtcp-mux");
        assert_eq!(video.lines()[4], "a=rtcp-rsize");

        let h264: Vec<_> = video
            .attributes("a=rtpmap:")
            .filter(|l| l.to_ascii_uppercase().contains("H264"))
            .collect();
        assert_eq!(h264, vec!["a=rtpmap:96 H264/90000"]);
        assert_eq!(video.attributes("a=fmtp:").count(), 1);

        // Andere Codecs bleiben erhalten
        assert!(video.lines().iter().any(|l| l == "a=rtpmap:98 VP8/90000"));
    }

    #[test]
    fn test_audio_section_pinned_to_pcma() {
        let out = rewrite(ENGINE_OFFER);
        let audio = &out.media_sections()[0];

        assert_eq!(audio.lines()[1], "a=rtpmap:8 PCMA/8000/1");
        assert_eq!(
            audio.lines()[2],
            "a=fmtp:8 maxplaybackrate=8000;stereo=0;useinbandfec=1"
        );
        assert_eq!(audio.lines()[3], "a=rtcp-mux");

        let pcma: Vec<_> = audio
            .attributes("a=rtpmap:")
            .filter(|l| l.contains("PCMA"))
            .collect();
        assert_eq!(pcma, vec!["a=rtpmap:8 PCMA/8000/1"]);
        assert_eq!(audio.attributes("a=fmtp:").count(), 1);
        assert!(audio.lines().iter().any(|l| l == "a=rtpmap:111 opus/48000/2"));
    }

    #[test]
    fn test_exactly_one_binding_for_zero_one_many() {
        let transformer = SdpTransformer::default();

        for existing in 0..4 {
            let mut text = String::from("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
            for pt in 0..existing {
                text.push_str(&format!("a=rtpmap:{} H264/90000\r\n", 100 + pt));
                text.push_str(&format!("a=fmtp:{} packetization-mode=1\r\n", 100 + pt));
            }
            text.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 8\r\n");
            for _ in 0..existing {
                text.push_str("a=rtpmap:8 PCMA/8000\r\n");
            }

            let out = transformer.rewrite(&SdpDocument::parse(&text).unwrap());
            let video = out.media_sections()[0].lines();
            let audio = out.media_sections()[1].lines();

            assert_eq!(count(video, "a=rtpmap:96 H264/90000"), 1, "existing={}", existing);
            assert_eq!(
                video.iter().filter(|l| l.contains("H264")).count(),
                1,
                "existing={}",
                existing
            );
            assert_eq!(video.iter().filter(|l| l.starts_with("a=fmtp:")).count(), 1);
            assert_eq!(audio.iter().filter(|l| l.contains("PCMA")).count(), 1);
            assert_eq!(audio.iter().filter(|l| l.starts_with("a=fmtp:")).count(), 1);
        }
    }

    #[test]
    fn test_udp_candidates_removed() {
        let out = rewrite(ENGINE_OFFER);

        let candidates: Vec<_> = out.lines().filter(|l| l.starts_with("a=candidate:")).collect();
        assert_eq!(
            candidates,
            vec!["a=candidate:2 1 tcp 1518280447 192.168.1.10 9 typ host tcptype active"]
        );
    }

    #[test]
    fn test_session_level_candidates_are_filtered_too() {
        let out = rewrite(
            "v=0\r\na=candidate:1 1 udp 1 10.0.0.1 5000 typ host\r\n\
             a=candidate:2 1 tcp 1 10.0.0.1 9 typ host tcptype passive\r\n",
        );
        assert_eq!(out.lines().filter(|l| l.contains(" udp ")).count(), 0);
        assert_eq!(out.lines().filter(|l| l.contains(" tcp ")).count(), 1);
    }

    #[test]
    fn test_no_media_sections() {
        let out = rewrite("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n");

        assert!(out.media_sections().is_empty());
        assert_eq!(
            out.session_lines(),
            &[
                "v=0",
                "a=ice-options:tcp-so",
                "a=rtcp-fb:* transport-cc",
                "o=- 1 1 IN IP4 0.0.0.0",
                "s=-",
                "t=0 0"
            ]
        );
    }

    #[test]
    fn test_other_sections_untouched_except_fmtp() {
        let out = rewrite(
            "v=0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
             a=sctp-port:5000\r\na=fmtp:webrtc-datachannel max-message-size=262144\r\n",
        );
        let app = &out.media_sections()[0];

        assert_eq!(
            app.lines(),
            &[
                "m=application 9 UDP/DTLS/SCTP webrtc-datachannel",
                "a=sctp-port:5000"
            ]
        );
    }

    #[test]
    fn test_rewrite_twice_keeps_single_codec_binding() {
        let transformer = SdpTransformer::default();
        let once = transformer.rewrite(&SdpDocument::parse(ENGINE_OFFER).unwrap());
        let twice = transformer.rewrite(&once);

        for section in twice.media_sections() {
            match section.kind() {
                MediaKind::Video => {
                    assert_eq!(count(section.lines(), "a=rtpmap:96 H264/90000"), 1);
                    assert_eq!(section.attributes("a=fmtp:").count(), 1);
                }
                MediaKind::Audio => {
                    assert_eq!(count(section.lines(), "a=rtpmap:8 PCMA/8000/1"), 1);
                    assert_eq!(section.attributes("a=fmtp:").count(), 1);
                }
                MediaKind::Other(_) => {}
            }
        }

        // Marker-Zeilen werden nicht dedupliziert
        assert_eq!(count(twice.session_lines(), "a=ice-options:tcp-so"), 2);
        assert_eq!(twice.media_sections().len(), once.media_sections().len());
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let doc = SdpDocument::parse(ENGINE_OFFER).unwrap();
        let transformer = SdpTransformer::default();
        assert_eq!(transformer.rewrite(&doc), transformer.rewrite(&doc));
    }
}
