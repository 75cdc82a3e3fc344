//! SDP Dokument-Modell
//!
//! Zeilenbasierte Darstellung eines SDP: ein Session-Präfix und beliebig
//! viele Media-Sections in Originalreihenfolge. Es wird bewusst nichts
//! interpretiert außer den `v=` und `m=` Zeilen.

use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("SDP is empty")]
    Empty,

    #[error("SDP does not start with a session line (v=), found: {0}")]
    MissingSessionLine(String),
}

// ============================================================================
// MEDIA KIND
// ============================================================================

/// Typ einer Media-Section laut `m=` Zeile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    /// `application`, `text`, ... – werden nur durchgereicht
    Other(String),
}

impl MediaKind {
    pub(crate) fn from_media_line(line: &str) -> Self {
        let kind = line
            .strip_prefix("m=")
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or_default();

        match kind {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            other => MediaKind::Other(other.to_string()),
        }
    }
}

// ============================================================================
// MEDIA SECTION
// ============================================================================

/// Eine Media-Section, beginnend mit ihrer `m=` Zeile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    kind: MediaKind,
    lines: Vec<String>,
}

impl MediaSection {
    /// Typ der Section
    pub fn kind(&self) -> &MediaKind {
        &self.kind
    }

    /// Die `m=` Zeile
    pub fn media_line(&self) -> &str {
        &self.lines[0]
    }

    /// Alle Zeilen inklusive `m=` Zeile
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Alle Attribut-Zeilen mit dem angegebenen Präfix, z.B. `a=rtpmap:`
    pub fn attributes<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(move |line| line.starts_with(prefix))
    }
}

// ============================================================================
// SDP DOCUMENT
// ============================================================================

/// Geparstes SDP: Session-Präfix + Media-Sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpDocument {
    session: Vec<String>,
    media: Vec<MediaSection>,
}

impl SdpDocument {
    /// Parst SDP-Text (`\r\n` oder `\n` als Zeilenende)
    ///
    /// Die erste nicht-leere Zeile muss die Session-Zeile `v=` sein.
    /// Leerzeilen werden verworfen.
    pub fn parse(text: &str) -> Result<Self, TransformError> {
        let lines: Vec<String> = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();

        let first = lines.first().ok_or(TransformError::Empty)?;
        if !first.starts_with("v=") {
            return Err(TransformError::MissingSessionLine(first.clone()));
        }

        Ok(Self::from_lines(lines))
    }

    /// Baut ein Dokument aus bereits validierten Zeilen
    pub(crate) fn from_lines(lines: Vec<String>) -> Self {
        let mut session = Vec::new();
        let mut media: Vec<MediaSection> = Vec::new();

        for line in lines {
            if line.starts_with("m=") {
                media.push(MediaSection {
                    kind: MediaKind::from_media_line(&line),
                    lines: vec![line],
                });
            } else if let Some(section) = media.last_mut() {
                section.lines.push(line);
            } else {
                session.push(line);
            }
        }

        Self { session, media }
    }

    /// Session-Level Zeilen (vor der ersten `m=` Zeile)
    pub fn session_lines(&self) -> &[String] {
        &self.session
    }

    /// Media-Sections in Originalreihenfolge
    pub fn media_sections(&self) -> &[MediaSection] {
        &self.media
    }

    /// Alle Zeilen in Dokumentreihenfolge
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.session
            .iter()
            .chain(self.media.iter().flat_map(|m| m.lines.iter()))
            .map(String::as_str)
    }

    /// Anzahl der Media-Sections eines Typs
    pub fn count_sections(&self, kind: &MediaKind) -> usize {
        self.media.iter().filter(|m| &m.kind == kind).count()
    }
}

impl fmt::Display for SdpDocument {
    /// Rendert mit `\r\n` als Zeilenende (inklusive abschließendem)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            write!(f, "{}\r\n", line)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SdpDocument {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// TESTS
// ============================================================================
