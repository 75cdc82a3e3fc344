//! SDP Module - Offer-Modell und Rewrite
//!
//! Dieses Modul enthält:
//! - Ein zeilenbasiertes SDP-Modell (Session-Präfix + Media-Sections)
//! - Den Rewrite, der H264/PCMA pinnt und UDP-Kandidaten entfernt
//!

mod document;
mod transform;

pub use document::{MediaKind, MediaSection, SdpDocument, TransformError};
pub use transform::{CodecBinding, CodecProfile, SdpTransformer};
