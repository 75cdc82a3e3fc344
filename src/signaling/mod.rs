//! Signaling Module - HTTP Client für WHIP/WHEP
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Media-Server:
//! - Endpoint-URLs pro Stream und Richtung bauen
//! - SDP Offer senden, Answer und Resource-Locator parsen
//! - Resourcen beim Auflegen freigeben
//!

mod client;
mod messages;

pub use client::{SignalingClient, SignalingError};
pub use messages::*;
