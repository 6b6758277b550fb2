//! XCTL GW - bidirectional MIDI/OSC translation gateway
//!
//! Resolves control-surface events (MIDI control changes and notes) against a
//! layered, user-editable mapping and translates them to OSC-addressed
//! messages, and back. The UI and the protocol endpoints sit on the far side
//! of a single duplex WebSocket managed by [`transport::TransportBridge`].

pub mod config;
pub mod convert;
pub mod mapping;
pub mod preset;
pub mod router;
pub mod session;
pub mod transport;
pub mod wire;
