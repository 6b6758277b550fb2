//! Wire protocol: JSON messages exchanged over the duplex socket.
//!
//! Everything on the wire is an internally tagged object (`"type": ...`).
//! [`ClientMessage`] is what the gateway receives; [`ServerMessage`] is what
//! it sends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::mapping::ControlKind;

/// A MIDI event as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiData {
    ControlChange { control: u8, value: u8 },
    NoteOn { note: u8, velocity: u8 },
    NoteOff {
        note: u8,
        #[serde(default)]
        velocity: u8,
    },
}

/// The UI-side control family of a `ui_event`. Button events carry the row
/// (`mute`/`solo`/`rec`/`select`) in the separate `name` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiControl {
    Fader,
    Knob,
    Button,
}

/// Messages received over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// An inbound OSC message; the first positional argument is the value.
    Osc {
        address: String,
        #[serde(default)]
        args: Vec<f32>,
    },
    /// An inbound MIDI message.
    Midi { data: MidiData },
    /// A UI interaction to translate outbound.
    UiEvent {
        control: UiControl,
        channel: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: f32,
    },
    /// Runtime settings update from the settings form.
    UpdateSettings { settings: SettingsPatch },
}

/// Messages sent over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An outbound OSC message, carrying the configured output target.
    Osc {
        address: String,
        args: Vec<f32>,
        ip: String,
        port: u16,
    },
    /// An outbound MIDI message.
    Midi { data: MidiData },
    /// A resolved inbound event for the UI to render.
    UiUpdate {
        channel: u16,
        event: ControlKind,
        value: f32,
    },
    /// Pushed after any layer or preset mutation.
    LayerChange {
        active_layer: String,
        layer_names: BTreeMap<String, String>,
        mapping_keys: Vec<String>,
    },
    /// Acknowledges `update_settings` with the effective settings.
    SettingsUpdated { settings: OscSettings },
    /// Reply to messages the gateway cannot interpret.
    Error { message: String },
}

/// Runtime OSC endpoint settings, mutable from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscSettings {
    pub osc_output_ip: String,
    pub osc_output_port: u16,
    pub osc_input_port: u16,
}

impl OscSettings {
    /// Apply the fields present in `patch`; returns whether anything changed.
    pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
        let mut changed = false;
        if let Some(ip) = &patch.osc_output_ip {
            if *ip != self.osc_output_ip {
                self.osc_output_ip = ip.clone();
                changed = true;
            }
        }
        if let Some(port) = patch.osc_output_port {
            if port != self.osc_output_port {
                self.osc_output_port = port;
                changed = true;
            }
        }
        if let Some(port) = patch.osc_input_port {
            if port != self.osc_input_port {
                self.osc_input_port = port;
                changed = true;
            }
        }
        changed
    }
}

/// Partial settings as sent by the UI; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_output_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_output_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_input_port: Option<u16>,
}
