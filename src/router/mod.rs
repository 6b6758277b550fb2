//! Event router - the orchestrator between the wire protocols and the UI.
//!
//! Inbound OSC/MIDI messages resolve through the active mapping layer and
//! come out as `ui_update` events; UI interactions resolve the other way and
//! come out as OSC or MIDI protocol messages.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::convert;
use crate::mapping::{ControlKey, ControlKind, MidiBinding, MidiKind};
use crate::session::Session;
use crate::transport::{TransportError, WireSink};
use crate::wire::{ClientMessage, MidiData, ServerMessage, UiControl};

/// A resolved inbound event, ready for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct UiUpdate {
    pub channel: u16,
    pub event: ControlKind,
    pub value: f32,
}

/// The orchestrator. Holds the session context (whose active-layer snapshot
/// is its only read path into the mapping state) and the outbound sink.
pub struct EventRouter {
    session: Arc<Session>,
    sink: Arc<dyn WireSink>,
}

impl EventRouter {
    pub fn new(session: Arc<Session>, sink: Arc<dyn WireSink>) -> Self {
        Self { session, sink }
    }

    /// Dispatch one message from the transport.
    pub fn handle_message(&self, message: ClientMessage) {
        match message {
            ClientMessage::Osc { .. } | ClientMessage::Midi { .. } => {
                if let Some(update) = self.handle_inbound(message) {
                    let result = self.sink.send(&ServerMessage::UiUpdate {
                        channel: update.channel,
                        event: update.event,
                        value: update.value,
                    });
                    if let Err(e) = result {
                        warn!("Failed to deliver ui_update: {}", e);
                    }
                }
            },
            ClientMessage::UiEvent {
                control,
                channel,
                name,
                value,
            } => match Self::control_kind(control, name.as_deref()) {
                Some(kind) => {
                    if let Err(e) = self.handle_outbound(kind, channel, value) {
                        warn!("Failed to translate ui_event: {}", e);
                    }
                },
                None => {
                    let _ = self.sink.send(&ServerMessage::Error {
                        message: format!("unknown ui control: {:?} name={:?}", control, name),
                    });
                },
            },
            ClientMessage::UpdateSettings { settings } => {
                let (effective, _changed) = self.session.update_settings(&settings);
                if let Err(e) = self.sink.send(&ServerMessage::SettingsUpdated {
                    settings: effective,
                }) {
                    warn!("Failed to acknowledge settings update: {}", e);
                }
            },
        }
    }

    /// Resolve an inbound protocol message against the active layer.
    ///
    /// Unmapped traffic is normal and is dropped without an error. Values
    /// cross over to the opposite protocol's declared range: MIDI in, OSC
    /// range out; OSC in, MIDI range out.
    pub fn handle_inbound(&self, message: ClientMessage) -> Option<UiUpdate> {
        let layer = self.session.active_snapshot();

        let update = match &message {
            ClientMessage::Osc { address, args } => {
                layer.resolve_by_osc(address).map(|(key, entry)| {
                    let value = args.first().copied().unwrap_or(0.0);
                    UiUpdate {
                        channel: key.channel,
                        event: key.kind,
                        value: convert::osc_to_midi(entry, value) as f32,
                    }
                })
            },
            ClientMessage::Midi { data } => {
                let (kind, number, raw) = match *data {
                    MidiData::ControlChange { control, value } => {
                        (MidiKind::ControlChange, control, value)
                    },
                    MidiData::NoteOn { note, velocity } => (MidiKind::Note, note, velocity),
                    MidiData::NoteOff { note, velocity } => (MidiKind::Note, note, velocity),
                };
                layer
                    .resolve_by_midi(kind, number)
                    .map(|(key, entry)| UiUpdate {
                        channel: key.channel,
                        event: key.kind,
                        value: convert::midi_to_osc(entry, raw),
                    })
            },
            _ => None,
        };

        if update.is_none() {
            trace!("Dropping unmapped inbound message: {:?}", message);
        }
        update
    }

    /// Translate a UI interaction into one outbound protocol message.
    ///
    /// An unmapped control is a no-op. When the entry carries both an OSC
    /// address and a MIDI binding, OSC wins.
    pub fn handle_outbound(
        &self,
        kind: ControlKind,
        channel: u16,
        value: f32,
    ) -> Result<(), TransportError> {
        let layer = self.session.active_snapshot();
        let key = ControlKey::new(kind, channel);
        let Some(entry) = layer.get(&key) else {
            debug!("No mapping for outbound control '{}'", key);
            return Ok(());
        };

        let midi_value = value.round().clamp(0.0, 127.0) as u8;

        if let Some(address) = entry.osc_address() {
            let (ip, port) = self.session.osc_output();
            return self.sink.send(&ServerMessage::Osc {
                address: address.to_string(),
                args: vec![convert::midi_to_osc(entry, midi_value)],
                ip,
                port,
            });
        }

        match entry.midi_binding() {
            Some(MidiBinding::Cc(cc)) => self.sink.send(&ServerMessage::Midi {
                data: MidiData::ControlChange {
                    control: cc,
                    value: midi_value,
                },
            }),
            Some(MidiBinding::Note(note)) => {
                let data = if midi_value > 0 {
                    MidiData::NoteOn {
                        note,
                        velocity: midi_value,
                    }
                } else {
                    MidiData::NoteOff { note, velocity: 0 }
                };
                self.sink.send(&ServerMessage::Midi { data })
            },
            None => {
                debug!("Mapping '{}' has no outbound binding", key);
                Ok(())
            },
        }
    }

    /// Push the current stack shape to the UI.
    pub async fn notify_layer_change(&self) -> Result<(), TransportError> {
        let overview = self.session.layer_overview().await;
        self.sink.send(&ServerMessage::LayerChange {
            active_layer: overview.active_layer,
            layer_names: overview.layer_names,
            mapping_keys: overview.mapping_keys,
        })
    }

    /// Map a `ui_event`'s control family (plus button row name) onto the
    /// mapping-key kind.
    fn control_kind(control: UiControl, name: Option<&str>) -> Option<ControlKind> {
        match control {
            UiControl::Fader => Some(ControlKind::Fader),
            UiControl::Knob => Some(ControlKind::Knob),
            UiControl::Button => name
                .and_then(|n| n.parse::<ControlKind>().ok())
                .filter(ControlKind::is_button),
        }
    }
}
