//! Mapping model: control keys, mapping entries, layers, and the layer stack.
//!
//! A mapping key is the string `<kind>_<channel>` (e.g. `fader_1`), binding
//! one UI control to an OSC address and/or a MIDI control change or note.

mod layer;
mod snapshot;
mod stack;

pub use layer::{Layer, LayerDoc};
pub use snapshot::ActiveLayerHandle;
pub use stack::{LayerStack, PresetLifecycle, StackError};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by mapping-table edits and mapping-document loads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("invalid mapping key '{0}': expected <kind>_<channel>")]
    InvalidKey(String),
    #[error("mapping '{key}' binds both a control change and a note")]
    ConflictingMidiBinding { key: String },
    #[error("mapping '{key}' has out-of-range {field} {value} (must be 0-127)")]
    OutOfRange {
        key: String,
        field: &'static str,
        value: u8,
    },
}

/// The closed set of UI control kinds a mapping key can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Fader,
    Knob,
    Mute,
    Solo,
    Rec,
    Select,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Fader => "fader",
            ControlKind::Knob => "knob",
            ControlKind::Mute => "mute",
            ControlKind::Solo => "solo",
            ControlKind::Rec => "rec",
            ControlKind::Select => "select",
        }
    }

    /// True for the four button rows (everything that is not continuous).
    pub fn is_button(&self) -> bool {
        !matches!(self, ControlKind::Fader | ControlKind::Knob)
    }
}

impl FromStr for ControlKind {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fader" => Ok(ControlKind::Fader),
            "knob" => Ok(ControlKind::Knob),
            "mute" => Ok(ControlKind::Mute),
            "solo" => Ok(ControlKind::Solo),
            "rec" => Ok(ControlKind::Rec),
            "select" => Ok(ControlKind::Select),
            other => Err(MappingError::InvalidKey(other.to_string())),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed form of a mapping key like `"fader_1"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlKey {
    pub kind: ControlKind,
    /// 1-based channel strip index.
    pub channel: u16,
}

impl ControlKey {
    pub fn new(kind: ControlKind, channel: u16) -> Self {
        Self { kind, channel }
    }
}

impl FromStr for ControlKey {
    type Err = MappingError;

    /// Parse a key like `"fader_1"` or `"select_12"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind_str, channel_str) = s
            .rsplit_once('_')
            .ok_or_else(|| MappingError::InvalidKey(s.to_string()))?;
        let kind = kind_str
            .parse::<ControlKind>()
            .map_err(|_| MappingError::InvalidKey(s.to_string()))?;
        let channel = channel_str
            .parse::<u16>()
            .map_err(|_| MappingError::InvalidKey(s.to_string()))?;
        if channel == 0 {
            return Err(MappingError::InvalidKey(s.to_string()));
        }
        Ok(Self { kind, channel })
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.channel)
    }
}

/// Which MIDI reverse index a lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiKind {
    ControlChange,
    Note,
}

/// The MIDI side of a mapping entry, at most one per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiBinding {
    Cc(u8),
    Note(u8),
}

/// One logical control binding.
///
/// Field names match the mapping JSON documents edited by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// OSC address, e.g. `/channel/1/fader`. Empty or absent means the entry
    /// does not participate in OSC resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_cc: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_note: Option<u8>,
    #[serde(default)]
    pub midi_min: u8,
    #[serde(default = "default_midi_max")]
    pub midi_max: u8,
    #[serde(default)]
    pub osc_min: f32,
    #[serde(default = "default_osc_max")]
    pub osc_max: f32,
}

fn default_midi_max() -> u8 {
    127
}

fn default_osc_max() -> f32 {
    1.0
}

impl Default for MappingEntry {
    fn default() -> Self {
        Self {
            osc: None,
            midi_cc: None,
            midi_note: None,
            midi_min: 0,
            midi_max: 127,
            osc_min: 0.0,
            osc_max: 1.0,
        }
    }
}

impl MappingEntry {
    /// The OSC address, with the empty string treated as unset.
    pub fn osc_address(&self) -> Option<&str> {
        self.osc.as_deref().filter(|a| !a.is_empty())
    }

    /// The MIDI binding, if any.
    pub fn midi_binding(&self) -> Option<MidiBinding> {
        match (self.midi_cc, self.midi_note) {
            (Some(cc), _) => Some(MidiBinding::Cc(cc)),
            (None, Some(note)) => Some(MidiBinding::Note(note)),
            (None, None) => None,
        }
    }

    /// Check the entry invariants for the given key.
    pub fn validate(&self, key: &ControlKey) -> Result<(), MappingError> {
        if self.midi_cc.is_some() && self.midi_note.is_some() {
            return Err(MappingError::ConflictingMidiBinding {
                key: key.to_string(),
            });
        }
        for (field, value) in [
            ("midi_cc", self.midi_cc),
            ("midi_note", self.midi_note),
            ("midi_min", Some(self.midi_min)),
            ("midi_max", Some(self.midi_max)),
        ] {
            if let Some(value) = value {
                if value > 127 {
                    return Err(MappingError::OutOfRange {
                        key: key.to_string(),
                        field,
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Serde helper preserving document order of `{key: entry}` maps.
pub(crate) mod ordered_map {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of mapping keys to entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry()? {
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

/// Embedded default mapping: 8 channel strips in the classic MCU note layout
/// (rec 0-7, solo 8-15, mute 16-23, select 24-31), faders on CC 70-77 and
/// knobs on CC 80-87, each bound to its `/channel/N/<kind>` OSC address.
static DEFAULT_ENTRIES: Lazy<Vec<(ControlKey, MappingEntry)>> = Lazy::new(|| {
    let mut entries = Vec::with_capacity(6 * 8);
    for strip in 1u16..=8 {
        let idx = (strip - 1) as u8;
        let rows: [(ControlKind, Option<u8>, Option<u8>); 6] = [
            (ControlKind::Fader, Some(70 + idx), None),
            (ControlKind::Knob, Some(80 + idx), None),
            (ControlKind::Rec, None, Some(idx)),
            (ControlKind::Solo, None, Some(8 + idx)),
            (ControlKind::Mute, None, Some(16 + idx)),
            (ControlKind::Select, None, Some(24 + idx)),
        ];
        for (kind, cc, note) in rows {
            entries.push((
                ControlKey::new(kind, strip),
                MappingEntry {
                    osc: Some(format!("/channel/{}/{}", strip, kind)),
                    midi_cc: cc,
                    midi_note: note,
                    ..MappingEntry::default()
                },
            ));
        }
    }
    entries
});

/// Build a layer populated with the embedded default mapping.
pub fn default_layer(name: &str) -> Layer {
    let mut layer = Layer::new(name);
    for (key, entry) in DEFAULT_ENTRIES.iter() {
        // Entries are statically valid, but keep the normal edit path
        if let Err(e) = layer.upsert(*key, entry.clone()) {
            unreachable!("embedded default mapping is invalid: {}", e);
        }
    }
    layer
}
