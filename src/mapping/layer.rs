//! A single mapping layer: key→entry bindings plus reverse lookup indices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use super::{ordered_map, ControlKey, MappingEntry, MappingError, MidiKind};

/// One named mapping table.
///
/// Entries keep insertion order so the UI renders deterministically. Reverse
/// indices (OSC address, CC number, note number) are derived and rebuilt in
/// full on every edit; with duplicate targets the last-registered entry wins.
/// A layer is never edited while shared: the session clones, edits, and then
/// publishes the new version (see [`super::ActiveLayerHandle`]).
#[derive(Debug, Clone, Default)]
pub struct Layer {
    name: String,
    entries: Vec<(ControlKey, MappingEntry)>,
    by_osc: HashMap<String, usize>,
    by_cc: HashMap<u8, usize>,
    by_note: HashMap<u8, usize>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for `key`. A replaced entry keeps its
    /// position in the listing order; a new entry appends.
    pub fn upsert(&mut self, key: ControlKey, entry: MappingEntry) -> Result<(), MappingError> {
        entry.validate(&key)?;
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((key, entry)),
        }
        self.rebuild_indices();
        Ok(())
    }

    /// Remove the entry for `key`, returning it if present.
    pub fn remove(&mut self, key: &ControlKey) -> Option<MappingEntry> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        let (_, entry) = self.entries.remove(idx);
        self.rebuild_indices();
        Some(entry)
    }

    pub fn get(&self, key: &ControlKey) -> Option<&MappingEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// Entries in insertion order.
    pub fn list(&self) -> impl Iterator<Item = (&ControlKey, &MappingEntry)> {
        self.entries.iter().map(|(k, e)| (k, e))
    }

    /// Mapping keys in insertion order, as strings.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.to_string()).collect()
    }

    /// Resolve an inbound OSC address. The empty address never matches.
    pub fn resolve_by_osc(&self, address: &str) -> Option<(ControlKey, &MappingEntry)> {
        if address.is_empty() {
            return None;
        }
        let idx = *self.by_osc.get(address)?;
        let (key, entry) = &self.entries[idx];
        Some((*key, entry))
    }

    /// Resolve an inbound MIDI control change or note number.
    pub fn resolve_by_midi(&self, kind: MidiKind, number: u8) -> Option<(ControlKey, &MappingEntry)> {
        let idx = match kind {
            MidiKind::ControlChange => *self.by_cc.get(&number)?,
            MidiKind::Note => *self.by_note.get(&number)?,
        };
        let (key, entry) = &self.entries[idx];
        Some((*key, entry))
    }

    /// Rebuild all reverse indices from scratch.
    ///
    /// Insertion order makes "last registered wins" fall out of plain map
    /// inserts. Entries without an address or MIDI binding are skipped.
    fn rebuild_indices(&mut self) {
        let mut by_osc = HashMap::new();
        let mut by_cc = HashMap::new();
        let mut by_note = HashMap::new();

        for (idx, (_, entry)) in self.entries.iter().enumerate() {
            if let Some(address) = entry.osc_address() {
                by_osc.insert(address.to_string(), idx);
            }
            if let Some(cc) = entry.midi_cc {
                by_cc.insert(cc, idx);
            } else if let Some(note) = entry.midi_note {
                by_note.insert(note, idx);
            }
        }

        self.by_osc = by_osc;
        self.by_cc = by_cc;
        self.by_note = by_note;
    }

    /// Build a layer from its JSON document form.
    pub fn from_doc(doc: LayerDoc) -> Result<Self, MappingError> {
        let mut layer = Layer::new(doc.name);
        for (key, entry) in doc.mappings {
            let key = ControlKey::from_str(&key)?;
            layer.upsert(key, entry)?;
        }
        Ok(layer)
    }

    /// The JSON document form of this layer.
    pub fn to_doc(&self) -> LayerDoc {
        LayerDoc {
            name: self.name.clone(),
            mappings: self
                .entries
                .iter()
                .map(|(k, e)| (k.to_string(), e.clone()))
                .collect(),
        }
    }
}

/// On-disk / over-the-wire form of a layer:
/// `{ "name": ..., "mappings": { "fader_1": {...}, ... } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerDoc {
    #[serde(default)]
    pub name: String,
    #[serde(default, with = "ordered_map")]
    pub mappings: Vec<(String, MappingEntry)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fader_entry(cc: u8) -> MappingEntry {
        MappingEntry {
            osc: Some("/channel/1/fader".to_string()),
            midi_cc: Some(cc),
            ..MappingEntry::default()
        }
    }

    fn key(s: &str) -> ControlKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_and_resolve_by_midi() {
        let mut layer = Layer::new("Layer 1");
        layer.upsert(key("fader_1"), fader_entry(7)).unwrap();

        let (resolved, entry) = layer.resolve_by_midi(MidiKind::ControlChange, 7).unwrap();
        assert_eq!(resolved, key("fader_1"));
        assert_eq!(entry.midi_cc, Some(7));

        layer.remove(&key("fader_1")).unwrap();
        assert!(layer.resolve_by_midi(MidiKind::ControlChange, 7).is_none());
    }

    #[test]
    fn test_resolve_by_osc() {
        let mut layer = Layer::new("Layer 1");
        layer.upsert(key("fader_1"), fader_entry(7)).unwrap();

        let (resolved, _) = layer.resolve_by_osc("/channel/1/fader").unwrap();
        assert_eq!(resolved, key("fader_1"));
        assert!(layer.resolve_by_osc("/channel/2/fader").is_none());
    }

    #[test]
    fn test_empty_address_never_matches() {
        let mut layer = Layer::new("Layer 1");
        layer
            .upsert(
                key("mute_1"),
                MappingEntry {
                    osc: Some(String::new()),
                    midi_note: Some(16),
                    ..MappingEntry::default()
                },
            )
            .unwrap();

        assert!(layer.resolve_by_osc("").is_none());
        // Still resolvable through its MIDI binding
        assert!(layer.resolve_by_midi(MidiKind::Note, 16).is_some());
    }

    #[test]
    fn test_unbound_entry_absent_from_midi_index() {
        let mut layer = Layer::new("Layer 1");
        layer
            .upsert(
                key("knob_1"),
                MappingEntry {
                    osc: Some("/channel/1/knob".to_string()),
                    ..MappingEntry::default()
                },
            )
            .unwrap();

        assert!(layer.resolve_by_midi(MidiKind::ControlChange, 0).is_none());
        assert!(layer.resolve_by_midi(MidiKind::Note, 0).is_none());
        assert!(layer.resolve_by_osc("/channel/1/knob").is_some());
    }

    #[test]
    fn test_duplicate_target_last_registered_wins() {
        let mut layer = Layer::new("Layer 1");
        layer.upsert(key("fader_1"), fader_entry(7)).unwrap();
        layer
            .upsert(
                key("knob_1"),
                MappingEntry {
                    midi_cc: Some(7),
                    ..MappingEntry::default()
                },
            )
            .unwrap();

        let (resolved, _) = layer.resolve_by_midi(MidiKind::ControlChange, 7).unwrap();
        assert_eq!(resolved, key("knob_1"));
    }

    #[test]
    fn test_upsert_keeps_listing_position() {
        let mut layer = Layer::new("Layer 1");
        layer.upsert(key("fader_1"), fader_entry(7)).unwrap();
        layer.upsert(key("fader_2"), fader_entry(8)).unwrap();
        layer.upsert(key("fader_1"), fader_entry(9)).unwrap();

        assert_eq!(layer.keys(), vec!["fader_1", "fader_2"]);
        let (resolved, _) = layer.resolve_by_midi(MidiKind::ControlChange, 9).unwrap();
        assert_eq!(resolved, key("fader_1"));
    }

    #[test]
    fn test_doc_round_trip_preserves_order() {
        let mut layer = Layer::new("Main");
        layer.upsert(key("fader_2"), fader_entry(8)).unwrap();
        layer.upsert(key("fader_1"), fader_entry(7)).unwrap();
        layer.upsert(key("mute_1"), MappingEntry::default()).unwrap();

        let json = serde_json::to_string(&layer.to_doc()).unwrap();
        let doc: LayerDoc = serde_json::from_str(&json).unwrap();
        let restored = Layer::from_doc(doc).unwrap();

        assert_eq!(restored.name(), "Main");
        assert_eq!(restored.keys(), vec!["fader_2", "fader_1", "mute_1"]);
        assert_eq!(
            restored.get(&key("fader_1")),
            layer.get(&key("fader_1"))
        );
    }

    #[test]
    fn test_doc_with_invalid_key_is_rejected() {
        let doc: LayerDoc =
            serde_json::from_str(r#"{"name": "L", "mappings": {"pan_1": {}}}"#).unwrap();
        assert!(matches!(
            Layer::from_doc(doc),
            Err(MappingError::InvalidKey(_))
        ));
    }
}
