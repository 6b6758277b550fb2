//! The layer stack: one loaded preset's layers and the active-layer pointer.

use thiserror::Error;

use super::{default_layer, ControlKey, Layer, LayerDoc, MappingEntry, MappingError};

/// Structural edits that would leave the stack invalid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StackError {
    #[error("cannot remove the last remaining layer")]
    LastLayer,
    #[error("layer index {index} out of range ({len} layers)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Where the stack sits in the preset lifecycle.
///
/// A save acknowledgment collapses straight back to `Loaded`, so "saved" is
/// not a resting state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetLifecycle {
    /// Freshly synthesized, never loaded from or saved to the store.
    Unloaded,
    /// Matches the store's copy.
    Loaded,
    /// Has unsaved layer or mapping edits.
    Modified,
}

/// An in-memory projection of one preset: ≥1 layers plus the active index.
#[derive(Debug, Clone)]
pub struct LayerStack {
    preset_name: Option<String>,
    layers: Vec<Layer>,
    active: usize,
    lifecycle: PresetLifecycle,
}

impl LayerStack {
    /// A fresh, unnamed single-layer stack carrying the embedded default
    /// mapping. Used at first start and after the loaded preset is deleted.
    pub fn synthesize() -> Self {
        Self {
            preset_name: None,
            layers: vec![default_layer("Layer 1")],
            active: 0,
            lifecycle: PresetLifecycle::Unloaded,
        }
    }

    /// Build a stack from a preset's layer documents. An empty document list
    /// still yields one (empty) layer.
    pub fn from_layer_docs(name: &str, docs: Vec<LayerDoc>) -> Result<Self, MappingError> {
        let mut layers = docs.into_iter().map(Layer::from_doc).collect::<Result<Vec<_>, _>>()?;
        if layers.is_empty() {
            layers.push(Layer::new("Layer 1"));
        }
        Ok(Self {
            preset_name: Some(name.to_string()),
            layers,
            active: 0,
            lifecycle: PresetLifecycle::Loaded,
        })
    }

    /// The stack's layers as storable documents.
    pub fn layer_docs(&self) -> Vec<LayerDoc> {
        self.layers.iter().map(Layer::to_doc).collect()
    }

    pub fn preset_name(&self) -> Option<&str> {
        self.preset_name.as_deref()
    }

    pub fn lifecycle(&self) -> PresetLifecycle {
        self.lifecycle
    }

    pub fn is_modified(&self) -> bool {
        self.lifecycle == PresetLifecycle::Modified
    }

    /// Number of layers; always ≥ 1.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_layer(&self) -> &Layer {
        &self.layers[self.active]
    }

    fn check_index(&self, index: usize) -> Result<(), StackError> {
        if index >= self.layers.len() {
            return Err(StackError::IndexOutOfRange {
                index,
                len: self.layers.len(),
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.lifecycle = PresetLifecycle::Modified;
    }

    /// Append a layer, synthesizing `"Layer N"` (smallest unused N ≥ 1) when
    /// no name is given. Returns the new layer's index.
    pub fn add_layer(&mut self, name: Option<&str>) -> usize {
        let name = match name {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => self.next_default_name(),
        };
        self.layers.push(Layer::new(name));
        self.touch();
        self.layers.len() - 1
    }

    fn next_default_name(&self) -> String {
        let used: Vec<u32> = self
            .layers
            .iter()
            .filter_map(|l| l.name().strip_prefix("Layer ")?.parse().ok())
            .collect();
        let mut n = 1u32;
        while used.contains(&n) {
            n += 1;
        }
        format!("Layer {}", n)
    }

    /// Remove the layer at `index`. The last remaining layer cannot be
    /// removed; the active pointer keeps tracking the same layer when it can,
    /// and is clamped otherwise.
    pub fn remove_layer(&mut self, index: usize) -> Result<(), StackError> {
        self.check_index(index)?;
        if self.layers.len() == 1 {
            return Err(StackError::LastLayer);
        }
        self.layers.remove(index);
        if index < self.active {
            self.active -= 1;
        } else if self.active >= self.layers.len() {
            self.active = self.layers.len() - 1;
        }
        self.touch();
        Ok(())
    }

    /// Rename the layer at `index`. Whitespace is trimmed; an empty result
    /// falls back to `"Layer {index+1}"`.
    pub fn rename_layer(&mut self, index: usize, name: &str) -> Result<(), StackError> {
        self.check_index(index)?;
        let trimmed = name.trim();
        let name = if trimmed.is_empty() {
            format!("Layer {}", index + 1)
        } else {
            trimmed.to_string()
        };
        self.layers[index].set_name(name);
        self.touch();
        Ok(())
    }

    /// Select the active layer.
    pub fn set_active_layer(&mut self, index: usize) -> Result<(), StackError> {
        self.check_index(index)?;
        self.active = index;
        Ok(())
    }

    /// Insert or replace a mapping on the active layer.
    pub fn upsert_mapping(&mut self, key: ControlKey, entry: MappingEntry) -> Result<(), MappingError> {
        self.layers[self.active].upsert(key, entry)?;
        self.touch();
        Ok(())
    }

    /// Remove a mapping from the active layer.
    pub fn remove_mapping(&mut self, key: &ControlKey) -> Option<MappingEntry> {
        let removed = self.layers[self.active].remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Record a completed save under `name`.
    pub fn mark_saved(&mut self, name: &str) {
        self.preset_name = Some(name.to_string());
        self.lifecycle = PresetLifecycle::Loaded;
    }
}
