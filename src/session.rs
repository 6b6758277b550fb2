//! Session context: the loaded layer stack, preset store, and runtime
//! settings, shared explicitly with the router and the application shell.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::mapping::{
    ActiveLayerHandle, ControlKey, Layer, LayerStack, MappingEntry, MappingError, StackError,
};
use crate::preset::{PresetDoc, PresetStore};
use crate::wire::{OscSettings, SettingsPatch};

/// Snapshot of the stack shape, pushed to the UI as `layer_change`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerOverview {
    pub active_layer: String,
    pub layer_names: BTreeMap<String, String>,
    pub mapping_keys: Vec<String>,
}

/// One gateway session.
///
/// The stack is the mutation path; the resolution path only ever sees the
/// [`ActiveLayerHandle`] snapshot, republished after every successful edit.
pub struct Session {
    store: Arc<dyn PresetStore>,
    stack: RwLock<LayerStack>,
    active: ActiveLayerHandle,
    settings: parking_lot::RwLock<OscSettings>,
}

impl Session {
    pub fn new(store: Arc<dyn PresetStore>, stack: LayerStack, settings: OscSettings) -> Self {
        let active = ActiveLayerHandle::new(stack.active_layer().clone());
        Self {
            store,
            stack: RwLock::new(stack),
            active,
            settings: parking_lot::RwLock::new(settings),
        }
    }

    /// The active layer as an immutable snapshot. O(1), never blocks on the
    /// mutation path.
    pub fn active_snapshot(&self) -> Arc<Layer> {
        self.active.snapshot()
    }

    /// Current runtime settings.
    pub fn settings(&self) -> OscSettings {
        self.settings.read().clone()
    }

    /// The configured OSC output target.
    pub fn osc_output(&self) -> (String, u16) {
        let settings = self.settings.read();
        (settings.osc_output_ip.clone(), settings.osc_output_port)
    }

    /// Apply a settings patch; returns the effective settings and whether
    /// anything changed.
    pub fn update_settings(&self, patch: &SettingsPatch) -> (OscSettings, bool) {
        let mut settings = self.settings.write();
        let changed = settings.apply(patch);
        if changed {
            info!(
                "OSC settings updated: out={}:{}, in={}",
                settings.osc_output_ip, settings.osc_output_port, settings.osc_input_port
            );
        }
        (settings.clone(), changed)
    }

    fn republish(&self, stack: &LayerStack) {
        self.active.publish(stack.active_layer().clone());
    }

    /// Shape of the current stack for `layer_change` notifications.
    pub async fn layer_overview(&self) -> LayerOverview {
        let stack = self.stack.read().await;
        let layer_names = stack
            .layer_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (i.to_string(), name))
            .collect();
        LayerOverview {
            active_layer: stack.active_layer().name().to_string(),
            layer_names,
            mapping_keys: stack.active_layer().keys(),
        }
    }

    /// Name of the loaded preset, if any.
    pub async fn preset_name(&self) -> Option<String> {
        self.stack.read().await.preset_name().map(str::to_string)
    }

    /// Whether the stack has unsaved edits.
    pub async fn is_modified(&self) -> bool {
        self.stack.read().await.is_modified()
    }

    // --- layer operations ----------------------------------------------

    pub async fn add_layer(&self, name: Option<&str>) -> usize {
        let mut stack = self.stack.write().await;
        let index = stack.add_layer(name);
        self.republish(&stack);
        index
    }

    pub async fn remove_layer(&self, index: usize) -> Result<(), StackError> {
        let mut stack = self.stack.write().await;
        stack.remove_layer(index)?;
        self.republish(&stack);
        Ok(())
    }

    pub async fn rename_layer(&self, index: usize, name: &str) -> Result<(), StackError> {
        let mut stack = self.stack.write().await;
        stack.rename_layer(index, name)?;
        self.republish(&stack);
        Ok(())
    }

    pub async fn set_active_layer(&self, index: usize) -> Result<(), StackError> {
        let mut stack = self.stack.write().await;
        stack.set_active_layer(index)?;
        self.republish(&stack);
        Ok(())
    }

    pub async fn upsert_mapping(
        &self,
        key: ControlKey,
        entry: MappingEntry,
    ) -> Result<(), MappingError> {
        let mut stack = self.stack.write().await;
        stack.upsert_mapping(key, entry)?;
        self.republish(&stack);
        Ok(())
    }

    pub async fn remove_mapping(&self, key: &ControlKey) -> Option<MappingEntry> {
        let mut stack = self.stack.write().await;
        let removed = stack.remove_mapping(key);
        if removed.is_some() {
            self.republish(&stack);
        }
        removed
    }

    // --- preset operations ---------------------------------------------

    pub async fn list_presets(&self) -> Result<Vec<String>> {
        self.store.list().await
    }

    /// Replace the stack with the named preset from the store.
    pub async fn load_preset(&self, name: &str) -> Result<()> {
        let doc = self.store.load(name).await?;
        let new_stack = LayerStack::from_layer_docs(name, doc.layers)?;
        let mut stack = self.stack.write().await;
        *stack = new_stack;
        self.republish(&stack);
        info!("Loaded preset '{}' ({} layers)", name, stack.len());
        Ok(())
    }

    /// Save the stack under `name`, or under its current name when `None`.
    /// Returns the effective name.
    pub async fn save_preset(&self, name: Option<&str>) -> Result<String> {
        let mut stack = self.stack.write().await;
        let name = name
            .map(str::to_string)
            .or_else(|| stack.preset_name().map(str::to_string))
            .context("preset has no name; supply one to save")?;
        let doc = PresetDoc {
            layers: stack.layer_docs(),
        };
        self.store.save(&name, &doc).await?;
        stack.mark_saved(&name);
        info!("Saved preset '{}'", name);
        Ok(name)
    }

    /// Delete a preset. When it is the loaded one, fall back to another
    /// stored preset, or to a fresh unsaved stack when none remain.
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        self.store.delete(name).await?;
        info!("Deleted preset '{}'", name);

        let was_current = { self.stack.read().await.preset_name() == Some(name) };
        if !was_current {
            return Ok(());
        }

        let remaining = self.store.list().await?;
        match remaining.first() {
            Some(next) => {
                let next = next.clone();
                self.load_preset(&next).await?;
            },
            None => {
                let mut stack = self.stack.write().await;
                *stack = LayerStack::synthesize();
                self.republish(&stack);
                info!("No presets remain; synthesized a fresh stack");
            },
        }
        Ok(())
    }
}
