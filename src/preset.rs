//! Durable preset storage.
//!
//! A preset is stored as a directory holding `layer_index.json` (the ordered
//! layer names) plus one `layer_N.json` document per layer, matching the
//! layout the web UI's preset API has always produced.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use crate::mapping::{default_layer, Layer, LayerDoc};

/// A preset as stored: `{"layers": [{name, mappings}, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetDoc {
    pub layers: Vec<LayerDoc>,
}

impl PresetDoc {
    /// The preset seeded on first run: layer 1 carries the embedded default
    /// mapping, layers 2-8 start empty.
    pub fn starter() -> Self {
        let mut layers = vec![default_layer("Layer 1").to_doc()];
        for i in 2..=8 {
            layers.push(Layer::new(format!("Layer {}", i)).to_doc());
        }
        Self { layers }
    }
}

/// Injected storage backend for named presets.
#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;
    async fn load(&self, name: &str) -> Result<PresetDoc>;
    async fn save(&self, name: &str, doc: &PresetDoc) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Filesystem-backed preset store.
pub struct FsPresetStore {
    root: PathBuf,
}

impl FsPresetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the per-user config directory
    /// (e.g. `~/.config/xctl-gw/presets`).
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir().context("no user config directory available")?;
        Ok(Self::new(base.join("xctl-gw").join("presets")))
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn preset_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            anyhow::bail!("invalid preset name: '{}'", name);
        }
        Ok(self.root.join(name))
    }

    /// Seed the store with a "Default" preset when it holds nothing at all.
    pub async fn ensure_default(&self) -> Result<()> {
        if self.list().await?.is_empty() {
            info!("Preset store is empty, creating 'Default' preset");
            self.save("Default", &PresetDoc::starter()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PresetStore for FsPresetStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // A store that was never written to lists as empty
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read preset directory: {}", self.root.display())
                })
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> Result<PresetDoc> {
        let dir = self.preset_dir(name)?;
        let index_path = dir.join("layer_index.json");
        let index_json = fs::read_to_string(&index_path)
            .await
            .with_context(|| format!("preset '{}' not found", name))?;
        let layer_names: Vec<String> = serde_json::from_str(&index_json)
            .with_context(|| format!("invalid layer index for preset '{}'", name))?;

        let mut layers = Vec::with_capacity(layer_names.len());
        for (i, layer_name) in layer_names.iter().enumerate() {
            let path = dir.join(format!("layer_{}.json", i + 1));
            let json = fs::read_to_string(&path)
                .await
                .with_context(|| format!("missing layer file: layer_{}.json", i + 1))?;
            let mut doc: LayerDoc = serde_json::from_str(&json)
                .with_context(|| format!("invalid layer file: layer_{}.json", i + 1))?;
            if doc.name.is_empty() {
                doc.name = layer_name.clone();
            }
            layers.push(doc);
        }

        debug!("Loaded preset '{}' ({} layers)", name, layers.len());
        Ok(PresetDoc { layers })
    }

    async fn save(&self, name: &str, doc: &PresetDoc) -> Result<()> {
        let dir = self.preset_dir(name)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create preset directory: {}", dir.display()))?;

        let layer_names: Vec<&str> = doc.layers.iter().map(|l| l.name.as_str()).collect();
        let index_json = serde_json::to_string_pretty(&layer_names)?;
        fs::write(dir.join("layer_index.json"), index_json)
            .await
            .context("failed to write layer index")?;

        for (i, layer) in doc.layers.iter().enumerate() {
            let json = serde_json::to_string_pretty(layer)?;
            fs::write(dir.join(format!("layer_{}.json", i + 1)), json)
                .await
                .with_context(|| format!("failed to write layer_{}.json", i + 1))?;
        }

        debug!("Saved preset '{}' ({} layers)", name, doc.layers.len());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let dir = self.preset_dir(name)?;
        fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("preset '{}' not found", name))?;
        debug!("Deleted preset '{}'", name);
        Ok(())
    }
}
