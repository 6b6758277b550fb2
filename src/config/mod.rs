//! Configuration management for the gateway
//!
//! Handles loading, validating, and hot-reloading of the YAML configuration.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

pub use watcher::ConfigWatcher;

use crate::wire::OscSettings;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OSC endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OscConfig {
    #[serde(default = "default_osc_input_port")]
    pub input_port: u16,
    #[serde(default = "default_osc_output_port")]
    pub output_port: u16,
    #[serde(default = "default_osc_output_ip")]
    pub output_ip: String,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            input_port: default_osc_input_port(),
            output_port: default_osc_output_port(),
            output_ip: default_osc_output_ip(),
        }
    }
}

impl From<&OscConfig> for OscSettings {
    fn from(config: &OscConfig) -> Self {
        Self {
            osc_output_ip: config.output_ip.clone(),
            osc_output_port: config.output_port,
            osc_input_port: config.input_port,
        }
    }
}

/// Duplex WebSocket endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_port")]
    pub port: u16,
    /// Explicit candidate URLs, tried in order. When empty, both spellings of
    /// the loopback host are derived from `port`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: default_ws_port(),
            candidates: Vec::new(),
        }
    }
}

impl WebSocketConfig {
    /// The ordered failover list the transport walks.
    pub fn candidate_urls(&self) -> Vec<String> {
        if !self.candidates.is_empty() {
            return self.candidates.clone();
        }
        vec![
            format!("ws://localhost:{}", self.port),
            format!("ws://127.0.0.1:{}", self.port),
        ]
    }
}

/// Preset store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetsConfig {
    /// Store root; defaults to the per-user config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Preset loaded at startup.
    #[serde(default = "default_startup_preset", skip_serializing_if = "Option::is_none")]
    pub startup: Option<String>,
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            root: None,
            startup: default_startup_preset(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.osc.input_port == 0 {
            anyhow::bail!("osc.input_port cannot be 0");
        }
        if self.osc.output_port == 0 {
            anyhow::bail!("osc.output_port cannot be 0");
        }
        if self.osc.output_ip.is_empty() {
            anyhow::bail!("osc.output_ip cannot be empty");
        }
        if self.websocket.port == 0 && self.websocket.candidates.is_empty() {
            anyhow::bail!("websocket.port cannot be 0");
        }
        for url in &self.websocket.candidates {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                anyhow::bail!("websocket candidate '{}' must be a ws:// or wss:// URL", url);
            }
        }
        if let Some(startup) = &self.presets.startup {
            if startup.is_empty() {
                anyhow::bail!("presets.startup cannot be an empty name");
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_osc_input_port() -> u16 { 9000 }
fn default_osc_output_port() -> u16 { 1200 }
fn default_osc_output_ip() -> String { "127.0.0.1".to_string() }
fn default_ws_port() -> u16 { 8765 }
fn default_startup_preset() -> Option<String> { Some("Default".to_string()) }
fn default_log_level() -> String { "info".to_string() }
