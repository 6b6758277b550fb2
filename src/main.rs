//! XCTL GW - Rust implementation
//!
//! Gateway translating between a MIDI control surface, OSC targets, and the
//! XCTL web UI over a duplex WebSocket.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xctl_gw::config::{watcher::ConfigWatcher, AppConfig};
use xctl_gw::mapping::{default_layer, LayerStack, MidiBinding};
use xctl_gw::preset::{FsPresetStore, PresetStore};
use xctl_gw::router::EventRouter;
use xctl_gw::session::Session;
use xctl_gw::transport::{ConnectionState, TransportBridge};
use xctl_gw::wire::{ClientMessage, OscSettings, ServerMessage, SettingsPatch};

/// XCTL Gateway - translate between MIDI control surfaces and OSC targets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// WebSocket endpoint to connect to; repeat for an ordered failover list
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,

    /// List stored presets and exit
    #[arg(long)]
    list_presets: bool,

    /// Print the embedded default mapping and exit
    #[arg(long)]
    show_mapping: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = if Path::new(&args.config).exists() {
        AppConfig::load(&args.config).await?
    } else {
        AppConfig::default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&log_level)?;

    info!("Starting XCTL GW...");
    info!("Configuration file: {}", args.config);

    if args.show_mapping {
        show_default_mapping();
        return Ok(());
    }

    // Preset store
    let store = match &config.presets.root {
        Some(root) => FsPresetStore::new(root.clone()),
        None => FsPresetStore::default_location()?,
    };
    info!("Preset store: {}", store.root().display());

    if args.list_presets {
        for name in store.list().await? {
            println!("{}", name);
        }
        return Ok(());
    }

    store.ensure_default().await?;

    // Load the startup preset, or fall back to a fresh unsaved stack
    let stack = match config.presets.startup.as_deref() {
        Some(name) => match store.load(name).await {
            Ok(doc) => match LayerStack::from_layer_docs(name, doc.layers) {
                Ok(stack) => {
                    info!("Loaded startup preset '{}'", name);
                    stack
                },
                Err(e) => {
                    warn!("Startup preset '{}' is invalid ({}), starting fresh", name, e);
                    LayerStack::synthesize()
                },
            },
            Err(e) => {
                warn!("Startup preset '{}' unavailable ({}), starting fresh", name, e);
                LayerStack::synthesize()
            },
        },
        None => LayerStack::synthesize(),
    };

    let session = Arc::new(Session::new(
        Arc::new(store),
        stack,
        OscSettings::from(&config.osc),
    ));

    // Transport over the ordered candidate list
    let candidates = if args.endpoints.is_empty() {
        config.websocket.candidate_urls()
    } else {
        args.endpoints.clone()
    };
    info!("Transport candidates: {:?}", candidates);
    let bridge = TransportBridge::new(candidates);

    let router = Arc::new(EventRouter::new(session.clone(), Arc::new(bridge.clone())));

    // Config hot-reload (only when a config file actually exists)
    let config_watcher = if Path::new(&args.config).exists() {
        let (watcher, _initial) = ConfigWatcher::new(args.config.clone()).await?;
        Some(watcher)
    } else {
        None
    };

    let shutdown_signal = shutdown_signal();

    run_app(router, session, bridge, config_watcher, shutdown_signal).await?;

    info!("XCTL GW shutdown complete");
    Ok(())
}

async fn run_app(
    router: Arc<EventRouter>,
    session: Arc<Session>,
    bridge: TransportBridge,
    mut config_watcher: Option<ConfigWatcher>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("Starting main event loop...");

    // Funnel transport callbacks into the single event loop
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ClientMessage>();
    bridge.on_message(Arc::new(move |msg| {
        let _ = msg_tx.send(msg);
    }));

    let (state_tx, mut state_rx) = mpsc::unbounded_channel::<ConnectionState>();
    bridge.on_state_change(Arc::new(move |state| {
        let _ = state_tx.send(state);
    }));

    match bridge.connect().await {
        Ok(()) => {},
        Err(e) => {
            warn!("Initial connect failed ({}), retrying in the background", e);
            bridge.spawn_reconnect();
        },
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Inbound wire messages, strictly in arrival order
            Some(msg) = msg_rx.recv() => {
                router.handle_message(msg);
            }

            // Connection-state changes
            Some(state) = state_rx.recv() => {
                match state {
                    ConnectionState::Connected { endpoint } => {
                        info!("Transport up on {}", endpoint);
                        // Re-sync the UI with the current stack shape
                        if let Err(e) = router.notify_layer_change().await {
                            warn!("Failed to push layer state after connect: {}", e);
                        }
                    }
                    ConnectionState::Error { reason } => {
                        warn!("Transport error: {}", reason);
                    }
                    other => debug!("Transport state: {:?}", other),
                }
            }

            // Config hot-reload
            Some(new_config) = next_config(&mut config_watcher) => {
                info!("📝 Configuration file changed, applying OSC settings...");
                let patch = SettingsPatch {
                    osc_output_ip: Some(new_config.osc.output_ip.clone()),
                    osc_output_port: Some(new_config.osc.output_port),
                    osc_input_port: Some(new_config.osc.input_port),
                };
                let (effective, changed) = session.update_settings(&patch);
                if changed {
                    if let Err(e) = bridge.send(&ServerMessage::SettingsUpdated { settings: effective }) {
                        debug!("Could not push settings to the UI: {}", e);
                    }
                }
                // Endpoint changes need a restart; flag them rather than juggling sockets
                if new_config.websocket.candidate_urls() != bridge.candidates() {
                    info!("WebSocket candidate changes take effect on restart");
                }
            }

            // Shutdown signal
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    bridge.shutdown();
    Ok(())
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher.as_mut() {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}

fn show_default_mapping() {
    use colored::*;

    println!("\n{}", "=== Embedded Default Mapping ===".bold().cyan());

    let layer = default_layer("Layer 1");
    println!(
        "\n  Total controls: {}\n",
        layer.len().to_string().green()
    );

    println!(
        "  {:<12} {:<10} {}",
        "KEY".bold(),
        "MIDI".bold(),
        "OSC ADDRESS".bold()
    );
    for (key, entry) in layer.list() {
        let midi = match entry.midi_binding() {
            Some(MidiBinding::Cc(cc)) => format!("cc={}", cc),
            Some(MidiBinding::Note(note)) => format!("note={}", note),
            None => "-".to_string(),
        };
        println!(
            "  {:<12} {:<10} {}",
            key.to_string().yellow(),
            midi.green(),
            entry.osc_address().unwrap_or("-")
        );
    }

    println!("\n{}", "✅ Mapping dump complete".green().bold());
}
