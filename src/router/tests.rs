//! Tests for the event router

use super::*;
use crate::mapping::{LayerStack, MappingEntry};
use crate::preset::FsPresetStore;
use crate::wire::{OscSettings, SettingsPatch};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Recording sink standing in for the transport.
#[derive(Default)]
struct TestSink {
    sent: Mutex<Vec<ServerMessage>>,
}

impl TestSink {
    fn drain(&self) -> Vec<ServerMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl WireSink for TestSink {
    fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

fn test_settings() -> OscSettings {
    OscSettings {
        osc_output_ip: "10.0.0.5".to_string(),
        osc_output_port: 1200,
        osc_input_port: 9000,
    }
}

struct TestRig {
    _dir: TempDir,
    session: Arc<Session>,
    sink: Arc<TestSink>,
    router: EventRouter,
}

fn make_router() -> TestRig {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsPresetStore::new(dir.path().join("presets")));
    let session = Arc::new(Session::new(
        store,
        LayerStack::synthesize(),
        test_settings(),
    ));
    let sink = Arc::new(TestSink::default());
    let router = EventRouter::new(session.clone(), sink.clone());
    TestRig {
        _dir: dir,
        session,
        sink,
        router,
    }
}

/// The classic fader_1 binding: CC 7, full MIDI range onto [0, 1].
async fn bind_fader_1(session: &Session) {
    session
        .upsert_mapping(
            "fader_1".parse().unwrap(),
            MappingEntry {
                osc: Some("/channel/1/fader".to_string()),
                midi_cc: Some(7),
                ..MappingEntry::default()
            },
        )
        .await
        .unwrap();
}

fn cc(control: u8, value: u8) -> ClientMessage {
    ClientMessage::Midi {
        data: MidiData::ControlChange { control, value },
    }
}

#[tokio::test]
async fn test_inbound_cc_resolves_to_ui_update() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    let update = rig.router.handle_inbound(cc(7, 64)).unwrap();
    assert_eq!(update.channel, 1);
    assert_eq!(update.event, ControlKind::Fader);
    assert!((update.value - 0.504).abs() < 0.001);
}

#[tokio::test]
async fn test_inbound_cc_endpoints_hit_osc_range_exactly() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    assert_eq!(rig.router.handle_inbound(cc(7, 0)).unwrap().value, 0.0);
    assert_eq!(rig.router.handle_inbound(cc(7, 127)).unwrap().value, 1.0);
}

#[tokio::test]
async fn test_unmapped_inbound_is_dropped_silently() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    assert!(rig.router.handle_inbound(cc(99, 64)).is_none());
    assert!(rig
        .router
        .handle_inbound(ClientMessage::Osc {
            address: "/nowhere".to_string(),
            args: vec![1.0],
        })
        .is_none());

    // Dropped means dropped: nothing went out either
    rig.router.handle_message(cc(99, 64));
    assert!(rig.sink.drain().is_empty());
}

#[tokio::test]
async fn test_inbound_note_uses_velocity_and_note_off_zero() {
    let rig = make_router();
    // mute_1 is bound to note 16 in the default mapping

    let update = rig
        .router
        .handle_inbound(ClientMessage::Midi {
            data: MidiData::NoteOn {
                note: 16,
                velocity: 127,
            },
        })
        .unwrap();
    assert_eq!(update.event, ControlKind::Mute);
    assert_eq!(update.channel, 1);
    assert_eq!(update.value, 1.0);

    let update = rig
        .router
        .handle_inbound(ClientMessage::Midi {
            data: MidiData::NoteOff {
                note: 16,
                velocity: 0,
            },
        })
        .unwrap();
    assert_eq!(update.value, 0.0);
}

#[tokio::test]
async fn test_inbound_osc_converts_into_midi_range() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    // OSC inbound crosses over to the MIDI-range side
    let update = rig
        .router
        .handle_inbound(ClientMessage::Osc {
            address: "/channel/1/fader".to_string(),
            args: vec![0.5],
        })
        .unwrap();
    assert_eq!(update.channel, 1);
    assert_eq!(update.event, ControlKind::Fader);
    assert_eq!(update.value, 64.0); // round(0.5 * 127)
}

#[tokio::test]
async fn test_inbound_osc_without_args_reads_zero() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    let update = rig
        .router
        .handle_inbound(ClientMessage::Osc {
            address: "/channel/1/fader".to_string(),
            args: Vec::new(),
        })
        .unwrap();
    assert_eq!(update.value, 0.0);
}

#[tokio::test]
async fn test_handle_message_emits_ui_update() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    rig.router.handle_message(cc(7, 64));

    let sent = rig.sink.drain();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        ServerMessage::UiUpdate {
            channel,
            event,
            value,
        } => {
            assert_eq!(*channel, 1);
            assert_eq!(*event, ControlKind::Fader);
            assert!((value - 0.504).abs() < 0.001);
        },
        other => panic!("expected ui_update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_outbound_fader_builds_osc_with_output_target() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    rig.router.handle_message(ClientMessage::UiEvent {
        control: UiControl::Fader,
        channel: 1,
        name: None,
        value: 127.0,
    });

    let sent = rig.sink.drain();
    assert_eq!(
        sent,
        vec![ServerMessage::Osc {
            address: "/channel/1/fader".to_string(),
            args: vec![1.0],
            ip: "10.0.0.5".to_string(),
            port: 1200,
        }]
    );
}

#[tokio::test]
async fn test_outbound_unmapped_control_is_a_noop() {
    let rig = make_router();

    rig.router.handle_message(ClientMessage::UiEvent {
        control: UiControl::Fader,
        channel: 42,
        name: None,
        value: 64.0,
    });
    assert!(rig.sink.drain().is_empty());
}

#[tokio::test]
async fn test_outbound_midi_only_entry_builds_midi() {
    let rig = make_router();
    rig.session
        .upsert_mapping(
            "knob_2".parse().unwrap(),
            MappingEntry {
                midi_cc: Some(81),
                ..MappingEntry::default()
            },
        )
        .await
        .unwrap();

    rig.router.handle_message(ClientMessage::UiEvent {
        control: UiControl::Knob,
        channel: 2,
        name: None,
        value: 100.0,
    });

    assert_eq!(
        rig.sink.drain(),
        vec![ServerMessage::Midi {
            data: MidiData::ControlChange {
                control: 81,
                value: 100,
            }
        }]
    );
}

#[tokio::test]
async fn test_outbound_note_binding_encodes_on_off() {
    let rig = make_router();
    rig.session
        .upsert_mapping(
            "mute_3".parse().unwrap(),
            MappingEntry {
                midi_note: Some(18),
                ..MappingEntry::default()
            },
        )
        .await
        .unwrap();

    let press = ClientMessage::UiEvent {
        control: UiControl::Button,
        channel: 3,
        name: Some("mute".to_string()),
        value: 1.0,
    };
    let release = ClientMessage::UiEvent {
        control: UiControl::Button,
        channel: 3,
        name: Some("mute".to_string()),
        value: 0.0,
    };
    rig.router.handle_message(press);
    rig.router.handle_message(release);

    assert_eq!(
        rig.sink.drain(),
        vec![
            ServerMessage::Midi {
                data: MidiData::NoteOn {
                    note: 18,
                    velocity: 1,
                }
            },
            ServerMessage::Midi {
                data: MidiData::NoteOff {
                    note: 18,
                    velocity: 0,
                }
            },
        ]
    );
}

#[tokio::test]
async fn test_unknown_button_name_is_answered_with_error() {
    let rig = make_router();

    rig.router.handle_message(ClientMessage::UiEvent {
        control: UiControl::Button,
        channel: 1,
        name: Some("blast".to_string()),
        value: 1.0,
    });

    let sent = rig.sink.drain();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], ServerMessage::Error { .. }));
}

#[tokio::test]
async fn test_update_settings_is_acknowledged_and_applied() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    rig.router.handle_message(ClientMessage::UpdateSettings {
        settings: SettingsPatch {
            osc_output_ip: Some("192.168.1.20".to_string()),
            osc_output_port: Some(9001),
            ..SettingsPatch::default()
        },
    });

    let sent = rig.sink.drain();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        ServerMessage::SettingsUpdated { settings } => {
            assert_eq!(settings.osc_output_ip, "192.168.1.20");
            assert_eq!(settings.osc_output_port, 9001);
            assert_eq!(settings.osc_input_port, 9000);
        },
        other => panic!("expected settings_updated, got {:?}", other),
    }

    // Subsequent outbound OSC targets the new endpoint
    rig.router.handle_message(ClientMessage::UiEvent {
        control: UiControl::Fader,
        channel: 1,
        name: None,
        value: 0.0,
    });
    match &rig.sink.drain()[0] {
        ServerMessage::Osc { ip, port, .. } => {
            assert_eq!(ip, "192.168.1.20");
            assert_eq!(*port, 9001);
        },
        other => panic!("expected osc, got {:?}", other),
    }
}

#[tokio::test]
async fn test_layer_switch_takes_effect_for_the_next_message() {
    let rig = make_router();
    bind_fader_1(&rig.session).await;

    // A snapshot taken before the switch keeps resolving (in-flight work)
    let before = rig.session.active_snapshot();
    assert!(before.resolve_by_midi(MidiKind::ControlChange, 7).is_some());

    rig.session.add_layer(Some("Empty")).await;
    rig.session.set_active_layer(1).await.unwrap();

    // The next message resolves against the new (empty) layer
    assert!(rig.router.handle_inbound(cc(7, 64)).is_none());
    assert!(before.resolve_by_midi(MidiKind::ControlChange, 7).is_some());
}

#[tokio::test]
async fn test_notify_layer_change_shape() {
    let rig = make_router();
    rig.session.add_layer(Some("FX")).await;
    rig.session.set_active_layer(1).await.unwrap();
    rig.session
        .upsert_mapping(
            "fader_1".parse().unwrap(),
            MappingEntry::default(),
        )
        .await
        .unwrap();

    rig.router.notify_layer_change().await.unwrap();

    let sent = rig.sink.drain();
    match &sent[0] {
        ServerMessage::LayerChange {
            active_layer,
            layer_names,
            mapping_keys,
        } => {
            assert_eq!(active_layer, "FX");
            assert_eq!(layer_names.len(), 2);
            assert_eq!(mapping_keys, &vec!["fader_1".to_string()]);
        },
        other => panic!("expected layer_change, got {:?}", other),
    }
}
