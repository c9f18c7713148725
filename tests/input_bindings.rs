use std::io::Write;
use tempfile::NamedTempFile;
use vat_player::input::{Input, InputEvent, PlayerAction};
use winit::keyboard::{Key, NamedKey};

fn press(key: Key) -> InputEvent {
    InputEvent::Key { key, pressed: true, repeat: false }
}

#[test]
fn remapped_transport_keys_override_defaults() {
    let mut temp = NamedTempFile::new().expect("temp input config");
    write!(temp, r#"{{"bindings":{{"toggle_playback":["k"],"reload_assets":["enter"]}}}}"#)
        .expect("write remap config");

    let mut input = Input::from_config(temp.path());
    assert!(input.take_actions().is_empty(), "no events yet");

    input.push(press(Key::Character("k".into())));
    assert_eq!(input.take_actions(), vec![PlayerAction::TogglePlayback]);

    input.push(press(Key::Named(NamedKey::Space)));
    assert!(input.take_actions().is_empty(), "default key no longer fires once remapped");

    input.push(press(Key::Named(NamedKey::Enter)));
    input.push(press(Key::Character("l".into())));
    assert_eq!(input.take_actions(), vec![PlayerAction::ReloadAssets]);

    input.push(press(Key::Character("d".into())));
    assert_eq!(input.take_actions(), vec![PlayerAction::CycleDebugMode], "untouched bindings keep defaults");
}

#[test]
fn unreadable_bindings_fall_back_to_defaults() {
    let mut temp = NamedTempFile::new().expect("temp input config");
    write!(temp, "not json").expect("write config");
    let mut input = Input::from_config(temp.path());
    input.push(press(Key::Named(NamedKey::Space)));
    assert_eq!(input.take_actions(), vec![PlayerAction::TogglePlayback]);
}
