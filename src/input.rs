use glam::Vec2;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use winit::event::{DeviceEvent, ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key, NamedKey};

pub const DEFAULT_INPUT_PATH: &str = "config/input.json";

/// Discrete commands the player reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerAction {
    TogglePlayback,
    Reset,
    ToggleFlipV,
    ToggleOffset,
    ToggleNormalTexture,
    CycleDebugMode,
    CycleEncoding,
    ToggleInstancing,
    FewerInstances,
    MoreInstances,
    SlowDown,
    SpeedUp,
    FrameCamera,
    ReloadAssets,
    Quit,
}

impl PlayerAction {
    const ALL: [PlayerAction; 15] = [
        Self::TogglePlayback,
        Self::Reset,
        Self::ToggleFlipV,
        Self::ToggleOffset,
        Self::ToggleNormalTexture,
        Self::CycleDebugMode,
        Self::CycleEncoding,
        Self::ToggleInstancing,
        Self::FewerInstances,
        Self::MoreInstances,
        Self::SlowDown,
        Self::SpeedUp,
        Self::FrameCamera,
        Self::ReloadAssets,
        Self::Quit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::TogglePlayback => "toggle_playback",
            Self::Reset => "reset",
            Self::ToggleFlipV => "toggle_flip_v",
            Self::ToggleOffset => "toggle_offset",
            Self::ToggleNormalTexture => "toggle_normal_texture",
            Self::CycleDebugMode => "cycle_debug_mode",
            Self::CycleEncoding => "cycle_encoding",
            Self::ToggleInstancing => "toggle_instancing",
            Self::FewerInstances => "fewer_instances",
            Self::MoreInstances => "more_instances",
            Self::SlowDown => "slow_down",
            Self::SpeedUp => "speed_up",
            Self::FrameCamera => "frame_camera",
            Self::ReloadAssets => "reload_assets",
            Self::Quit => "quit",
        }
    }

    fn from_name(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == value)
    }
}

/// Per-frame input state: queued actions, orbit drag and wheel zoom.
pub struct Input {
    bindings: InputBindings,
    actions: Vec<PlayerAction>,
    drag: Vec2,
    wheel: f32,
    orbiting: bool,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(path: impl AsRef<Path>) -> Self {
        Self::with_bindings(InputBindings::load_or_default(path))
    }

    fn with_bindings(bindings: InputBindings) -> Self {
        Self { bindings, actions: Vec::new(), drag: Vec2::ZERO, wheel: 0.0, orbiting: false }
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed, repeat } => {
                if pressed && !repeat {
                    if let Some(binding) = InputKeyBinding::from_event_key(&key) {
                        self.actions.extend(self.bindings.actions_for_key(&binding));
                    }
                }
            }
            InputEvent::MouseMove { dx, dy } => {
                if self.orbiting {
                    self.drag += Vec2::new(dx, dy);
                }
            }
            InputEvent::Wheel { delta } => self.wheel += delta,
            InputEvent::MouseButton { button: MouseButton::Left, pressed } => self.orbiting = pressed,
            InputEvent::MouseButton { .. } | InputEvent::Other => {}
        }
    }

    pub fn take_actions(&mut self) -> Vec<PlayerAction> {
        std::mem::take(&mut self.actions)
    }

    /// Mouse motion accumulated while the left button was held.
    pub fn take_drag(&mut self) -> Option<Vec2> {
        let drag = std::mem::replace(&mut self.drag, Vec2::ZERO);
        (drag != Vec2::ZERO).then_some(drag)
    }

    pub fn take_wheel(&mut self) -> Option<f32> {
        let wheel = std::mem::replace(&mut self.wheel, 0.0);
        (wheel.abs() > 0.0).then_some(wheel)
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::with_bindings(InputBindings::default())
    }
}

#[derive(Debug, Clone)]
struct InputBindings {
    key_to_actions: HashMap<InputKeyBinding, Vec<PlayerAction>>,
}

impl InputBindings {
    fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<InputConfigFile>(&contents) {
                Ok(config) => Self::with_overrides(config.into_overrides(&path.display().to_string())),
                Err(err) => {
                    tracing::warn!("Failed to parse {}: {err}. Using default bindings.", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("Failed to read {}: {err}. Using default bindings.", path.display());
                Self::default()
            }
        }
    }

    fn with_overrides(overrides: HashMap<PlayerAction, Vec<InputKeyBinding>>) -> Self {
        let mut action_map = Self::default_action_map();
        for (action, keys) in overrides {
            if !keys.is_empty() {
                action_map.insert(action, keys);
            }
        }
        Self::from_action_map(action_map)
    }

    fn default_action_map() -> HashMap<PlayerAction, Vec<InputKeyBinding>> {
        use PlayerAction::*;
        let mut map = HashMap::new();
        map.insert(TogglePlayback, vec![InputKeyBinding::Named(NamedKeyCode::Space)]);
        map.insert(Reset, vec![InputKeyBinding::character("r")]);
        map.insert(ToggleFlipV, vec![InputKeyBinding::character("f")]);
        map.insert(ToggleOffset, vec![InputKeyBinding::character("o")]);
        map.insert(ToggleNormalTexture, vec![InputKeyBinding::character("n")]);
        map.insert(CycleDebugMode, vec![InputKeyBinding::character("d")]);
        map.insert(CycleEncoding, vec![InputKeyBinding::character("p")]);
        map.insert(ToggleInstancing, vec![InputKeyBinding::character("i")]);
        map.insert(FewerInstances, vec![InputKeyBinding::character("[")]);
        map.insert(MoreInstances, vec![InputKeyBinding::character("]")]);
        map.insert(SlowDown, vec![InputKeyBinding::character("-")]);
        map.insert(SpeedUp, vec![InputKeyBinding::character("="), InputKeyBinding::character("+")]);
        map.insert(FrameCamera, vec![InputKeyBinding::character("c")]);
        map.insert(ReloadAssets, vec![InputKeyBinding::character("l")]);
        map.insert(Quit, vec![InputKeyBinding::Named(NamedKeyCode::Escape)]);
        map
    }

    fn from_action_map(action_map: HashMap<PlayerAction, Vec<InputKeyBinding>>) -> Self {
        let mut key_to_actions: HashMap<InputKeyBinding, Vec<PlayerAction>> = HashMap::new();
        for (action, keys) in action_map {
            for key in keys {
                key_to_actions.entry(key).or_default().push(action);
            }
        }
        Self { key_to_actions }
    }

    fn actions_for_key(&self, key: &InputKeyBinding) -> impl Iterator<Item = PlayerAction> + '_ {
        self.key_to_actions.get(key).into_iter().flatten().copied()
    }
}

impl Default for InputBindings {
    fn default() -> Self {
        Self::from_action_map(Self::default_action_map())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InputKeyBinding {
    Character(String),
    Named(NamedKeyCode),
}

impl InputKeyBinding {
    fn character(ch: &str) -> Self {
        Self::Character(ch.to_lowercase())
    }

    fn from_event_key(key: &Key) -> Option<Self> {
        match key {
            Key::Character(ch) if !ch.is_empty() => Some(Self::Character(ch.to_lowercase())),
            Key::Named(named) => NamedKeyCode::from_named_key(named).map(Self::Named),
            _ => None,
        }
    }

    fn from_config_value(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if let Some(named) = NamedKeyCode::from_name(&normalized) {
            return Some(Self::Named(named));
        }
        (normalized.chars().count() == 1).then_some(Self::Character(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NamedKeyCode {
    Space,
    Escape,
    Enter,
    Tab,
}

impl NamedKeyCode {
    fn from_named_key(key: &NamedKey) -> Option<Self> {
        match key {
            NamedKey::Space => Some(Self::Space),
            NamedKey::Escape => Some(Self::Escape),
            NamedKey::Enter => Some(Self::Enter),
            NamedKey::Tab => Some(Self::Tab),
            _ => None,
        }
    }

    fn from_name(value: &str) -> Option<Self> {
        match value {
            "space" => Some(Self::Space),
            "escape" | "esc" => Some(Self::Escape),
            "enter" | "return" => Some(Self::Enter),
            "tab" => Some(Self::Tab),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InputConfigFile {
    #[serde(default)]
    bindings: HashMap<String, Vec<String>>,
}

impl InputConfigFile {
    fn into_overrides(self, origin: &str) -> HashMap<PlayerAction, Vec<InputKeyBinding>> {
        let mut overrides = HashMap::new();
        for (action_name, keys) in self.bindings {
            let Some(action) = PlayerAction::from_name(&action_name.trim().to_lowercase()) else {
                tracing::warn!("{origin}: unknown action '{action_name}', ignoring.");
                continue;
            };
            let mut parsed = Vec::new();
            for key in keys {
                match InputKeyBinding::from_config_value(&key) {
                    Some(binding) => parsed.push(binding),
                    None => {
                        tracing::warn!("{origin}: unknown key '{key}' for action '{action_name}', ignoring.")
                    }
                }
            }
            if parsed.is_empty() {
                tracing::warn!("{origin}: action '{action_name}' has no valid keys, keeping defaults.");
                continue;
            }
            overrides.insert(action, parsed);
        }
        overrides
    }
}

pub enum InputEvent {
    Key { key: Key, pressed: bool, repeat: bool },
    MouseMove { dx: f32, dy: f32 },
    Wheel { delta: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    Other,
}

impl InputEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::MouseWheel { delta, .. } => {
                let d = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => (p.y / 40.0) as f32,
                };
                InputEvent::Wheel { delta: d }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                InputEvent::MouseButton { button: *button, pressed: *state == ElementState::Pressed }
            }
            WindowEvent::KeyboardInput { event, .. } => InputEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
                repeat: event.repeat,
            },
            _ => InputEvent::Other,
        }
    }

    pub fn from_device_event(ev: &DeviceEvent) -> Self {
        match ev {
            DeviceEvent::MouseMotion { delta: (dx, dy) } => {
                InputEvent::MouseMove { dx: *dx as f32, dy: *dy as f32 }
            }
            _ => InputEvent::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ch: &str) -> InputEvent {
        InputEvent::Key { key: Key::Character(ch.into()), pressed: true, repeat: false }
    }

    #[test]
    fn default_bindings_map_player_keys() {
        let mut input = Input::new();
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Space), pressed: true, repeat: false });
        input.push(key("F"));
        input.push(key("]"));
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Escape), pressed: true, repeat: false });
        assert_eq!(
            input.take_actions(),
            vec![
                PlayerAction::TogglePlayback,
                PlayerAction::ToggleFlipV,
                PlayerAction::MoreInstances,
                PlayerAction::Quit
            ]
        );
        assert!(input.take_actions().is_empty());
    }

    #[test]
    fn releases_and_repeats_do_not_fire() {
        let mut input = Input::new();
        input.push(InputEvent::Key { key: Key::Character("r".into()), pressed: false, repeat: false });
        input.push(InputEvent::Key { key: Key::Character("r".into()), pressed: true, repeat: true });
        assert!(input.take_actions().is_empty());
    }

    #[test]
    fn drag_only_accumulates_while_left_button_held() {
        let mut input = Input::new();
        input.push(InputEvent::MouseMove { dx: 5.0, dy: 1.0 });
        assert_eq!(input.take_drag(), None);
        input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: true });
        input.push(InputEvent::MouseMove { dx: 5.0, dy: 1.0 });
        input.push(InputEvent::MouseMove { dx: -2.0, dy: 1.0 });
        assert_eq!(input.take_drag(), Some(Vec2::new(3.0, 2.0)));
        input.push(InputEvent::Wheel { delta: 1.5 });
        assert_eq!(input.take_wheel(), Some(1.5));
        assert_eq!(input.take_wheel(), None);
    }

    #[test]
    fn config_overrides_replace_default_keys() {
        let config: InputConfigFile = serde_json::from_str(
            r#"{"bindings": {"toggle_playback": ["k"], "bogus_action": ["x"], "reset": ["not-a-key"]}}"#,
        )
        .expect("parse bindings");
        let bindings = InputBindings::with_overrides(config.into_overrides("test"));
        let mut input = Input::with_bindings(bindings);
        input.push(key("k"));
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Space), pressed: true, repeat: false });
        input.push(key("r"));
        assert_eq!(input.take_actions(), vec![PlayerAction::TogglePlayback, PlayerAction::Reset]);
    }

    #[test]
    fn missing_bindings_file_uses_defaults() {
        let mut input = Input::from_config("does/not/exist.json");
        input.push(key("l"));
        assert_eq!(input.take_actions(), vec![PlayerAction::ReloadAssets]);
    }
}
