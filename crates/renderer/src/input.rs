//! Keyboard and pointer state fed by window events.
//!
//! The window runtime forwards raw winit events here; the frame loop only ever
//! sees the derived [`MovementIntent`] and an accumulated pointer delta.

use std::collections::{HashMap, HashSet};
use std::fmt;

use glam::Vec2;
use thiserror::Error;
use winit::keyboard::KeyCode;

use crate::camera::MovementIntent;

/// Logical actions a physical key can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Forward,
    Backward,
    StrafeLeft,
    StrafeRight,
    Ascend,
    Descend,
    ToggleLook,
    Quit,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Forward,
        Action::Backward,
        Action::StrafeLeft,
        Action::StrafeRight,
        Action::Ascend,
        Action::Descend,
        Action::ToggleLook,
        Action::Quit,
    ];

    /// Name used for this action in configuration files.
    pub fn config_name(self) -> &'static str {
        match self {
            Action::Forward => "forward",
            Action::Backward => "backward",
            Action::StrafeLeft => "left",
            Action::StrafeRight => "right",
            Action::Ascend => "up",
            Action::Descend => "down",
            Action::ToggleLook => "toggle_look",
            Action::Quit => "quit",
        }
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.config_name() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("unknown key name '{key}' for action '{action}'")]
    UnknownKey { action: Action, key: String },
    #[error("key '{key}' is bound to both '{first}' and '{second}'")]
    Conflict {
        key: String,
        first: Action,
        second: Action,
    },
}

/// Physical key to logical action mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindings {
    by_key: HashMap<KeyCode, Action>,
}

impl KeyBindings {
    pub fn empty() -> Self {
        Self {
            by_key: HashMap::new(),
        }
    }

    /// Builds bindings from `(action name, key name)` pairs as they appear in
    /// the `[input]` table.
    pub fn from_names<'a, I>(pairs: I) -> Result<Self, BindingError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut bindings = Self::empty();
        for (action_name, key_name) in pairs {
            let action = Action::from_config_name(action_name)
                .ok_or_else(|| BindingError::UnknownAction(action_name.to_string()))?;
            let key = parse_key_code(key_name).ok_or_else(|| BindingError::UnknownKey {
                action,
                key: key_name.to_string(),
            })?;
            if let Some(existing) = bindings.action_for(key) {
                if existing != action {
                    return Err(BindingError::Conflict {
                        key: key_name.to_string(),
                        first: existing,
                        second: action,
                    });
                }
            }
            bindings.bind(key, action);
        }
        Ok(bindings)
    }

    /// Binds `key` to `action`, replacing any previous action for that key.
    pub fn bind(&mut self, key: KeyCode, action: Action) {
        self.by_key.insert(key, action);
    }

    pub fn action_for(&self, key: KeyCode) -> Option<Action> {
        self.by_key.get(&key).copied()
    }

    pub fn keys_for(&self, action: Action) -> impl Iterator<Item = KeyCode> + '_ {
        self.by_key
            .iter()
            .filter(move |(_, bound)| **bound == action)
            .map(|(key, _)| *key)
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut bindings = Self::empty();
        bindings.bind(KeyCode::KeyW, Action::Forward);
        bindings.bind(KeyCode::KeyS, Action::Backward);
        bindings.bind(KeyCode::KeyA, Action::StrafeLeft);
        bindings.bind(KeyCode::KeyD, Action::StrafeRight);
        bindings.bind(KeyCode::Space, Action::Ascend);
        bindings.bind(KeyCode::ControlLeft, Action::Descend);
        bindings.bind(KeyCode::KeyQ, Action::ToggleLook);
        bindings.bind(KeyCode::Escape, Action::Quit);
        bindings
    }
}

/// Parses the winit `KeyCode` variant name (`"KeyW"`, `"Space"`,
/// `"ControlLeft"`, `"ArrowUp"`, `"F5"`, ...).
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let name = name.trim();
    if let Some(letter) = name.strip_prefix("Key") {
        return letter_key(letter);
    }
    if let Some(digit) = name.strip_prefix("Digit") {
        return digit_key(digit);
    }
    if let Some(number) = name.strip_prefix('F') {
        if let Ok(index) = number.parse::<u8>() {
            return function_key(index);
        }
    }

    let key = match name {
        "Space" => KeyCode::Space,
        "Enter" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "Escape" => KeyCode::Escape,
        "Backspace" => KeyCode::Backspace,
        "ShiftLeft" => KeyCode::ShiftLeft,
        "ShiftRight" => KeyCode::ShiftRight,
        "ControlLeft" => KeyCode::ControlLeft,
        "ControlRight" => KeyCode::ControlRight,
        "AltLeft" => KeyCode::AltLeft,
        "AltRight" => KeyCode::AltRight,
        "ArrowUp" => KeyCode::ArrowUp,
        "ArrowDown" => KeyCode::ArrowDown,
        "ArrowLeft" => KeyCode::ArrowLeft,
        "ArrowRight" => KeyCode::ArrowRight,
        "PageUp" => KeyCode::PageUp,
        "PageDown" => KeyCode::PageDown,
        "Home" => KeyCode::Home,
        "End" => KeyCode::End,
        "Insert" => KeyCode::Insert,
        "Delete" => KeyCode::Delete,
        "Minus" => KeyCode::Minus,
        "Equal" => KeyCode::Equal,
        "Comma" => KeyCode::Comma,
        "Period" => KeyCode::Period,
        "Slash" => KeyCode::Slash,
        "Semicolon" => KeyCode::Semicolon,
        "Quote" => KeyCode::Quote,
        "Backquote" => KeyCode::Backquote,
        "BracketLeft" => KeyCode::BracketLeft,
        "BracketRight" => KeyCode::BracketRight,
        "Backslash" => KeyCode::Backslash,
        _ => return None,
    };
    Some(key)
}

fn letter_key(letter: &str) -> Option<KeyCode> {
    let key = match letter {
        "A" => KeyCode::KeyA,
        "B" => KeyCode::KeyB,
        "C" => KeyCode::KeyC,
        "D" => KeyCode::KeyD,
        "E" => KeyCode::KeyE,
        "F" => KeyCode::KeyF,
        "G" => KeyCode::KeyG,
        "H" => KeyCode::KeyH,
        "I" => KeyCode::KeyI,
        "J" => KeyCode::KeyJ,
        "K" => KeyCode::KeyK,
        "L" => KeyCode::KeyL,
        "M" => KeyCode::KeyM,
        "N" => KeyCode::KeyN,
        "O" => KeyCode::KeyO,
        "P" => KeyCode::KeyP,
        "Q" => KeyCode::KeyQ,
        "R" => KeyCode::KeyR,
        "S" => KeyCode::KeyS,
        "T" => KeyCode::KeyT,
        "U" => KeyCode::KeyU,
        "V" => KeyCode::KeyV,
        "W" => KeyCode::KeyW,
        "X" => KeyCode::KeyX,
        "Y" => KeyCode::KeyY,
        "Z" => KeyCode::KeyZ,
        _ => return None,
    };
    Some(key)
}

fn digit_key(digit: &str) -> Option<KeyCode> {
    let key = match digit {
        "0" => KeyCode::Digit0,
        "1" => KeyCode::Digit1,
        "2" => KeyCode::Digit2,
        "3" => KeyCode::Digit3,
        "4" => KeyCode::Digit4,
        "5" => KeyCode::Digit5,
        "6" => KeyCode::Digit6,
        "7" => KeyCode::Digit7,
        "8" => KeyCode::Digit8,
        "9" => KeyCode::Digit9,
        _ => return None,
    };
    Some(key)
}

fn function_key(index: u8) -> Option<KeyCode> {
    let key = match index {
        1 => KeyCode::F1,
        2 => KeyCode::F2,
        3 => KeyCode::F3,
        4 => KeyCode::F4,
        5 => KeyCode::F5,
        6 => KeyCode::F6,
        7 => KeyCode::F7,
        8 => KeyCode::F8,
        9 => KeyCode::F9,
        10 => KeyCode::F10,
        11 => KeyCode::F11,
        12 => KeyCode::F12,
        _ => return None,
    };
    Some(key)
}

/// Instantaneous key-down state and pointer travel since the last frame.
#[derive(Debug, Default)]
pub struct InputState {
    held: HashSet<Action>,
    pointer: Option<Vec2>,
    pointer_delta: Vec2,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key transition. Returns the action the key maps to, if any.
    pub fn handle_key(&mut self, bindings: &KeyBindings, key: KeyCode, pressed: bool) -> Option<Action> {
        let action = bindings.action_for(key)?;
        if pressed {
            self.held.insert(action);
        } else {
            self.held.remove(&action);
        }
        Some(action)
    }

    /// Records a pointer position in window-local pixels.
    ///
    /// With an `anchor` (look mode, where the pointer is recentered every
    /// frame) the delta is the latest offset from the anchor, replacing
    /// whatever earlier events this frame reported; otherwise travel from the
    /// previous position accumulates.
    pub fn handle_pointer(&mut self, position: Vec2, anchor: Option<Vec2>) {
        match anchor {
            Some(anchor) => self.pointer_delta = position - anchor,
            None => {
                let origin = self.pointer.unwrap_or(position);
                self.pointer_delta += position - origin;
            }
        }
        self.pointer = Some(position);
    }

    pub fn is_held(&self, action: Action) -> bool {
        self.held.contains(&action)
    }

    pub fn quit_requested(&self) -> bool {
        self.is_held(Action::Quit)
    }

    pub fn pointer(&self) -> Option<Vec2> {
        self.pointer
    }

    /// Forgets held keys, e.g. when the window loses focus.
    pub fn release_all(&mut self) {
        self.held.clear();
    }

    pub fn movement_intent(&self) -> MovementIntent {
        MovementIntent {
            forward: self.is_held(Action::Forward),
            backward: self.is_held(Action::Backward),
            strafe_left: self.is_held(Action::StrafeLeft),
            strafe_right: self.is_held(Action::StrafeRight),
            ascend: self.is_held(Action::Ascend),
            descend: self.is_held(Action::Descend),
            toggle_look: self.is_held(Action::ToggleLook),
        }
    }

    /// Returns the pointer travel accumulated since the previous call.
    pub fn take_pointer_delta(&mut self) -> Vec2 {
        std::mem::take(&mut self.pointer_delta)
    }

    /// Moves the remembered pointer after the window warped the cursor.
    pub fn recentered(&mut self, center: Vec2) {
        self.pointer = Some(center);
    }
}
