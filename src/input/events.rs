//! Input event data structures

use serde::{Deserialize, Serialize};

/// A single input event produced by the UI side.
///
/// Mouse deltas are relative to the previous pointer position. Key codes are
/// the platform codes the emulated machine's keyboard map expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    /// Relative pointer movement
    MouseMove { dx: i32, dy: i32 },

    /// Primary button pressed
    MouseDown,

    /// Primary button released
    MouseUp,

    /// Touch began: move to the touch point, then press
    TouchStart { dx: i32, dy: i32 },

    /// Key pressed
    KeyDown {
        #[serde(rename = "keyCode")]
        key_code: i32,
    },

    /// Key released
    KeyUp {
        #[serde(rename = "keyCode")]
        key_code: i32,
    },

    /// Pause emulation (level-triggered)
    Stop,

    /// Resume emulation
    Start,
}

impl InputEvent {
    /// Whether this is a key-down or key-up event
    pub fn is_key(&self) -> bool {
        matches!(self, InputEvent::KeyDown { .. } | InputEvent::KeyUp { .. })
    }
}

/// Tri-state mouse button value as stored in the shared layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    /// No button transition this cycle (`-1`)
    #[default]
    Unchanged,
    /// Button released (`0`)
    Released,
    /// Button pressed (`1`)
    Pressed,
}

impl ButtonState {
    pub const fn to_raw(self) -> i32 {
        match self {
            ButtonState::Unchanged => -1,
            ButtonState::Released => 0,
            ButtonState::Pressed => 1,
        }
    }

    /// Decode a slot value. Anything other than 0 or 1 reads as unchanged.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ButtonState::Released,
            1 => ButtonState::Pressed,
            _ => ButtonState::Unchanged,
        }
    }
}

/// A key transition recorded in one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key_code: i32,
    pub pressed: bool,
}
