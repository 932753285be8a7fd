//! Emulator-side decoding of the input layout

use super::events::{ButtonState, KeyTransition};
use super::layout::{InputSlot, InputSlots};

/// Everything the emulator learns from one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSnapshot {
    /// Accumulated relative pointer movement, if any
    pub mouse_move: Option<(i32, i32)>,
    /// Button transition this cycle
    pub mouse_button: ButtonState,
    /// The single key transition carried this cycle
    pub key: Option<KeyTransition>,
    /// Current value of the level-triggered stop flag
    pub stopped: bool,
}

impl InputSnapshot {
    /// Whether the cycle carried any edge-triggered input
    pub fn has_input(&self) -> bool {
        self.mouse_move.is_some() || self.mouse_button != ButtonState::Unchanged || self.key.is_some()
    }
}

/// Read the layout and consume its edge-triggered slots.
///
/// The move and key flags are cleared so the next cycle starts empty. The
/// stop flag is level-triggered and is left as is.
pub fn read_input_snapshot<S>(view: &mut S) -> InputSnapshot
where
    S: InputSlots + ?Sized,
{
    let mouse_move = if view.read(InputSlot::MouseMoveFlag) != 0 {
        let delta = (
            view.read(InputSlot::MouseMoveXDelta),
            view.read(InputSlot::MouseMoveYDelta),
        );
        view.write(InputSlot::MouseMoveFlag, 0);
        view.write(InputSlot::MouseMoveXDelta, 0);
        view.write(InputSlot::MouseMoveYDelta, 0);
        Some(delta)
    } else {
        None
    };

    let mouse_button = ButtonState::from_raw(view.read(InputSlot::MouseButtonState));

    let key = if view.read(InputSlot::KeyEventFlag) != 0 {
        let key = KeyTransition {
            key_code: view.read(InputSlot::KeyCode),
            pressed: view.read(InputSlot::KeyState) == 1,
        };
        view.write(InputSlot::KeyEventFlag, 0);
        Some(key)
    } else {
        None
    };

    InputSnapshot {
        mouse_move,
        mouse_button,
        key,
        stopped: view.read(InputSlot::StopFlag) != 0,
    }
}
