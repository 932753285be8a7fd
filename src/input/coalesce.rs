//! Input coalescing.
//!
//! Each sync cycle the pending UI events are folded into at most one
//! snapshot of the input layout. Events that cannot be represented in this
//! cycle are handed back, in order, for the next one.

use tracing::debug;

use super::events::{ButtonState, InputEvent, KeyTransition};
use super::layout::{InputSlot, InputSlots};

/// Fold `events` into `view` and return the events deferred to the next cycle.
///
/// - `TouchStart` accumulates its delta and defers a synthetic `MouseDown`,
///   so the pointer arrives before the press is seen (otherwise the guest
///   interprets the touch as a drag).
/// - Only the first `MouseMove` is applied; later moves in the same batch are
///   dropped, not deferred.
/// - Button events overwrite each other; the last one wins.
/// - Only the first key event is recorded; the rest are deferred.
/// - `Start` is written after `Stop`, so it wins when both are present.
pub fn update_input_buffer_with_events<S>(events: &[InputEvent], view: &mut S) -> Vec<InputEvent>
where
    S: InputSlots + ?Sized,
{
    let mut has_mouse_move = false;
    let mut mouse_move_x = 0i32;
    let mut mouse_move_y = 0i32;
    let mut mouse_button = ButtonState::Unchanged;
    let mut key: Option<KeyTransition> = None;
    let mut has_stop = false;
    let mut has_start = false;
    let mut remaining = Vec::new();

    for event in events {
        match *event {
            InputEvent::TouchStart { dx, dy } => {
                has_mouse_move = true;
                mouse_move_x = mouse_move_x.wrapping_add(dx);
                mouse_move_y = mouse_move_y.wrapping_add(dy);
                remaining.push(InputEvent::MouseDown);
            }
            InputEvent::MouseMove { dx, dy } => {
                if has_mouse_move {
                    continue;
                }
                has_mouse_move = true;
                mouse_move_x = mouse_move_x.wrapping_add(dx);
                mouse_move_y = mouse_move_y.wrapping_add(dy);
            }
            InputEvent::MouseDown => mouse_button = ButtonState::Pressed,
            InputEvent::MouseUp => mouse_button = ButtonState::Released,
            InputEvent::KeyDown { key_code } | InputEvent::KeyUp { key_code } => {
                if key.is_some() {
                    remaining.push(*event);
                    continue;
                }
                key = Some(KeyTransition {
                    key_code,
                    pressed: matches!(event, InputEvent::KeyDown { .. }),
                });
            }
            InputEvent::Stop => has_stop = true,
            InputEvent::Start => has_start = true,
        }
    }

    if has_mouse_move {
        view.write(InputSlot::MouseMoveFlag, 1);
        view.write(InputSlot::MouseMoveXDelta, mouse_move_x);
        view.write(InputSlot::MouseMoveYDelta, mouse_move_y);
    }
    view.write(InputSlot::MouseButtonState, mouse_button.to_raw());
    if let Some(key) = key {
        view.write(InputSlot::KeyEventFlag, 1);
        view.write(InputSlot::KeyCode, key.key_code);
        view.write(InputSlot::KeyState, i32::from(key.pressed));
    }
    if has_stop {
        view.write(InputSlot::StopFlag, 1);
    }
    if has_start {
        view.write(InputSlot::StopFlag, 0);
    }

    if !remaining.is_empty() {
        debug!(
            "Coalesced {} input events, deferring {}",
            events.len(),
            remaining.len()
        );
    }

    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::layout::INPUT_BUFFER_SLOTS;

    fn blank() -> [i32; INPUT_BUFFER_SLOTS] {
        [0; INPUT_BUFFER_SLOTS]
    }

    #[test]
    fn test_empty_batch_writes_button_sentinel() {
        let mut view = blank();
        let leftover = update_input_buffer_with_events(&[], &mut view);
        assert!(leftover.is_empty());
        assert_eq!(view.read(InputSlot::MouseButtonState), -1);
        assert_eq!(view.read(InputSlot::MouseMoveFlag), 0);
        assert_eq!(view.read(InputSlot::KeyEventFlag), 0);
    }

    #[test]
    fn test_touchstart_defers_mousedown() {
        let mut view = blank();
        let leftover =
            update_input_buffer_with_events(&[InputEvent::TouchStart { dx: 5, dy: 7 }], &mut view);
        assert_eq!(view.read(InputSlot::MouseMoveFlag), 1);
        assert_eq!(view.read(InputSlot::MouseMoveXDelta), 5);
        assert_eq!(view.read(InputSlot::MouseMoveYDelta), 7);
        assert_eq!(view.read(InputSlot::MouseButtonState), -1);
        assert_eq!(leftover, vec![InputEvent::MouseDown]);
    }

    #[test]
    fn test_second_mousemove_dropped() {
        let mut view = blank();
        let leftover = update_input_buffer_with_events(
            &[
                InputEvent::MouseMove { dx: 1, dy: 2 },
                InputEvent::MouseMove { dx: 10, dy: 20 },
            ],
            &mut view,
        );
        assert_eq!(view.read(InputSlot::MouseMoveXDelta), 1);
        assert_eq!(view.read(InputSlot::MouseMoveYDelta), 2);
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_touchstart_after_move_still_accumulates() {
        let mut view = blank();
        let leftover = update_input_buffer_with_events(
            &[
                InputEvent::MouseMove { dx: 1, dy: 1 },
                InputEvent::TouchStart { dx: 2, dy: 3 },
                InputEvent::MouseMove { dx: 100, dy: 100 },
            ],
            &mut view,
        );
        assert_eq!(view.read(InputSlot::MouseMoveXDelta), 3);
        assert_eq!(view.read(InputSlot::MouseMoveYDelta), 4);
        assert_eq!(leftover, vec![InputEvent::MouseDown]);
    }

    #[test]
    fn test_last_button_event_wins() {
        let mut view = blank();
        update_input_buffer_with_events(&[InputEvent::MouseDown, InputEvent::MouseUp], &mut view);
        assert_eq!(view.read(InputSlot::MouseButtonState), 0);

        update_input_buffer_with_events(&[InputEvent::MouseUp, InputEvent::MouseDown], &mut view);
        assert_eq!(view.read(InputSlot::MouseButtonState), 1);
    }

    #[test]
    fn test_extra_key_events_deferred_in_order() {
        let mut view = blank();
        let leftover = update_input_buffer_with_events(
            &[
                InputEvent::KeyDown { key_code: 10 },
                InputEvent::MouseMove { dx: 1, dy: 1 },
                InputEvent::KeyUp { key_code: 10 },
                InputEvent::KeyDown { key_code: 11 },
            ],
            &mut view,
        );
        assert_eq!(view.read(InputSlot::KeyEventFlag), 1);
        assert_eq!(view.read(InputSlot::KeyCode), 10);
        assert_eq!(view.read(InputSlot::KeyState), 1);
        assert_eq!(
            leftover,
            vec![
                InputEvent::KeyUp { key_code: 10 },
                InputEvent::KeyDown { key_code: 11 },
            ]
        );
    }

    #[test]
    fn test_key_up_recorded_as_released() {
        let mut view = blank();
        update_input_buffer_with_events(&[InputEvent::KeyUp { key_code: 56 }], &mut view);
        assert_eq!(view.read(InputSlot::KeyCode), 56);
        assert_eq!(view.read(InputSlot::KeyState), 0);
    }

    #[test]
    fn test_stop_flag_is_level_triggered() {
        let mut view = blank();
        update_input_buffer_with_events(&[InputEvent::Stop], &mut view);
        assert_eq!(view.read(InputSlot::StopFlag), 1);

        // Untouched by batches without stop/start.
        update_input_buffer_with_events(&[InputEvent::MouseDown], &mut view);
        assert_eq!(view.read(InputSlot::StopFlag), 1);

        update_input_buffer_with_events(&[InputEvent::Start], &mut view);
        assert_eq!(view.read(InputSlot::StopFlag), 0);
    }

    #[test]
    fn test_start_wins_over_stop() {
        let mut view = blank();
        update_input_buffer_with_events(&[InputEvent::Start, InputEvent::Stop], &mut view);
        assert_eq!(view.read(InputSlot::StopFlag), 0);
    }
}
