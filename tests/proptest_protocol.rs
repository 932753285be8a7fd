//! Property tests for the coalescer and chunk addressing.

use emulator_bridge::disk::{chunk_url, next_chunk_url, parse_chunk_url, ChunkedFileSpec};
use emulator_bridge::error::ChunkError;
use emulator_bridge::input::{
    read_input_snapshot, update_input_buffer_with_events, InputEvent, INPUT_BUFFER_SLOTS,
};
use proptest::prelude::*;

fn arb_event() -> impl Strategy<Value = InputEvent> {
    prop_oneof![
        (-50i32..50, -50i32..50).prop_map(|(dx, dy)| InputEvent::MouseMove { dx, dy }),
        (-50i32..50, -50i32..50).prop_map(|(dx, dy)| InputEvent::TouchStart { dx, dy }),
        Just(InputEvent::MouseDown),
        Just(InputEvent::MouseUp),
        (0i32..128).prop_map(|key_code| InputEvent::KeyDown { key_code }),
        (0i32..128).prop_map(|key_code| InputEvent::KeyUp { key_code }),
        Just(InputEvent::Stop),
        Just(InputEvent::Start),
    ]
}

proptest! {
    #[test]
    fn leftovers_are_only_keys_and_synthetic_presses(events in prop::collection::vec(arb_event(), 0..40)) {
        let mut view = [0; INPUT_BUFFER_SLOTS];
        let leftover = update_input_buffer_with_events(&events, &mut view);
        for event in &leftover {
            prop_assert!(event.is_key() || *event == InputEvent::MouseDown, "unexpected leftover {:?}", event);
        }
    }

    #[test]
    fn keys_arrive_in_order_across_cycles(events in prop::collection::vec(arb_event(), 0..40)) {
        let sent: Vec<InputEvent> = events.iter().copied().filter(InputEvent::is_key).collect();
        let mut view = [0; INPUT_BUFFER_SLOTS];
        let mut pending = events;
        let mut received = Vec::new();
        let mut cycles = 0;

        loop {
            pending = update_input_buffer_with_events(&pending, &mut view);
            let snapshot = read_input_snapshot(&mut view);
            if let Some(key) = snapshot.key {
                received.push(if key.pressed {
                    InputEvent::KeyDown { key_code: key.key_code }
                } else {
                    InputEvent::KeyUp { key_code: key.key_code }
                });
            }
            cycles += 1;
            if pending.is_empty() {
                break;
            }
            prop_assert!(cycles <= sent.len() + 1, "coalescer did not make progress");
        }

        prop_assert_eq!(received, sent);
    }

    #[test]
    fn next_chunk_url_walks_the_spec(data in prop::collection::vec(any::<u8>(), 1..512), chunk_size in 1u64..64) {
        let spec = ChunkedFileSpec::from_bytes("disk.img", "/Disk", &data, chunk_size).unwrap();
        let specs = vec![spec.clone()];
        let count = spec.chunks.len();

        for index in 0..count {
            let url = chunk_url(&spec, index).unwrap();
            let (hash, parsed) = parse_chunk_url(&url).unwrap();
            prop_assert_eq!(hash, spec.chunks[index].as_str());
            prop_assert_eq!(parsed, index);

            let next = next_chunk_url(&url, &specs);
            if index + 1 < count {
                prop_assert_eq!(next.unwrap(), chunk_url(&spec, index + 1).unwrap());
            } else {
                let is_out_of_range = matches!(next, Err(ChunkError::IndexOutOfRange { .. }));
                prop_assert!(is_out_of_range);
            }
        }
    }
}
