//! Shared input layout.
//!
//! Both threads agree on a fixed table of `i32` slots. The table is viewed
//! as an `Int32Array`-style array of words and never grows or gets
//! renumbered at runtime.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::error;

use crate::error::LockError;
use crate::sync::lock::{HandoffLock, LockState, Party};

/// Number of `i32` slots in the shared input layout
pub const INPUT_BUFFER_SLOTS: usize = 9;

/// Size of the shared input layout in bytes
pub const INPUT_BUFFER_BYTES: usize = INPUT_BUFFER_SLOTS * 4;

/// Symbolic slot names mapped to their fixed word offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum InputSlot {
    GlobalLock = 0,
    MouseMoveFlag = 1,
    MouseMoveXDelta = 2,
    MouseMoveYDelta = 3,
    MouseButtonState = 4,
    KeyEventFlag = 5,
    KeyCode = 6,
    KeyState = 7,
    StopFlag = 8,
}

impl InputSlot {
    pub const ALL: [InputSlot; INPUT_BUFFER_SLOTS] = [
        InputSlot::GlobalLock,
        InputSlot::MouseMoveFlag,
        InputSlot::MouseMoveXDelta,
        InputSlot::MouseMoveYDelta,
        InputSlot::MouseButtonState,
        InputSlot::KeyEventFlag,
        InputSlot::KeyCode,
        InputSlot::KeyState,
        InputSlot::StopFlag,
    ];

    /// Word offset of this slot
    pub const fn addr(self) -> usize {
        self as usize
    }
}

/// Offset-indexed access to an input layout.
///
/// Implemented by plain local arrays (used by the fallback transport and in
/// tests) and by [`InputGuard`], the only way to touch the shared buffer.
pub trait InputSlots {
    fn read(&self, slot: InputSlot) -> i32;
    fn write(&mut self, slot: InputSlot, value: i32);
}

impl InputSlots for [i32; INPUT_BUFFER_SLOTS] {
    fn read(&self, slot: InputSlot) -> i32 {
        self[slot.addr()]
    }

    fn write(&mut self, slot: InputSlot, value: i32) {
        self[slot.addr()] = value;
    }
}

/// The shared input layout, backed by atomics so it can be aliased by both
/// threads through an `Arc`.
#[repr(C)]
pub struct SharedInputBuffer {
    slots: [AtomicI32; INPUT_BUFFER_SLOTS],
}

impl SharedInputBuffer {
    /// A zeroed layout with the lock ready for the UI thread
    pub fn new() -> Self {
        let slots = std::array::from_fn(|_| AtomicI32::new(0));
        let buffer = Self { slots };
        buffer.slots[InputSlot::GlobalLock.addr()]
            .store(LockState::ReadyForUiThread.to_raw(), Ordering::Release);
        buffer
    }

    /// The handoff lock stored in the global-lock slot
    pub fn lock(&self) -> HandoffLock<'_> {
        HandoffLock::new(&self.slots[InputSlot::GlobalLock.addr()])
    }

    /// Try to take the buffer for `party`.
    ///
    /// `Ok(None)` means it is the other party's turn.
    pub fn try_lock(&self, party: Party) -> Result<Option<InputGuard<'_>>, LockError> {
        if self.lock().try_acquire(party)? {
            Ok(Some(InputGuard {
                buffer: self,
                party,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Copy of every slot, including the lock word. Diagnostic only.
    pub fn words(&self) -> [i32; INPUT_BUFFER_SLOTS] {
        std::array::from_fn(|i| self.slots[i].load(Ordering::Acquire))
    }

    fn load(&self, slot: InputSlot) -> i32 {
        self.slots[slot.addr()].load(Ordering::Relaxed)
    }

    fn store(&self, slot: InputSlot, value: i32) {
        self.slots[slot.addr()].store(value, Ordering::Relaxed);
    }
}

impl Default for SharedInputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedInputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedInputBuffer")
            .field("words", &self.words())
            .finish()
    }
}

/// Exclusive view over the shared buffer while `party` holds the lock.
///
/// Dropping the guard hands the buffer to the other party.
pub struct InputGuard<'a> {
    buffer: &'a SharedInputBuffer,
    party: Party,
    released: bool,
}

impl InputGuard<'_> {
    pub fn party(&self) -> Party {
        self.party
    }

    /// Hand the buffer to the other party, reporting contract violations.
    pub fn release(mut self) -> Result<LockState, LockError> {
        self.released = true;
        self.buffer.lock().release(self.party)
    }

    fn debug_assert_held(&self) {
        debug_assert!(
            self.buffer
                .lock()
                .state()
                .map(|state| state.is_held_by(self.party))
                .unwrap_or(false),
            "{} thread touched the input buffer without holding the lock",
            self.party
        );
    }
}

impl InputSlots for InputGuard<'_> {
    fn read(&self, slot: InputSlot) -> i32 {
        self.debug_assert_held();
        self.buffer.load(slot)
    }

    fn write(&mut self, slot: InputSlot, value: i32) {
        debug_assert!(slot != InputSlot::GlobalLock, "lock word is written via HandoffLock");
        self.debug_assert_held();
        self.buffer.store(slot, value);
    }
}

impl Drop for InputGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.buffer.lock().release(self.party) {
            error!("Failed to hand off input buffer: {}", e);
        }
    }
}
