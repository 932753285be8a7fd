//! Four-state handoff lock shared by the UI thread and the emulator thread.
//!
//! The lock word cycles strictly through
//! `ReadyForUiThread -> UiThreadLock -> ReadyForEmulThread -> EmulThreadLock`
//! and back. Each party may only move the word out of its own "ready" state
//! (acquire) or out of its own "lock" state (release, which hands the buffer
//! to the other party). There is no reentrancy and no timeout; the driver
//! loop decides whether to spin, yield or try again next tick.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::LockError;

/// Value of the lock word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LockState {
    ReadyForUiThread = 0,
    UiThreadLock = 1,
    ReadyForEmulThread = 2,
    EmulThreadLock = 3,
}

/// One of the two parties sharing the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    UiThread,
    EmulThread,
}

impl LockState {
    pub const fn to_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Result<Self, LockError> {
        match raw {
            0 => Ok(LockState::ReadyForUiThread),
            1 => Ok(LockState::UiThreadLock),
            2 => Ok(LockState::ReadyForEmulThread),
            3 => Ok(LockState::EmulThreadLock),
            other => Err(LockError::InvalidState(other)),
        }
    }

    /// The state that follows this one in the cycle
    pub const fn next(self) -> Self {
        match self {
            LockState::ReadyForUiThread => LockState::UiThreadLock,
            LockState::UiThreadLock => LockState::ReadyForEmulThread,
            LockState::ReadyForEmulThread => LockState::EmulThreadLock,
            LockState::EmulThreadLock => LockState::ReadyForUiThread,
        }
    }

    /// The party allowed to move the word out of this state
    pub const fn owner(self) -> Party {
        match self {
            LockState::ReadyForUiThread | LockState::UiThreadLock => Party::UiThread,
            LockState::ReadyForEmulThread | LockState::EmulThreadLock => Party::EmulThread,
        }
    }

    /// Whether `party` currently holds the buffer
    pub const fn is_held_by(self, party: Party) -> bool {
        matches!(
            (self, party),
            (LockState::UiThreadLock, Party::UiThread)
                | (LockState::EmulThreadLock, Party::EmulThread)
        )
    }

    /// Validate a transition requested by `party` and return the new state.
    ///
    /// Only the single forward step owned by `party` is legal; skipping,
    /// reversing or acting on the other party's state is rejected.
    pub fn transition(self, party: Party, to: LockState) -> Result<LockState, LockError> {
        if self.owner() == party && self.next() == to {
            Ok(to)
        } else {
            Err(LockError::IllegalTransition {
                party,
                from: self,
                to,
            })
        }
    }
}

impl Party {
    /// State in which this party may acquire
    pub const fn ready_state(self) -> LockState {
        match self {
            Party::UiThread => LockState::ReadyForUiThread,
            Party::EmulThread => LockState::ReadyForEmulThread,
        }
    }

    /// State this party holds while it owns the buffer
    pub const fn locked_state(self) -> LockState {
        match self {
            Party::UiThread => LockState::UiThreadLock,
            Party::EmulThread => LockState::EmulThreadLock,
        }
    }

    pub const fn other(self) -> Party {
        match self {
            Party::UiThread => Party::EmulThread,
            Party::EmulThread => Party::UiThread,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockState::ReadyForUiThread => "READY_FOR_UI_THREAD",
            LockState::UiThreadLock => "UI_THREAD_LOCK",
            LockState::ReadyForEmulThread => "READY_FOR_EMUL_THREAD",
            LockState::EmulThreadLock => "EMUL_THREAD_LOCK",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::UiThread => f.write_str("ui"),
            Party::EmulThread => f.write_str("emulator"),
        }
    }
}

/// Handoff lock operating on a shared `i32` word.
///
/// Acquire uses `Acquire` ordering and release uses `Release`, so every slot
/// written while holding the lock is visible to the other party once it
/// observes its own ready state.
#[derive(Clone, Copy)]
pub struct HandoffLock<'a> {
    word: &'a AtomicI32,
}

impl<'a> HandoffLock<'a> {
    pub fn new(word: &'a AtomicI32) -> Self {
        Self { word }
    }

    /// Current state of the lock word
    pub fn state(&self) -> Result<LockState, LockError> {
        LockState::from_raw(self.word.load(Ordering::Acquire))
    }

    /// Attempt to take the lock for `party`.
    ///
    /// Returns `Ok(false)` when it is the other party's turn. Never blocks.
    pub fn try_acquire(&self, party: Party) -> Result<bool, LockError> {
        let ready = party.ready_state();
        let locked = ready.transition(party, party.locked_state())?;
        match self.word.compare_exchange(
            ready.to_raw(),
            locked.to_raw(),
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(true),
            Err(actual) => {
                let actual = LockState::from_raw(actual)?;
                if actual.is_held_by(party) {
                    // Not reentrant.
                    return Err(LockError::IllegalTransition {
                        party,
                        from: actual,
                        to: locked,
                    });
                }
                Ok(false)
            }
        }
    }

    /// Hand the buffer over to the other party.
    pub fn release(&self, party: Party) -> Result<LockState, LockError> {
        let locked = party.locked_state();
        let handoff = locked.transition(party, party.other().ready_state())?;
        match self.word.compare_exchange(
            locked.to_raw(),
            handoff.to_raw(),
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => Ok(handoff),
            Err(actual) => Err(LockError::IllegalTransition {
                party,
                from: LockState::from_raw(actual)?,
                to: handoff,
            }),
        }
    }
}
