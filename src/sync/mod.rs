//! UI-side synchronization: the handoff lock and the flush engine

mod engine;
pub mod lock;

pub use engine::{create_engine_channels, SyncEngine};
pub use lock::{HandoffLock, LockState, Party};

use crate::input::InputEvent;
use crate::transport::FileUpload;

/// Commands that can be sent to the sync engine
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Queue an input event for the next flush
    Input(InputEvent),
    /// Queue a file to inject into the guest
    UploadFile(FileUpload),
    /// Flush what can be flushed and stop
    Shutdown,
}

/// Status updates from the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing waiting to be delivered
    Idle,
    /// A flush handed events to the worker
    Flushed {
        /// Events still waiting for a later cycle
        pending: usize,
    },
    /// The worker still owns the buffer; events stay queued
    Busy { pending: usize },
    /// An error occurred
    Error(String),
}
