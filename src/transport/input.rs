//! Input endpoints for both transports.
//!
//! The UI side flushes pending events through an [`InputSink`]; the worker
//! polls an [`InputSource`] once per cycle. Callers never branch on the
//! active transport.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::input::{
    read_input_snapshot, update_input_buffer_with_events, InputEvent, InputSnapshot,
    SharedInputBuffer, INPUT_BUFFER_SLOTS,
};
use crate::sync::lock::{LockState, Party};

use super::{CommandSender, FallbackCommand, TransportKind};

/// Result of handing a batch to an [`InputSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The batch was written; the leftovers go out next cycle
    Delivered(Vec<InputEvent>),
    /// The worker still owns the buffer; nothing was written
    Busy(Vec<InputEvent>),
}

impl FlushOutcome {
    /// Events that still need delivering, in order
    pub fn into_pending(self) -> Vec<InputEvent> {
        match self {
            FlushOutcome::Delivered(events) | FlushOutcome::Busy(events) => events,
        }
    }
}

/// UI end of the input transport
pub trait InputSink: Send {
    fn kind(&self) -> TransportKind;

    /// Deliver `events` in order.
    fn flush(&mut self, events: Vec<InputEvent>) -> Result<FlushOutcome, TransportError>;

    /// Whether the worker has consumed everything handed over so far.
    ///
    /// Uploads queued behind input wait for this, so they never reach the
    /// worker ahead of it.
    fn is_drained(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}

/// Worker end of the input transport
pub trait InputSource: Send {
    fn kind(&self) -> TransportKind;

    /// Accept an event that arrived over the fallback command channel.
    fn deliver(&mut self, event: InputEvent) {
        warn!(
            "Dropping {:?} received over the command channel while input uses {}",
            event,
            self.kind()
        );
    }

    /// Read this cycle's input, if the UI has handed any over.
    fn poll(&mut self) -> Result<Option<InputSnapshot>, TransportError>;

    /// Whether events are held back for a later cycle
    fn has_pending(&self) -> bool {
        false
    }
}

/// Coalesces into the shared layout under the handoff lock
pub struct SharedMemoryInputSink {
    buffer: Arc<SharedInputBuffer>,
    spin_limit: u32,
}

impl SharedMemoryInputSink {
    pub fn new(buffer: Arc<SharedInputBuffer>, spin_limit: u32) -> Self {
        Self {
            buffer,
            spin_limit: spin_limit.max(1),
        }
    }
}

impl InputSink for SharedMemoryInputSink {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn flush(&mut self, events: Vec<InputEvent>) -> Result<FlushOutcome, TransportError> {
        if events.is_empty() {
            return Ok(FlushOutcome::Delivered(events));
        }

        for _ in 0..self.spin_limit {
            if let Some(mut guard) = self.buffer.try_lock(Party::UiThread)? {
                let leftover = update_input_buffer_with_events(&events, &mut guard);
                guard.release()?;
                return Ok(FlushOutcome::Delivered(leftover));
            }
            std::hint::spin_loop();
        }

        debug!("Input buffer busy, keeping {} events", events.len());
        Ok(FlushOutcome::Busy(events))
    }

    fn is_drained(&self) -> Result<bool, TransportError> {
        let state = self.buffer.lock().state()?;
        Ok(matches!(state, LockState::ReadyForUiThread | LockState::UiThreadLock))
    }
}

/// Sends every raw event, in order, over the command channel
pub struct FallbackInputSink {
    commands: CommandSender,
}

impl FallbackInputSink {
    pub fn new(commands: CommandSender) -> Self {
        Self { commands }
    }
}

impl InputSink for FallbackInputSink {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn flush(&mut self, events: Vec<InputEvent>) -> Result<FlushOutcome, TransportError> {
        for event in events {
            self.commands.send(FallbackCommand::Input { event })?;
        }
        Ok(FlushOutcome::Delivered(Vec::new()))
    }
}

/// Reads the shared layout when the UI hands it over
pub struct SharedMemoryInputSource {
    buffer: Arc<SharedInputBuffer>,
}

impl SharedMemoryInputSource {
    pub fn new(buffer: Arc<SharedInputBuffer>) -> Self {
        Self { buffer }
    }
}

impl InputSource for SharedMemoryInputSource {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn poll(&mut self) -> Result<Option<InputSnapshot>, TransportError> {
        let Some(mut guard) = self.buffer.try_lock(Party::EmulThread)? else {
            return Ok(None);
        };
        let snapshot = read_input_snapshot(&mut guard);
        guard.release()?;
        Ok(Some(snapshot))
    }
}

/// Runs the coalescer on the worker against a private layout.
///
/// Events arrive raw and in order over the command channel; folding them
/// here gives the emulator the same per-cycle view the shared layout would.
pub struct FallbackInputSource {
    slots: [i32; INPUT_BUFFER_SLOTS],
    pending: Vec<InputEvent>,
}

impl FallbackInputSource {
    pub fn new(input_buffer_size: usize) -> Self {
        Self {
            slots: [0; INPUT_BUFFER_SLOTS],
            pending: Vec::with_capacity(input_buffer_size),
        }
    }

    /// Events waiting for a later cycle
    pub fn pending(&self) -> &[InputEvent] {
        &self.pending
    }
}

impl InputSource for FallbackInputSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn deliver(&mut self, event: InputEvent) {
        self.pending.push(event);
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn poll(&mut self) -> Result<Option<InputSnapshot>, TransportError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let events = std::mem::take(&mut self.pending);
        self.pending = update_input_buffer_with_events(&events, &mut self.slots);
        Ok(Some(read_input_snapshot(&mut self.slots)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ButtonState, KeyTransition};
    use crate::transport::fallback_channel;

    #[test]
    fn test_shared_memory_cycle() {
        let buffer = Arc::new(SharedInputBuffer::new());
        let mut sink = SharedMemoryInputSink::new(buffer.clone(), 4);
        let mut source = SharedMemoryInputSource::new(buffer.clone());

        // Nothing handed over yet.
        assert_eq!(source.poll().unwrap(), None);

        let leftover = sink
            .flush(vec![
                InputEvent::KeyDown { key_code: 1 },
                InputEvent::KeyDown { key_code: 2 },
            ])
            .unwrap();
        assert_eq!(
            leftover,
            FlushOutcome::Delivered(vec![InputEvent::KeyDown { key_code: 2 }])
        );
        assert_eq!(buffer.lock().state().unwrap(), LockState::ReadyForEmulThread);
        assert!(!sink.is_drained().unwrap());
        let leftover = leftover.into_pending();

        // The UI cannot write again until the emulator has read.
        assert_eq!(
            sink.flush(leftover.clone()).unwrap(),
            FlushOutcome::Busy(leftover.clone())
        );

        let snapshot = source.poll().unwrap().unwrap();
        assert_eq!(
            snapshot.key,
            Some(KeyTransition {
                key_code: 1,
                pressed: true
            })
        );
        assert_eq!(buffer.lock().state().unwrap(), LockState::ReadyForUiThread);
        assert!(sink.is_drained().unwrap());

        assert!(sink.flush(leftover).unwrap().into_pending().is_empty());
        let snapshot = source.poll().unwrap().unwrap();
        assert_eq!(snapshot.key.map(|k| k.key_code), Some(2));
    }

    #[test]
    fn test_fallback_matches_shared_memory_view() {
        let (tx, mut rx) = fallback_channel();
        let mut sink = FallbackInputSink::new(tx);
        let mut source = FallbackInputSource::new(16);

        let leftover = sink
            .flush(vec![
                InputEvent::TouchStart { dx: 5, dy: 7 },
                InputEvent::KeyDown { key_code: 3 },
            ])
            .unwrap();
        assert_eq!(leftover, FlushOutcome::Delivered(Vec::new()));

        for command in rx.drain().unwrap() {
            match command {
                FallbackCommand::Input { event } => source.deliver(event),
                FallbackCommand::UploadFile { .. } => panic!("unexpected upload"),
            }
        }

        let first = source.poll().unwrap().unwrap();
        assert_eq!(first.mouse_move, Some((5, 7)));
        assert_eq!(first.mouse_button, ButtonState::Unchanged);
        assert_eq!(source.pending(), &[InputEvent::MouseDown]);
        assert!(source.has_pending());

        let second = source.poll().unwrap().unwrap();
        assert_eq!(second.mouse_move, None);
        assert_eq!(second.mouse_button, ButtonState::Pressed);
        assert!(!source.has_pending());
        assert_eq!(source.poll().unwrap(), None);
    }

    #[test]
    fn test_shared_source_ignores_channel_events() {
        let buffer = Arc::new(SharedInputBuffer::new());
        let mut source = SharedMemoryInputSource::new(buffer);
        source.deliver(InputEvent::Stop);
        assert_eq!(source.poll().unwrap(), None);
    }
}
