//! Synchronization engine
//!
//! Runs on the UI side. Collects input events and file uploads from the
//! UI, and on every tick hands what it can to the worker through the
//! configured transports. Events the coalescer defers, or that could not be
//! written because the worker still owned the buffer, stay queued in order
//! for the next tick.

use anyhow::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::error::TransportError;
use crate::input::InputEvent;
use crate::transport::{FileSink, FileUpload, FlushOutcome, InputSink};

use super::{SyncCommand, SyncStatus};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Create the command and status channels for a [`SyncEngine`]
pub fn create_engine_channels() -> (
    mpsc::Sender<SyncCommand>,
    mpsc::Receiver<SyncCommand>,
    broadcast::Sender<SyncStatus>,
    broadcast::Receiver<SyncStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}

/// An item waiting for the worker, kept in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
enum Queued {
    Input(InputEvent),
    Upload(FileUpload),
}

/// Drives input and file delivery from the UI thread
pub struct SyncEngine {
    /// Input transport endpoint
    input_sink: Box<dyn InputSink>,
    /// Files transport endpoint
    file_sink: Box<dyn FileSink>,
    /// Command receiver
    cmd_rx: mpsc::Receiver<SyncCommand>,
    /// Status broadcaster
    status_tx: broadcast::Sender<SyncStatus>,
    /// Input and uploads not yet handed over, in the order they were issued
    pending: VecDeque<Queued>,
    /// Flush cadence
    interval: Duration,
    /// Last broadcast status, to avoid repeating it every tick
    last_status: Option<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        input_sink: Box<dyn InputSink>,
        file_sink: Box<dyn FileSink>,
        cmd_rx: mpsc::Receiver<SyncCommand>,
        status_tx: broadcast::Sender<SyncStatus>,
    ) -> Self {
        Self {
            input_sink,
            file_sink,
            cmd_rx,
            status_tx,
            pending: VecDeque::new(),
            interval: config.interval(),
            last_status: None,
        }
    }

    /// Queue an event for the next flush
    pub fn push_input(&mut self, event: InputEvent) {
        self.pending.push_back(Queued::Input(event));
    }

    /// Queue an upload for the next flush
    pub fn push_upload(&mut self, upload: FileUpload) {
        self.pending.push_back(Queued::Upload(upload));
    }

    /// Number of items not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Events not yet delivered, in order
    pub fn pending_input(&self) -> Vec<InputEvent> {
        self.pending
            .iter()
            .filter_map(|item| match item {
                Queued::Input(event) => Some(*event),
                Queued::Upload(_) => None,
            })
            .collect()
    }

    /// Uploads not yet delivered, in order
    pub fn pending_uploads(&self) -> Vec<FileUpload> {
        self.pending
            .iter()
            .filter_map(|item| match item {
                Queued::Upload(upload) => Some(upload.clone()),
                Queued::Input(_) => None,
            })
            .collect()
    }

    /// Hand pending items to the worker in issue order.
    ///
    /// The queue is split into runs of consecutive inputs or uploads. Runs go
    /// out front to back and a run that is not fully accepted stops the
    /// flush, so nothing overtakes an earlier item. An upload too large for
    /// the files transport is dropped and reported as `UploadTooLarge`; the
    /// rest of the queue is kept.
    pub fn flush(&mut self) -> Result<SyncStatus, TransportError> {
        if self.pending.is_empty() {
            return Ok(SyncStatus::Idle);
        }

        let mut progressed = false;
        let mut blocked = false;

        while let Some(front) = self.pending.front() {
            let is_input = matches!(front, Queued::Input(_));
            if is_input {
                let events: Vec<InputEvent> = self.take_run(|item| match item {
                    Queued::Input(event) => Some(event),
                    Queued::Upload(_) => None,
                });
                match self.input_sink.flush(events.clone()) {
                    Ok(FlushOutcome::Delivered(leftover)) => {
                        progressed = true;
                        if !leftover.is_empty() {
                            self.requeue(leftover.into_iter().map(Queued::Input));
                            break;
                        }
                    }
                    Ok(FlushOutcome::Busy(events)) => {
                        self.requeue(events.into_iter().map(Queued::Input));
                        blocked = true;
                        break;
                    }
                    Err(e) => {
                        self.requeue(events.into_iter().map(Queued::Input));
                        return Err(e);
                    }
                }
            } else {
                // Input handed over earlier must reach the worker first.
                if !self.input_sink.is_drained()? {
                    blocked = true;
                    break;
                }
                let uploads: Vec<FileUpload> = self.take_run(|item| match item {
                    Queued::Upload(upload) => Some(upload),
                    Queued::Input(_) => None,
                });
                let submitted = uploads.len();
                match self.file_sink.submit(uploads.clone()) {
                    Ok(rest) => {
                        if rest.len() < submitted {
                            progressed = true;
                        } else {
                            blocked = true;
                        }
                        if !rest.is_empty() {
                            self.requeue(rest.into_iter().map(Queued::Upload));
                            break;
                        }
                    }
                    Err(e @ TransportError::UploadTooLarge { .. }) => {
                        // The oversized upload heads the run; keep the others.
                        self.requeue(uploads.into_iter().skip(1).map(Queued::Upload));
                        return Err(e);
                    }
                    Err(e) => {
                        self.requeue(uploads.into_iter().map(Queued::Upload));
                        return Err(e);
                    }
                }
            }
        }

        let pending = self.pending.len();
        if blocked && !progressed {
            Ok(SyncStatus::Busy { pending })
        } else {
            Ok(SyncStatus::Flushed { pending })
        }
    }

    /// Pop the run of same-kind items at the front of the queue
    fn take_run<T>(&mut self, mut select: impl FnMut(Queued) -> Option<T>) -> Vec<T> {
        let mut run = Vec::new();
        while let Some(item) = self.pending.pop_front() {
            let kept = item.clone();
            match select(item) {
                Some(value) => run.push(value),
                None => {
                    self.pending.push_front(kept);
                    break;
                }
            }
        }
        run
    }

    /// Put undelivered items back at the front, keeping their order
    fn requeue(&mut self, items: impl DoubleEndedIterator<Item = Queued>) {
        for item in items.rev() {
            self.pending.push_front(item);
        }
    }

    /// Run the engine main loop
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Sync engine starting (input: {}, files: {}, every {:?})",
            self.input_sink.kind(),
            self.file_sink.kind(),
            self.interval
        );

        let mut flush_timer = tokio::time::interval(self.interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.report(SyncStatus::Idle);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Input(event)) => self.push_input(event),
                        Some(SyncCommand::UploadFile(upload)) => {
                            debug!("Queued upload {}", upload.name);
                            self.push_upload(upload);
                        }
                        Some(SyncCommand::Shutdown) | None => {
                            info!("Shutdown command received");
                            self.flush_and_report()?;
                            break;
                        }
                    }
                }

                _ = flush_timer.tick() => {
                    self.flush_and_report()?;
                }
            }
        }

        info!("Sync engine stopped");
        Ok(())
    }

    fn flush_and_report(&mut self) -> Result<()> {
        match self.flush() {
            Ok(status) => {
                self.report(status);
                Ok(())
            }
            Err(e @ TransportError::UploadTooLarge { .. }) => {
                error!("Dropping upload: {}", e);
                self.report(SyncStatus::Error(e.to_string()));
                Ok(())
            }
            Err(e) => {
                error!("Failed to flush to worker: {}", e);
                self.report(SyncStatus::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn report(&mut self, status: SyncStatus) {
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        self.last_status = Some(status.clone());
        let _ = self.status_tx.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SharedInputBuffer;
    use crate::sync::lock::Party;
    use crate::transport::{
        fallback_channel, FallbackCommand, FallbackFileSink, FallbackInputSink, FilesMailbox,
        SharedMemoryFileSink, SharedMemoryInputSink,
    };
    use std::sync::Arc;

    fn shared_engine(buffer: Arc<SharedInputBuffer>) -> SyncEngine {
        let (_cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
        SyncEngine::new(
            &SyncConfig::default(),
            Box::new(SharedMemoryInputSink::new(buffer, 2)),
            Box::new(SharedMemoryFileSink::new(Arc::new(FilesMailbox::new(1024)))),
            cmd_rx,
            status_tx,
        )
    }

    #[test]
    fn test_flush_keeps_deferred_events() {
        let buffer = Arc::new(SharedInputBuffer::new());
        let mut engine = shared_engine(buffer.clone());

        assert_eq!(engine.flush().unwrap(), SyncStatus::Idle);

        engine.push_input(InputEvent::TouchStart { dx: 1, dy: 1 });
        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 1 });
        assert_eq!(engine.pending_input(), &[InputEvent::MouseDown]);

        // Worker has not read yet.
        engine.push_input(InputEvent::KeyDown { key_code: 5 });
        assert_eq!(engine.flush().unwrap(), SyncStatus::Busy { pending: 2 });
        assert_eq!(
            engine.pending_input(),
            &[InputEvent::MouseDown, InputEvent::KeyDown { key_code: 5 }]
        );

        let guard = buffer.try_lock(Party::EmulThread).unwrap().unwrap();
        guard.release().unwrap();

        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 0 });
    }

    #[test]
    fn test_fallback_flush_sends_everything_in_order() {
        let (tx, mut rx) = fallback_channel();
        let (_cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig::default(),
            Box::new(FallbackInputSink::new(tx.clone())),
            Box::new(FallbackFileSink::new(tx)),
            cmd_rx,
            status_tx,
        );

        engine.push_upload(FileUpload {
            name: "a.sit".to_string(),
            url: "blob:a".to_string(),
            size: 1,
        });
        engine.push_input(InputEvent::MouseMove { dx: 1, dy: 0 });
        engine.push_input(InputEvent::MouseMove { dx: 2, dy: 0 });
        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 0 });

        let commands = rx.drain().unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], FallbackCommand::UploadFile { .. }));
        assert_eq!(
            commands[2],
            FallbackCommand::Input {
                event: InputEvent::MouseMove { dx: 2, dy: 0 }
            }
        );
    }

    #[test]
    fn test_fallback_flush_keeps_issue_order_across_uploads() {
        let (tx, mut rx) = fallback_channel();
        let (_cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig::default(),
            Box::new(FallbackInputSink::new(tx.clone())),
            Box::new(FallbackFileSink::new(tx)),
            cmd_rx,
            status_tx,
        );

        let upload = FileUpload {
            name: "u".to_string(),
            url: "blob:u".to_string(),
            size: 1,
        };
        engine.push_input(InputEvent::KeyDown { key_code: 1 });
        engine.push_upload(upload.clone());
        engine.push_input(InputEvent::KeyUp { key_code: 1 });
        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 0 });

        assert_eq!(
            rx.drain().unwrap(),
            vec![
                FallbackCommand::Input {
                    event: InputEvent::KeyDown { key_code: 1 }
                },
                FallbackCommand::UploadFile { upload },
                FallbackCommand::Input {
                    event: InputEvent::KeyUp { key_code: 1 }
                },
            ]
        );
    }

    #[test]
    fn test_shared_memory_upload_waits_for_earlier_input() {
        let buffer = Arc::new(SharedInputBuffer::new());
        let mailbox = Arc::new(FilesMailbox::new(1024));
        let (_cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig::default(),
            Box::new(SharedMemoryInputSink::new(buffer.clone(), 1)),
            Box::new(SharedMemoryFileSink::new(mailbox.clone())),
            cmd_rx,
            status_tx,
        );

        engine.push_input(InputEvent::KeyDown { key_code: 9 });
        engine.push_upload(FileUpload {
            name: "late.txt".to_string(),
            url: "blob:late".to_string(),
            size: 4,
        });

        // The key is handed over; the upload stays until the worker reads it.
        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 1 });
        assert!(mailbox.is_idle());
        assert_eq!(engine.flush().unwrap(), SyncStatus::Busy { pending: 1 });

        let guard = buffer.try_lock(Party::EmulThread).unwrap().unwrap();
        guard.release().unwrap();

        assert_eq!(engine.flush().unwrap(), SyncStatus::Flushed { pending: 0 });
        let taken = mailbox.take().unwrap().unwrap();
        assert_eq!(taken.uploads[0].name, "late.txt");
    }

    #[test]
    fn test_oversized_upload_is_dropped_and_the_rest_kept() {
        let mailbox = Arc::new(FilesMailbox::new(64));
        let (_cmd_tx, cmd_rx, status_tx, mut status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig::default(),
            Box::new(SharedMemoryInputSink::new(Arc::new(SharedInputBuffer::new()), 1)),
            Box::new(SharedMemoryFileSink::new(mailbox.clone())),
            cmd_rx,
            status_tx,
        );

        let names = ["x".repeat(100), "a".to_string(), "b".to_string(), "c".to_string()];
        for name in &names {
            engine.push_upload(FileUpload {
                name: name.clone(),
                url: format!("blob:{}", name),
                size: 1,
            });
        }

        // Reported, not fatal, and only the oversized upload is gone.
        engine.flush_and_report().unwrap();
        assert!(matches!(status_rx.try_recv().unwrap(), SyncStatus::Error(_)));
        let left: Vec<String> = engine.pending_uploads().into_iter().map(|u| u.name).collect();
        assert_eq!(left, vec!["a", "b", "c"]);

        let mut received = Vec::new();
        while engine.pending() > 0 {
            engine.flush().unwrap();
            if let Some(actions) = mailbox.take().unwrap() {
                received.extend(actions.uploads.into_iter().map(|u| u.name));
            }
        }
        assert_eq!(received, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_flush_reports_disconnected_worker() {
        let (tx, rx) = fallback_channel();
        drop(rx);
        let (_cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig::default(),
            Box::new(FallbackInputSink::new(tx.clone())),
            Box::new(FallbackFileSink::new(tx)),
            cmd_rx,
            status_tx,
        );
        engine.push_input(InputEvent::Stop);
        assert!(matches!(engine.flush(), Err(TransportError::Disconnected)));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let buffer = Arc::new(SharedInputBuffer::new());
        let (cmd_tx, cmd_rx, status_tx, mut status_rx) = create_engine_channels();
        let mut engine = SyncEngine::new(
            &SyncConfig {
                interval_ms: 1,
                spin_limit: 1,
            },
            Box::new(SharedMemoryInputSink::new(buffer.clone(), 1)),
            Box::new(SharedMemoryFileSink::new(Arc::new(FilesMailbox::new(1024)))),
            cmd_rx,
            status_tx,
        );

        cmd_tx
            .send(SyncCommand::Input(InputEvent::KeyDown { key_code: 7 }))
            .await
            .unwrap();
        cmd_tx.send(SyncCommand::Shutdown).await.unwrap();
        engine.run().await.unwrap();

        assert_eq!(status_rx.recv().await.unwrap(), SyncStatus::Idle);
        assert!(engine.pending_input().is_empty());
        assert_eq!(
            buffer.lock().state().unwrap(),
            crate::sync::lock::LockState::ReadyForEmulThread
        );
    }
}
