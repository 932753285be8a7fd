//! Ordered message passing used when shared memory is unavailable.
//!
//! Everything the UI would have written into shared buffers is sent as a
//! [`FallbackCommand`] instead. The channel is unbounded and lossless and
//! delivers in send order, so the worker observes the same ordering it would
//! through the shared-memory path.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::error::TransportError;
use crate::input::InputEvent;

use super::FileUpload;

/// A command sent from the UI to the worker over the fallback channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackCommand {
    Input { event: InputEvent },
    UploadFile { upload: FileUpload },
}

/// UI end of the fallback channel
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<FallbackCommand>,
}

/// Worker end of the fallback channel
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<FallbackCommand>,
}

/// Create a connected fallback channel
pub fn fallback_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

impl CommandSender {
    pub fn send(&self, command: FallbackCommand) -> Result<(), TransportError> {
        self.tx.send(command).map_err(|_| TransportError::Disconnected)
    }
}

impl CommandReceiver {
    /// Take every command sent so far, in send order. Never blocks.
    ///
    /// Returns `Disconnected` once the sender is gone and nothing is left.
    pub fn drain(&mut self) -> Result<Vec<FallbackCommand>, TransportError> {
        let mut commands = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) => return Ok(commands),
                Err(TryRecvError::Disconnected) => {
                    if commands.is_empty() {
                        return Err(TransportError::Disconnected);
                    }
                    return Ok(commands);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_value(FallbackCommand::Input {
            event: InputEvent::KeyUp { key_code: 4 },
        })
        .unwrap();
        assert_eq!(json["type"], "input");
        assert_eq!(json["event"]["type"], "keyup");
        assert_eq!(json["event"]["keyCode"], 4);

        let json = serde_json::to_value(FallbackCommand::UploadFile {
            upload: FileUpload {
                name: "a.sit".to_string(),
                url: "blob:1".to_string(),
                size: 3,
            },
        })
        .unwrap();
        assert_eq!(json["type"], "upload_file");
        assert_eq!(json["upload"]["name"], "a.sit");
    }

    #[test]
    fn test_drain_preserves_order() {
        let (tx, mut rx) = fallback_channel();
        let events = [
            InputEvent::MouseMove { dx: 1, dy: 1 },
            InputEvent::MouseMove { dx: 2, dy: 2 },
            InputEvent::KeyDown { key_code: 1 },
        ];
        for event in events {
            tx.send(FallbackCommand::Input { event }).unwrap();
        }

        let drained = rx.drain().unwrap();
        let received: Vec<InputEvent> = drained
            .into_iter()
            .map(|command| match command {
                FallbackCommand::Input { event } => event,
                FallbackCommand::UploadFile { .. } => panic!("unexpected upload"),
            })
            .collect();
        assert_eq!(received, events);
        assert!(rx.drain().unwrap().is_empty());
    }

    #[test]
    fn test_drain_after_disconnect() {
        let (tx, mut rx) = fallback_channel();
        tx.send(FallbackCommand::Input {
            event: InputEvent::Stop,
        })
        .unwrap();
        drop(tx);

        assert_eq!(rx.drain().unwrap().len(), 1);
        assert!(matches!(rx.drain(), Err(TransportError::Disconnected)));
    }
}
