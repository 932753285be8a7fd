//! File upload endpoints for both transports

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TransportError;

use super::{CommandSender, FallbackCommand, FileActions, FileUpload, FilesMailbox, TransportKind};

/// UI end of the files transport
pub trait FileSink: Send {
    fn kind(&self) -> TransportKind;

    /// Hand `uploads` to the worker, returning the ones not yet accepted.
    fn submit(&mut self, uploads: Vec<FileUpload>) -> Result<Vec<FileUpload>, TransportError>;
}

/// Worker end of the files transport
pub trait FileSource: Send {
    fn kind(&self) -> TransportKind;

    /// Accept an upload that arrived over the fallback command channel.
    fn deliver(&mut self, upload: FileUpload) {
        warn!(
            "Dropping upload {} received over the command channel while files use {}",
            upload.name,
            self.kind()
        );
    }

    /// Uploads to apply this cycle, in submission order
    fn take_uploads(&mut self) -> Result<Vec<FileUpload>, TransportError>;
}

pub struct SharedMemoryFileSink {
    mailbox: Arc<FilesMailbox>,
}

impl SharedMemoryFileSink {
    pub fn new(mailbox: Arc<FilesMailbox>) -> Self {
        Self { mailbox }
    }
}

impl FileSink for SharedMemoryFileSink {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    /// Publish the longest prefix of `uploads` that fits the mailbox.
    ///
    /// Fails with `UploadTooLarge` only when the first upload does not fit on
    /// its own; nothing is published in that case.
    fn submit(&mut self, mut uploads: Vec<FileUpload>) -> Result<Vec<FileUpload>, TransportError> {
        let mut count = uploads.len();
        while count > 0 {
            let actions = FileActions {
                uploads: uploads[..count].to_vec(),
            };
            match self.mailbox.publish(&actions) {
                Ok(true) => {
                    debug!("Published {} file uploads", count);
                    return Ok(uploads.split_off(count));
                }
                Ok(false) => return Ok(uploads),
                Err(TransportError::BufferTooSmall { needed, capacity }) => {
                    if count == 1 {
                        return Err(TransportError::UploadTooLarge {
                            name: uploads[0].name.clone(),
                            needed,
                            capacity,
                        });
                    }
                    count -= 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(uploads)
    }
}

pub struct FallbackFileSink {
    commands: CommandSender,
}

impl FallbackFileSink {
    pub fn new(commands: CommandSender) -> Self {
        Self { commands }
    }
}

impl FileSink for FallbackFileSink {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn submit(&mut self, uploads: Vec<FileUpload>) -> Result<Vec<FileUpload>, TransportError> {
        for upload in uploads {
            self.commands.send(FallbackCommand::UploadFile { upload })?;
        }
        Ok(Vec::new())
    }
}

pub struct SharedMemoryFileSource {
    mailbox: Arc<FilesMailbox>,
}

impl SharedMemoryFileSource {
    pub fn new(mailbox: Arc<FilesMailbox>) -> Self {
        Self { mailbox }
    }
}

impl FileSource for SharedMemoryFileSource {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn take_uploads(&mut self) -> Result<Vec<FileUpload>, TransportError> {
        Ok(self
            .mailbox
            .take()?
            .map(|actions| actions.uploads)
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FallbackFileSource {
    pending: Vec<FileUpload>,
}

impl FallbackFileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSource for FallbackFileSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn deliver(&mut self, upload: FileUpload) {
        self.pending.push(upload);
    }

    fn take_uploads(&mut self) -> Result<Vec<FileUpload>, TransportError> {
        Ok(std::mem::take(&mut self.pending))
    }
}
