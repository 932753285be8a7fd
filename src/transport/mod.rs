//! Transport selection.
//!
//! Every subsystem (video, input, audio, files) runs over either a zero-copy
//! shared-memory transport or the fallback message channel. The choice is
//! made once when the worker is configured and never changes for that
//! worker. The variant fully determines which fields exist, so a consumer
//! of a fallback config cannot reach a shared buffer handle.

mod fallback;
mod files;
mod input;
mod shared;

pub use fallback::{fallback_channel, CommandReceiver, CommandSender, FallbackCommand};
pub use files::{
    FallbackFileSink, FallbackFileSource, FileSink, FileSource, SharedMemoryFileSink,
    SharedMemoryFileSource,
};
pub use input::{
    FallbackInputSink, FallbackInputSource, FlushOutcome, InputSink, InputSource, SharedMemoryInputSink,
    SharedMemoryInputSource,
};
pub use shared::{FilesMailbox, SharedBuffer};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::input::{SharedInputBuffer, INPUT_BUFFER_BYTES};

/// Which transport a subsystem uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    SharedMemory,
    Fallback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::SharedMemory => f.write_str("shared-memory"),
            TransportKind::Fallback => f.write_str("fallback"),
        }
    }
}

/// A file injected into the guest filesystem after boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub name: String,
    pub url: String,
    pub size: u64,
}

/// Batch of file operations handed to the files subsystem
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileActions {
    pub uploads: Vec<FileUpload>,
}

#[derive(Debug, Clone)]
pub struct SharedMemoryVideoConfig {
    pub screen_buffer: SharedBuffer,
    pub screen_buffer_size: usize,
    pub video_mode_buffer: SharedBuffer,
    pub video_mode_buffer_size: usize,
    pub screen_width: u32,
    pub screen_height: u32,
}

#[derive(Debug, Clone)]
pub enum VideoConfig {
    SharedMemory(SharedMemoryVideoConfig),
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SharedMemoryInputConfig {
    pub input_buffer: Arc<SharedInputBuffer>,
    pub input_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct FallbackInputConfig {
    /// Sizing hint for the worker's local layout / queue
    pub input_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub enum InputConfig {
    SharedMemory(SharedMemoryInputConfig),
    Fallback(FallbackInputConfig),
}

#[derive(Debug, Clone)]
pub struct SharedMemoryAudioConfig {
    pub audio_data_buffer: SharedBuffer,
    pub audio_data_buffer_size: usize,
    pub audio_block_buffer_size: usize,
    pub audio_block_chunk_size: usize,
}

#[derive(Debug, Clone)]
pub enum AudioConfig {
    SharedMemory(SharedMemoryAudioConfig),
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SharedMemoryFilesConfig {
    pub files_buffer: Arc<FilesMailbox>,
    pub files_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub enum FilesConfig {
    SharedMemory(SharedMemoryFilesConfig),
    Fallback,
}

/// How a frame reaches the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoBlit {
    /// Frame is already in the shared screen buffer
    SharedMemory,
    /// Frame bytes travel with the message
    Fallback {
        data: Vec<u8>,
        width: u32,
        height: u32,
        depth: u32,
        using_palette: bool,
    },
}

fn check_size(what: &'static str, declared: usize, buffer: &SharedBuffer) -> Result<(), TransportError> {
    if declared != buffer.len() {
        return Err(TransportError::SizeMismatch {
            what,
            declared,
            actual: buffer.len(),
        });
    }
    Ok(())
}

impl VideoConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            VideoConfig::SharedMemory(_) => TransportKind::SharedMemory,
            VideoConfig::Fallback => TransportKind::Fallback,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            VideoConfig::SharedMemory(config) => {
                check_size("screen buffer", config.screen_buffer_size, &config.screen_buffer)?;
                check_size(
                    "video mode buffer",
                    config.video_mode_buffer_size,
                    &config.video_mode_buffer,
                )
            }
            VideoConfig::Fallback => Ok(()),
        }
    }
}

impl InputConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            InputConfig::SharedMemory(_) => TransportKind::SharedMemory,
            InputConfig::Fallback(_) => TransportKind::Fallback,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            InputConfig::SharedMemory(config) if config.input_buffer_size != INPUT_BUFFER_BYTES => {
                Err(TransportError::SizeMismatch {
                    what: "input buffer",
                    declared: config.input_buffer_size,
                    actual: INPUT_BUFFER_BYTES,
                })
            }
            InputConfig::SharedMemory(_) | InputConfig::Fallback(_) => Ok(()),
        }
    }
}

impl AudioConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            AudioConfig::SharedMemory(_) => TransportKind::SharedMemory,
            AudioConfig::Fallback => TransportKind::Fallback,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            AudioConfig::SharedMemory(config) => {
                check_size(
                    "audio data buffer",
                    config.audio_data_buffer_size,
                    &config.audio_data_buffer,
                )?;
                if config.audio_block_chunk_size == 0
                    || config.audio_block_buffer_size % config.audio_block_chunk_size != 0
                {
                    return Err(TransportError::SizeMismatch {
                        what: "audio block buffer",
                        declared: config.audio_block_buffer_size,
                        actual: config.audio_block_chunk_size,
                    });
                }
                Ok(())
            }
            AudioConfig::Fallback => Ok(()),
        }
    }
}

impl FilesConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            FilesConfig::SharedMemory(_) => TransportKind::SharedMemory,
            FilesConfig::Fallback => TransportKind::Fallback,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            FilesConfig::SharedMemory(config) if config.files_buffer_size != config.files_buffer.capacity() => {
                Err(TransportError::SizeMismatch {
                    what: "files buffer",
                    declared: config.files_buffer_size,
                    actual: config.files_buffer.capacity(),
                })
            }
            FilesConfig::SharedMemory(_) | FilesConfig::Fallback => Ok(()),
        }
    }
}

/// The transport chosen for each subsystem.
///
/// Built once by the UI side; the UI keeps clones of the shared handles and
/// passes the plan to the worker's configuration.
#[derive(Debug, Clone)]
pub struct TransportPlan {
    pub video: VideoConfig,
    pub input: InputConfig,
    pub audio: AudioConfig,
    pub files: FilesConfig,
}

impl TransportPlan {
    /// Allocate buffers for every subsystem that prefers shared memory.
    ///
    /// `shared_memory_available` is false when the runtime cannot share
    /// memory between threads at all, forcing every subsystem to fall back.
    pub fn from_config(config: &TransportConfig, shared_memory_available: bool) -> Self {
        let use_shared = |prefer: bool| shared_memory_available && prefer;

        let video = if use_shared(config.video_shared_memory) {
            let screen_buffer_size =
                config.screen_width as usize * config.screen_height as usize * 4;
            VideoConfig::SharedMemory(SharedMemoryVideoConfig {
                screen_buffer: SharedBuffer::new(screen_buffer_size),
                screen_buffer_size,
                video_mode_buffer: SharedBuffer::new(VIDEO_MODE_BUFFER_SIZE),
                video_mode_buffer_size: VIDEO_MODE_BUFFER_SIZE,
                screen_width: config.screen_width,
                screen_height: config.screen_height,
            })
        } else {
            VideoConfig::Fallback
        };

        let input = if use_shared(config.input_shared_memory) {
            InputConfig::SharedMemory(SharedMemoryInputConfig {
                input_buffer: Arc::new(SharedInputBuffer::new()),
                input_buffer_size: INPUT_BUFFER_BYTES,
            })
        } else {
            InputConfig::Fallback(FallbackInputConfig {
                input_buffer_size: config.input_buffer_size,
            })
        };

        let audio = if use_shared(config.audio_shared_memory) {
            let chunk = config.audio_block_chunk_size;
            let block_buffer = chunk * AUDIO_BLOCKS;
            AudioConfig::SharedMemory(SharedMemoryAudioConfig {
                audio_data_buffer: SharedBuffer::new(block_buffer),
                audio_data_buffer_size: block_buffer,
                audio_block_buffer_size: block_buffer,
                audio_block_chunk_size: chunk,
            })
        } else {
            AudioConfig::Fallback
        };

        let files = if use_shared(config.files_shared_memory) {
            FilesConfig::SharedMemory(SharedMemoryFilesConfig {
                files_buffer: Arc::new(FilesMailbox::new(config.files_buffer_size)),
                files_buffer_size: config.files_buffer_size,
            })
        } else {
            FilesConfig::Fallback
        };

        Self {
            video,
            input,
            audio,
            files,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        self.video.validate()?;
        self.input.validate()?;
        self.audio.validate()?;
        self.files.validate()
    }

    /// Whether any subsystem needs the fallback command channel.
    ///
    /// Video and audio fallbacks flow worker -> UI and do not use it.
    pub fn needs_command_channel(&self) -> bool {
        self.input.kind() == TransportKind::Fallback || self.files.kind() == TransportKind::Fallback
    }

    /// UI-side input endpoint for this plan
    pub fn input_sink(
        &self,
        commands: Option<&CommandSender>,
        spin_limit: u32,
    ) -> Result<Box<dyn InputSink>, TransportError> {
        match &self.input {
            InputConfig::SharedMemory(config) => Ok(Box::new(SharedMemoryInputSink::new(
                config.input_buffer.clone(),
                spin_limit,
            ))),
            InputConfig::Fallback(_) => {
                let commands = commands.ok_or(TransportError::MissingChannel("input"))?;
                Ok(Box::new(FallbackInputSink::new(commands.clone())))
            }
        }
    }

    /// UI-side files endpoint for this plan
    pub fn file_sink(&self, commands: Option<&CommandSender>) -> Result<Box<dyn FileSink>, TransportError> {
        match &self.files {
            FilesConfig::SharedMemory(config) => Ok(Box::new(SharedMemoryFileSink::new(
                config.files_buffer.clone(),
            ))),
            FilesConfig::Fallback => {
                let commands = commands.ok_or(TransportError::MissingChannel("files"))?;
                Ok(Box::new(FallbackFileSink::new(commands.clone())))
            }
        }
    }
}

/// Bytes reserved for the current video mode (width, height, depth words)
pub const VIDEO_MODE_BUFFER_SIZE: usize = 12;

/// Audio blocks held in the shared ring
const AUDIO_BLOCKS: usize = 16;
