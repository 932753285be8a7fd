//! Emulator worker
//!
//! The worker side of the bridge. It owns the emulator core and pulls
//! everything the UI handed over once per cycle: commands from the fallback
//! channel, the input layout, and file uploads. Frames go back to the UI as
//! [`VideoBlit`]s, either already in the shared screen buffer or carried with
//! the message.

mod demo;

pub use demo::DemoCore;

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WorkerSettings;
use crate::disk::{is_disk_image_file, ChunkedFileSpec};
use crate::error::TransportError;
use crate::input::{InputEvent, InputSnapshot};
use crate::persist::DirectoryExtraction;
use crate::transport::{
    AudioConfig, CommandReceiver, FallbackCommand, FallbackFileSource, FallbackInputSource,
    FileSource, FileUpload, FilesConfig, InputConfig, InputSource, SharedMemoryFileSource,
    SharedMemoryInputSource, TransportPlan, VideoBlit, VideoConfig,
};

/// Everything the worker needs at startup
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub js_url: String,
    pub wasm_url: String,
    /// Chunked disk images to mount
    pub disks: Vec<ChunkedFileSpec>,
    /// Files written into the guest before boot, by name
    pub autoload_files: BTreeMap<String, Vec<u8>>,
    /// Prior guest state to restore
    pub persisted_data: Option<DirectoryExtraction>,
    pub arguments: Vec<String>,
    pub video: VideoConfig,
    pub input: InputConfig,
    pub audio: AudioConfig,
    pub files: FilesConfig,
}

impl WorkerConfig {
    pub fn new(settings: &WorkerSettings, plan: &TransportPlan) -> Self {
        Self {
            js_url: settings.js_url.clone(),
            wasm_url: settings.wasm_url.clone(),
            disks: Vec::new(),
            autoload_files: BTreeMap::new(),
            persisted_data: None,
            arguments: settings.arguments.clone(),
            video: plan.video.clone(),
            input: plan.input.clone(),
            audio: plan.audio.clone(),
            files: plan.files.clone(),
        }
    }

    pub fn with_disks(mut self, disks: Vec<ChunkedFileSpec>) -> Self {
        self.disks = disks;
        self
    }

    pub fn with_autoload_file(mut self, name: impl Into<String>, contents: Vec<u8>) -> Self {
        self.autoload_files.insert(name.into(), contents);
        self
    }

    pub fn with_persisted_data(mut self, data: DirectoryExtraction) -> Self {
        self.persisted_data = Some(data);
        self
    }

    fn needs_command_channel(&self) -> bool {
        matches!(self.input, InputConfig::Fallback(_)) || matches!(self.files, FilesConfig::Fallback)
    }
}

/// How an autoloaded file should be handled by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    DiskImage,
    Plain,
}

impl FileKind {
    pub fn classify(name: &str) -> Self {
        if is_disk_image_file(name) {
            FileKind::DiskImage
        } else {
            FileKind::Plain
        }
    }
}

/// A rendered frame in the emulator's native format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub using_palette: bool,
}

/// The emulator proper.
///
/// The worker drives it but never looks inside: instruction execution and
/// device emulation live behind this trait.
pub trait EmulatorCore: Send {
    /// Repopulate guest state from a prior snapshot
    fn restore(&mut self, data: &DirectoryExtraction) -> Result<()>;

    /// Write a file into the guest before boot
    fn add_file(&mut self, name: &str, contents: &[u8], kind: FileKind) -> Result<()>;

    /// Attach a chunked disk image
    fn mount_disk(&mut self, spec: &ChunkedFileSpec) -> Result<()>;

    /// Apply one cycle's input
    fn handle_input(&mut self, input: &InputSnapshot);

    /// Inject a file uploaded after boot
    fn upload_file(&mut self, upload: &FileUpload) -> Result<()>;

    /// Run one slice of emulation, returning a frame if the screen changed
    fn run_slice(&mut self) -> Result<Option<Frame>>;
}

/// What one call to [`EmulatorWorker::run_cycle`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Input read this cycle, if the UI handed any over
    pub input: Option<InputSnapshot>,
    /// Uploads applied this cycle
    pub uploads: usize,
    /// Current value of the stop flag
    pub stopped: bool,
    /// Whether a frame was published
    pub blitted: bool,
}

/// Runs an [`EmulatorCore`] against the transports in its [`WorkerConfig`]
pub struct EmulatorWorker<C: EmulatorCore> {
    config: WorkerConfig,
    core: C,
    input: Box<dyn InputSource>,
    files: Box<dyn FileSource>,
    commands: Option<CommandReceiver>,
    /// Commands received but not yet applied, in the order the UI sent them
    backlog: VecDeque<FallbackCommand>,
    blits: Option<mpsc::UnboundedSender<VideoBlit>>,
    stopped: bool,
    cycles: u64,
}

impl<C: EmulatorCore> EmulatorWorker<C> {
    /// Bind `core` to the transports in `config`.
    ///
    /// `commands` is required when input or files fall back to message
    /// passing.
    pub fn new(
        config: WorkerConfig,
        core: C,
        commands: Option<CommandReceiver>,
    ) -> Result<Self, TransportError> {
        config.video.validate()?;
        config.input.validate()?;
        config.audio.validate()?;
        config.files.validate()?;

        if commands.is_none() && config.needs_command_channel() {
            let subsystem = if matches!(config.input, InputConfig::Fallback(_)) {
                "input"
            } else {
                "files"
            };
            return Err(TransportError::MissingChannel(subsystem));
        }

        let input: Box<dyn InputSource> = match &config.input {
            InputConfig::SharedMemory(shared) => {
                Box::new(SharedMemoryInputSource::new(shared.input_buffer.clone()))
            }
            InputConfig::Fallback(fallback) => {
                Box::new(FallbackInputSource::new(fallback.input_buffer_size))
            }
        };

        let files: Box<dyn FileSource> = match &config.files {
            FilesConfig::SharedMemory(shared) => {
                Box::new(SharedMemoryFileSource::new(shared.files_buffer.clone()))
            }
            FilesConfig::Fallback => Box::new(FallbackFileSource::new()),
        };

        Ok(Self {
            config,
            core,
            input,
            files,
            commands,
            backlog: VecDeque::new(),
            blits: None,
            stopped: false,
            cycles: 0,
        })
    }

    /// Send published frames to the UI through `blits`
    pub fn with_blit_sender(mut self, blits: mpsc::UnboundedSender<VideoBlit>) -> Self {
        self.blits = Some(blits);
        self
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Restore persisted state, write autoload files and mount disks.
    pub fn start(&mut self) -> Result<()> {
        info!(
            "Worker starting {} (video: {}, input: {}, audio: {}, files: {})",
            self.config.js_url,
            self.config.video.kind(),
            self.config.input.kind(),
            self.config.audio.kind(),
            self.config.files.kind()
        );
        debug!("Emulator arguments: {:?}", self.config.arguments);

        if let Some(data) = &self.config.persisted_data {
            self.core
                .restore(data)
                .with_context(|| format!("Failed to restore persisted {}", data.name))?;
            info!(
                "Restored {}: {} files, {} bytes",
                data.name,
                data.file_count(),
                data.total_bytes()
            );
        }

        for (name, contents) in &self.config.autoload_files {
            let kind = FileKind::classify(name);
            self.core
                .add_file(name, contents, kind)
                .with_context(|| format!("Failed to autoload {}", name))?;
            debug!("Autoloaded {} ({:?}, {} bytes)", name, kind, contents.len());
        }

        for spec in &self.config.disks {
            if !is_disk_image_file(&spec.name) {
                warn!("Mounting {} although it lacks a disk image extension", spec.name);
            }
            self.core
                .mount_disk(spec)
                .with_context(|| format!("Failed to mount {}", spec.name))?;
            info!(
                "Mounted {} ({} bytes in {} chunks)",
                spec.name,
                spec.total_size,
                spec.chunks.len()
            );
        }

        Ok(())
    }

    /// Commands received over the fallback channel and not yet applied
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    /// One worker cycle.
    ///
    /// Drains the command channel, reads input, applies uploads and, unless
    /// the stop flag is set, runs one emulation slice. Channel commands are
    /// applied in the order they were sent: an upload waits until every
    /// event before it has reached the core, and events after an upload
    /// wait for the next cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycles += 1;
        self.drain_commands()?;

        while let Some(event) = self.next_backlog_event() {
            self.input.deliver(event);
        }

        let input = self.input.poll()?;
        if let Some(snapshot) = &input {
            // Level-triggered: only changes when the UI hands over a layout.
            self.stopped = snapshot.stopped;
            if snapshot.has_input() {
                self.core.handle_input(snapshot);
            }
        }

        while !self.input.has_pending() {
            let Some(upload) = self.next_backlog_upload() else {
                break;
            };
            self.files.deliver(upload);
        }

        let uploads = self.files.take_uploads()?;
        for upload in &uploads {
            self.core
                .upload_file(upload)
                .with_context(|| format!("Failed to upload {}", upload.name))?;
            info!("Uploaded {} ({} bytes)", upload.name, upload.size);
        }

        let mut blitted = false;
        if !self.stopped {
            if let Some(frame) = self.core.run_slice()? {
                let blit = self.publish_frame(frame)?;
                if let Some(blits) = &self.blits {
                    blitted = blits.send(blit).is_ok();
                }
            }
        }

        Ok(CycleReport {
            input,
            uploads: uploads.len(),
            stopped: self.stopped,
            blitted,
        })
    }

    /// Cycle every `pace` until `running` is cleared or the UI goes away.
    pub fn run(&mut self, running: &AtomicBool, pace: Duration) -> Result<()> {
        while running.load(Ordering::Acquire) {
            match self.run_cycle() {
                Ok(_) => {}
                Err(e) if is_disconnect(&e) => {
                    info!("UI disconnected, worker stopping");
                    break;
                }
                Err(e) => return Err(e),
            }
            std::thread::sleep(pace);
        }
        info!("Worker stopped after {} cycles", self.cycles);
        Ok(())
    }

    fn drain_commands(&mut self) -> Result<(), TransportError> {
        let Some(commands) = self.commands.as_mut() else {
            return Ok(());
        };
        match commands.drain() {
            Ok(batch) => self.backlog.extend(batch),
            // Finish what the UI sent before it went away.
            Err(TransportError::Disconnected)
                if !self.backlog.is_empty() || self.input.has_pending() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn next_backlog_event(&mut self) -> Option<InputEvent> {
        match self.backlog.pop_front()? {
            FallbackCommand::Input { event } => Some(event),
            other => {
                self.backlog.push_front(other);
                None
            }
        }
    }

    fn next_backlog_upload(&mut self) -> Option<FileUpload> {
        match self.backlog.pop_front()? {
            FallbackCommand::UploadFile { upload } => Some(upload),
            other => {
                self.backlog.push_front(other);
                None
            }
        }
    }

    fn publish_frame(&self, frame: Frame) -> Result<VideoBlit, TransportError> {
        match &self.config.video {
            VideoConfig::SharedMemory(shared) => {
                shared.screen_buffer.write_at(0, &frame.data)?;
                let mut mode = [0u8; 12];
                mode[0..4].copy_from_slice(&frame.width.to_le_bytes());
                mode[4..8].copy_from_slice(&frame.height.to_le_bytes());
                mode[8..12].copy_from_slice(&frame.depth.to_le_bytes());
                shared.video_mode_buffer.write_at(0, &mode)?;
                Ok(VideoBlit::SharedMemory)
            }
            VideoConfig::Fallback => Ok(VideoBlit::Fallback {
                data: frame.data,
                width: frame.width,
                height: frame.height,
                depth: frame.depth,
                using_palette: frame.using_palette,
            }),
        }
    }
}

fn is_disconnect(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<TransportError>(),
        Some(TransportError::Disconnected)
    )
}
