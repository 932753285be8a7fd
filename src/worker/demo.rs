//! A stand-in core that draws a cursor and logs what it receives

use anyhow::Result;
use tracing::info;

use crate::disk::ChunkedFileSpec;
use crate::input::{ButtonState, InputSnapshot};
use crate::persist::DirectoryExtraction;
use crate::transport::FileUpload;

use super::{EmulatorCore, FileKind, Frame};

const DEPTH: u32 = 32;

/// Tracks a pointer on a small RGBA canvas.
///
/// Each slice with changed state renders a frame with the pointer drawn as a
/// single pixel, white while the button is held and red otherwise.
pub struct DemoCore {
    width: u32,
    height: u32,
    x: i32,
    y: i32,
    pressed: bool,
    dirty: bool,
    files: Vec<String>,
    disks: Vec<String>,
}

impl DemoCore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            x: 0,
            y: 0,
            pressed: false,
            dirty: true,
            files: Vec::new(),
            disks: Vec::new(),
        }
    }

    /// Current pointer position
    pub fn pointer(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn disks(&self) -> &[String] {
        &self.disks
    }

    fn render(&self) -> Frame {
        let mut data = vec![0u8; (self.width * self.height * 4) as usize];
        let offset = ((self.y as u32 * self.width + self.x as u32) * 4) as usize;
        let color = if self.pressed {
            [0xff, 0xff, 0xff, 0xff]
        } else {
            [0xff, 0x00, 0x00, 0xff]
        };
        if let Some(pixel) = data.get_mut(offset..offset + 4) {
            pixel.copy_from_slice(&color);
        }
        Frame {
            data,
            width: self.width,
            height: self.height,
            depth: DEPTH,
            using_palette: false,
        }
    }
}

impl EmulatorCore for DemoCore {
    fn restore(&mut self, data: &DirectoryExtraction) -> Result<()> {
        for (path, _) in data.files() {
            self.files.push(path.to_string_lossy().into_owned());
        }
        Ok(())
    }

    fn add_file(&mut self, name: &str, _contents: &[u8], kind: FileKind) -> Result<()> {
        match kind {
            FileKind::DiskImage => self.disks.push(name.to_string()),
            FileKind::Plain => self.files.push(name.to_string()),
        }
        Ok(())
    }

    fn mount_disk(&mut self, spec: &ChunkedFileSpec) -> Result<()> {
        self.disks.push(spec.name.clone());
        Ok(())
    }

    fn handle_input(&mut self, input: &InputSnapshot) {
        if let Some((dx, dy)) = input.mouse_move {
            self.x = self.x.saturating_add(dx).clamp(0, self.width as i32 - 1);
            self.y = self.y.saturating_add(dy).clamp(0, self.height as i32 - 1);
            self.dirty = true;
        }
        match input.mouse_button {
            ButtonState::Pressed => self.pressed = true,
            ButtonState::Released => self.pressed = false,
            ButtonState::Unchanged => {}
        }
        if input.mouse_button != ButtonState::Unchanged {
            self.dirty = true;
        }
        if let Some(key) = input.key {
            info!(
                "Key {} {}",
                key.key_code,
                if key.pressed { "down" } else { "up" }
            );
        }
    }

    fn upload_file(&mut self, upload: &FileUpload) -> Result<()> {
        self.files.push(upload.name.clone());
        Ok(())
    }

    fn run_slice(&mut self) -> Result<Option<Frame>> {
        if !self.dirty {
            return Ok(None);
        }
        self.dirty = false;
        Ok(Some(self.render()))
    }
}
