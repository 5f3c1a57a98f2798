/// Texture Inbox - hands decoded textures from loader threads to the render thread
///
/// Loader threads decode pixels and send them through a `TextureSender`; the
/// render thread drains the inbox between frames and creates the native
/// textures itself, so the device is only touched from one thread.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::{Error, Result};
use crate::graphics_device::TextureDesc;

/// A decoded texture waiting for creation
#[derive(Debug, Clone)]
pub struct TextureUpload {
    pub name: String,
    pub desc: TextureDesc,
}

/// Cloneable sending side, one per loader thread
#[derive(Clone)]
pub struct TextureSender {
    sender: Sender<TextureUpload>,
}

impl TextureSender {
    /// Queue a decoded texture
    ///
    /// Fails with `BackendError` once the inbox has been dropped.
    pub fn send(&self, name: impl Into<String>, desc: TextureDesc) -> Result<()> {
        let upload = TextureUpload { name: name.into(), desc };
        self.sender
            .send(upload)
            .map_err(|e| Error::BackendError(format!("Texture inbox closed, '{}' dropped", e.0.name)))
    }
}

/// Receiving side, owned by the render context
pub struct TextureInbox {
    sender: Sender<TextureUpload>,
    receiver: Receiver<TextureUpload>,
}

impl Default for TextureInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureInbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> TextureSender {
        TextureSender { sender: self.sender.clone() }
    }

    /// Take everything queued so far without blocking
    pub fn drain(&self) -> Vec<TextureUpload> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
#[path = "texture_inbox_tests.rs"]
mod tests;
