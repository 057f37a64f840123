//! Clipboard access for paste

use tracing::debug;

/// Something that can hand out text to paste
pub trait ClipboardSource {
    fn text(&mut self) -> Option<String>;
}

/// The system clipboard, opened on first use
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSource for SystemClipboard {
    fn text(&mut self) -> Option<String> {
        if self.inner.is_none() {
            match arboard::Clipboard::new() {
                Ok(clipboard) => self.inner = Some(clipboard),
                Err(e) => {
                    debug!("clipboard unavailable: {}", e);
                    return None;
                }
            }
        }
        let clipboard = self.inner.as_mut()?;
        match clipboard.get_text() {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("clipboard has no text: {}", e);
                None
            }
        }
    }
}
