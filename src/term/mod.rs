//! Terminal layer
//!
//! Everything that talks to the physical terminal without knowing about the
//! console or the editor: escape handling, raw input mode, keystroke
//! decoding and relative cursor motion.

pub mod ansi;
pub mod cursor;
pub mod input;
pub mod raw_mode;

#[cfg(test)]
pub mod screen;
