//! Display sinks and keyboard input
//!
//! The present stage shows every frame and then polls for a key for a delay
//! derived from the source frame rate.

pub mod overlay;
mod terminal;

pub use terminal::{HeadlessDisplay, TerminalDisplay};

use async_trait::async_trait;
use std::time::Duration;

use crate::pipeline::types::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Escape,
}

impl KeyCode {
    /// `q`, `Q` or Esc
    pub fn is_quit(&self) -> bool {
        matches!(self, KeyCode::Escape | KeyCode::Char('q' | 'Q'))
    }

    /// `f` or `F`
    pub fn is_overlay_toggle(&self) -> bool {
        matches!(self, KeyCode::Char('f' | 'F'))
    }
}

/// Trait for the on-screen output of the present stage
#[async_trait]
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &Frame);

    /// Wait up to `delay` for a key press
    async fn wait_key(&mut self, delay: Duration) -> Option<KeyCode>;

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert!(KeyCode::Escape.is_quit());
        assert!(KeyCode::Char('Q').is_quit());
        assert!(!KeyCode::Char('f').is_quit());
        assert!(KeyCode::Char('F').is_overlay_toggle());
        assert!(!KeyCode::Escape.is_overlay_toggle());
    }
}
