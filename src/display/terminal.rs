use async_trait::async_trait;
use log::{debug, info};
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{DisplaySink, KeyCode};
use crate::pipeline::types::{Frame, Geometry};

const ESC: char = '\u{1b}';

fn key_for(ch: char) -> Option<KeyCode> {
    match ch {
        ESC => Some(KeyCode::Escape),
        c if c.is_ascii_graphic() => Some(KeyCode::Char(c)),
        _ => None,
    }
}

/// Reads keys from stdin on a dedicated thread.
///
/// The terminal is line buffered, so keys arrive once Enter is pressed.
fn stdin_key_listener() -> mpsc::Receiver<KeyCode> {
    let (sender, receiver) = mpsc::channel(20);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars().filter_map(key_for) {
                if sender.blocking_send(key).is_err() {
                    return;
                }
            }
        }
    });

    receiver
}

/// Console display: reports the stream geometry and takes keys from stdin
pub struct TerminalDisplay {
    title: String,
    keys: mpsc::Receiver<KeyCode>,
    keys_closed: bool,
    geometry: Option<Geometry>,
    shown: u64,
}

impl TerminalDisplay {
    pub fn new(title: &str) -> Self {
        Self::with_keys(title, stdin_key_listener())
    }

    pub fn with_keys(title: &str, keys: mpsc::Receiver<KeyCode>) -> Self {
        info!("{title}: press q or Esc then Enter to quit, f to toggle the FPS overlay");
        Self {
            title: title.to_string(),
            keys,
            keys_closed: false,
            geometry: None,
            shown: 0,
        }
    }
}

#[async_trait]
impl DisplaySink for TerminalDisplay {
    fn show(&mut self, frame: &Frame) {
        let geometry = frame.geometry();
        if self.geometry != Some(geometry) {
            info!("{}: showing {}", self.title, geometry);
            self.geometry = Some(geometry);
        }
        self.shown += 1;
    }

    async fn wait_key(&mut self, delay: Duration) -> Option<KeyCode> {
        if self.keys_closed {
            tokio::time::sleep(delay).await;
            return None;
        }
        match tokio::time::timeout(delay, self.keys.recv()).await {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                debug!("{}: key input closed", self.title);
                self.keys_closed = true;
                None
            }
            Err(_) => None,
        }
    }

    fn close(&mut self) {
        info!("{}: closed after {} frames", self.title, self.shown);
    }
}

/// Display that shows nothing and never reports a key
#[derive(Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, _frame: &Frame) {
        self.shown += 1;
    }

    async fn wait_key(&mut self, delay: Duration) -> Option<KeyCode> {
        tokio::time::sleep(delay).await;
        None
    }

    fn close(&mut self) {
        debug!("Headless display closed after {} frames", self.shown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parsing() {
        assert_eq!(key_for('q'), Some(KeyCode::Char('q')));
        assert_eq!(key_for(ESC), Some(KeyCode::Escape));
        assert_eq!(key_for(' '), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_key_times_out() {
        let (_tx, rx) = mpsc::channel(1);
        let mut display = TerminalDisplay::with_keys("test", rx);
        assert_eq!(display.wait_key(Duration::from_millis(33)).await, None);
    }

    #[tokio::test]
    async fn test_wait_key_delivers_key() {
        let (tx, rx) = mpsc::channel(1);
        let mut display = TerminalDisplay::with_keys("test", rx);
        tx.send(KeyCode::Char('f')).await.unwrap();
        assert_eq!(
            display.wait_key(Duration::from_secs(1)).await,
            Some(KeyCode::Char('f'))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_still_waits() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let mut display = TerminalDisplay::with_keys("test", rx);

        let started = tokio::time::Instant::now();
        assert_eq!(display.wait_key(Duration::from_millis(50)).await, None);
        assert_eq!(display.wait_key(Duration::from_millis(50)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
