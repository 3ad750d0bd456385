//! Rate-limited fan-out of encoded frames to network viewers
//!
//! Each subscriber owns a single-slot mailbox: a newer frame replaces one the
//! subscriber has not picked up yet, so a slow viewer only ever misses frames
//! and never holds up the broadcaster or the other viewers.

use bytes::Bytes;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::assets::STREAM_INTERVAL;
use crate::encoder::encode_jpeg;
use crate::pipeline::types::Frame;

type Slot = watch::Sender<Option<Bytes>>;

#[derive(Default)]
struct BroadcastState {
    subscribers: HashMap<u64, Slot>,
    latest: Option<Bytes>,
    last_sent: Option<Instant>,
    closed: bool,
}

pub struct BroadcastServer {
    interval: Duration,
    state: Mutex<BroadcastState>,
    next_id: AtomicU64,
}

impl BroadcastServer {
    pub fn new() -> Self {
        Self::with_interval(STREAM_INTERVAL)
    }

    /// Server accepting at most one broadcast per `interval`
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(BroadcastState::default()),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Encode `frame` and push it to every subscriber.
    ///
    /// Calls arriving less than one interval after the last accepted
    /// broadcast are skipped without encoding. Returns whether the frame
    /// was broadcast.
    pub fn broadcast(&self, frame: &Frame, quality: u8) -> bool {
        let now = Instant::now();
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if let Some(last) = state.last_sent
                && now.duration_since(last) < self.interval
            {
                return false;
            }
            state.last_sent = Some(now);
        }

        match encode_jpeg(frame, quality) {
            Ok(jpeg) => {
                self.publish(jpeg);
                true
            }
            Err(e) => {
                warn!("Broadcast: failed to encode frame: {e}");
                false
            }
        }
    }

    /// Cache an already encoded frame and hand it to every subscriber
    pub fn publish(&self, jpeg: Bytes) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.latest = Some(jpeg.clone());
        for slot in state.subscribers.values() {
            slot.send_replace(Some(jpeg.clone()));
        }
    }

    /// Register a new viewer. The cached latest frame, if any, is delivered
    /// first.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = watch::channel(None);

        let mut state = self.lock();
        let initial = state.latest.clone();
        if state.closed {
            drop(slot);
        } else {
            state.subscribers.insert(id, slot);
            debug!(
                "Broadcast: subscriber {id} connected ({} total)",
                state.subscribers.len()
            );
        }

        Subscription {
            id,
            initial,
            rx,
            server: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        if state.subscribers.remove(&id).is_some() {
            debug!(
                "Broadcast: subscriber {id} disconnected ({} left)",
                state.subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Most recently broadcast frame
    pub fn latest(&self) -> Option<Bytes> {
        self.lock().latest.clone()
    }

    /// End every subscription and refuse further broadcasts
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

impl Default for BroadcastServer {
    fn default() -> Self {
        Self::new()
    }
}

/// One viewer's view of the broadcast. Dropping it deregisters the viewer.
pub struct Subscription {
    id: u64,
    initial: Option<Bytes>,
    rx: watch::Receiver<Option<Bytes>>,
    server: Arc<BroadcastServer>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next frame for this viewer, or `None` once the server is closed
    pub async fn next(&mut self) -> Option<Bytes> {
        if let Some(frame) = self.initial.take() {
            return Some(frame);
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.server.unsubscribe(self.id);
    }
}
