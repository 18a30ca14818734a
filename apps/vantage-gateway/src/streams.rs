//! Per-device frame fan-out and the latest-frame cache.

use std::collections::HashMap;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Latest JPEG frame per device. Readers get a cheap clone of the shared
/// buffer; a concurrent store swaps the slot without touching it.
#[derive(Default)]
pub struct FrameStore {
    frames: RwLock<HashMap<String, Bytes>>,
}

impl FrameStore {
    pub async fn store(&self, device_id: &str, frame: Bytes) {
        let mut frames = self.frames.write().await;
        frames.insert(device_id.to_string(), frame);
    }

    pub async fn snapshot(&self, device_id: &str) -> Option<Bytes> {
        let frames = self.frames.read().await;
        frames.get(device_id).cloned()
    }
}

/// Live fan-out of frames to attached viewers, one broadcast channel per
/// device. A slow viewer skips frames instead of stalling the rest.
pub struct StreamHub {
    streams: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Attaches a viewer to the device's stream, creating it on first use.
    pub fn attach(&self, device_id: &str) -> StreamSession {
        let rx = self
            .streams
            .entry(device_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let session = StreamSession {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            rx,
        };
        debug!(device_id, session_id = %session.id, "viewer attached");
        session
    }

    /// Fans a frame out to every attached viewer. Returns how many viewer
    /// queues accepted it; frames for devices without viewers are dropped.
    pub fn broadcast(&self, device_id: &str, frame: Bytes) -> usize {
        match self.streams.get(device_id) {
            Some(tx) => tx.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    pub fn viewer_count(&self, device_id: &str) -> usize {
        self.streams
            .get(device_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// One viewer's subscription to a device stream.
pub struct StreamSession {
    id: Uuid,
    device_id: String,
    rx: broadcast::Receiver<Bytes>,
}

impl StreamSession {
    /// Next frame for this viewer. A lagging session drops the oldest
    /// frames and keeps going; `None` means the stream is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        device_id = %self.device_id,
                        session_id = %self.id,
                        skipped,
                        "viewer lagging, dropping frames"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        debug!(device_id = %self.device_id, session_id = %self.id, "viewer detached");
    }
}
