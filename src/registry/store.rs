//! Stream registry and fan-out engine
//!
//! Process-wide map from stream key to live-stream state. One instance is
//! shared by every connection via `Arc`; nothing here is global.
//!
//! ```text
//!                       Arc<StreamRegistry>
//!                  ┌──────────────────────────┐
//!                  │ streams: HashMap<Key,    │
//!                  │   StreamEntry {          │
//!                  │     gop cache + headers, │
//!                  │     subscribers:         │
//!                  │       mpsc::Sender ...   │
//!                  │   }                      │
//!                  └────────────┬─────────────┘
//!                               │ publish_frame: try_send
//!              ┌────────────────┼────────────────┐
//!              ▼                ▼                ▼
//!        [RTMP player]    [RTMP player]    [HTTP-FLV viewer]
//! ```
//!
//! Each subscriber owns a bounded mpsc queue. Fan-out is non-blocking:
//! a full queue drops that subscriber on the spot, so a slow consumer
//! can never stall the publisher or its peers. Frame payloads are
//! refcounted `Bytes`, shared rather than copied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use crate::media::MediaFrame;

use super::config::RegistryConfig;
use super::entry::{StreamEntry, StreamEvent, Subscription};
use super::error::RegistryError;
use super::key::StreamKey;

/// Snapshot of one live stream for the control plane
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub app: String,
    pub name: String,
    pub subscribers: usize,
    pub gop_frames: usize,
    pub gop_bytes: usize,
}

/// Central registry for all live streams
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamKey, Arc<RwLock<StreamEntry>>>>,
    next_subscriber_id: AtomicU64,
    config: RegistryConfig,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Claim a stream key for a publisher, creating the stream.
    ///
    /// At most one publisher per key: a second claim fails with
    /// `StreamKeyInUse` and never displaces the existing publisher.
    pub async fn register_publisher(
        &self,
        key: &StreamKey,
        session_id: u64,
    ) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;

        if streams.contains_key(key) {
            return Err(RegistryError::StreamKeyInUse(key.clone()));
        }

        let entry = StreamEntry::new(key.clone(), session_id, &self.config);
        streams.insert(key.clone(), Arc::new(RwLock::new(entry)));

        tracing::info!(stream = %key, session_id, "publisher registered");
        Ok(())
    }

    /// Tear down a stream when its publisher disconnects.
    ///
    /// Every subscriber is notified with `PublisherEnded` and detached.
    /// The entry leaves the map before notification, so a racing second
    /// call is a no-op and notification happens exactly once.
    pub async fn remove_publisher(&self, key: &StreamKey, session_id: u64) {
        let removed = {
            let mut streams = self.streams.write().await;
            match streams.get(key) {
                Some(entry_arc) => {
                    let entry = entry_arc.read().await;
                    if entry.publisher_id != session_id {
                        tracing::warn!(
                            stream = %key,
                            expected = entry.publisher_id,
                            actual = session_id,
                            "publisher removal mismatch"
                        );
                        return;
                    }
                    drop(entry);
                    streams.remove(key)
                }
                None => None,
            }
        };

        if let Some(entry_arc) = removed {
            let mut entry = entry_arc.write().await;
            let subscribers = entry.subscriber_count();
            for (_, tx) in entry.subscribers.drain() {
                // A full queue here means the subscriber was about to be
                // dropped for backpressure anyway.
                let _ = tx.try_send(StreamEvent::PublisherEnded);
            }
            tracing::info!(stream = %key, session_id, subscribers, "stream removed");
        }
    }

    /// Attach a subscriber to a live stream.
    ///
    /// Returns the bounded event queue plus the catch-up frames (metadata,
    /// decoder configurations, then the cached GOP) that must be delivered
    /// before anything read from the queue. Never creates a stream.
    pub async fn subscribe(
        &self,
        key: &StreamKey,
    ) -> Result<(Subscription, Vec<MediaFrame>), RegistryError> {
        let entry_arc = {
            let streams = self.streams.read().await;
            streams
                .get(key)
                .cloned()
                .ok_or_else(|| RegistryError::StreamNotFound(key.clone()))?
        };

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);

        let mut entry = entry_arc.write().await;
        let catchup = entry.catchup_frames();
        entry.subscribers.insert(id, tx);

        tracing::info!(
            stream = %key,
            subscriber_id = id,
            subscribers = entry.subscriber_count(),
            catchup_frames = catchup.len(),
            "subscriber added"
        );

        Ok((Subscription { id, receiver: rx }, catchup))
    }

    /// Detach a subscriber. Safe to call after the stream is gone.
    pub async fn unsubscribe(&self, key: &StreamKey, subscriber_id: u64) {
        let entry_arc = {
            let streams = self.streams.read().await;
            streams.get(key).cloned()
        };

        if let Some(entry_arc) = entry_arc {
            let mut entry = entry_arc.write().await;
            if entry.subscribers.remove(&subscriber_id).is_some() {
                tracing::debug!(
                    stream = %key,
                    subscriber_id,
                    subscribers = entry.subscriber_count(),
                    "subscriber removed"
                );
            }
        }
    }

    /// Ingest one frame from the publisher and fan it out.
    ///
    /// Updates the stream's caches, then delivers to every subscriber
    /// queue with a non-blocking `try_send`. A subscriber whose queue is
    /// full is dropped immediately; its session observes a closed queue
    /// with no `PublisherEnded` and fails with a backpressure error.
    pub async fn publish_frame(&self, key: &StreamKey, frame: MediaFrame) {
        let entry_arc = {
            let streams = self.streams.read().await;
            match streams.get(key) {
                Some(arc) => arc.clone(),
                None => return,
            }
        };

        let mut entry = entry_arc.write().await;
        entry.cache_frame(&frame);

        let mut dropped: Vec<u64> = Vec::new();
        for (&id, tx) in entry.subscribers.iter() {
            match tx.try_send(StreamEvent::Frame(frame.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        stream = %key,
                        subscriber_id = id,
                        "subscriber queue full, dropping subscriber"
                    );
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(id);
                }
            }
        }
        for id in dropped {
            entry.subscribers.remove(&id);
        }
    }

    pub async fn stream_exists(&self, key: &StreamKey) -> bool {
        self.streams.read().await.contains_key(key)
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Read-only snapshot of every live stream, for the control plane.
    pub async fn snapshot(&self) -> Vec<StreamInfo> {
        let entries: Vec<Arc<RwLock<StreamEntry>>> =
            self.streams.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(entries.len());
        for entry_arc in entries {
            let entry = entry_arc.read().await;
            infos.push(StreamInfo {
                app: entry.key.app.clone(),
                name: entry.key.name.clone(),
                subscribers: entry.subscriber_count(),
                gop_frames: entry.gop.frame_count(),
                gop_bytes: entry.gop.byte_size(),
            });
        }
        infos.sort_by(|a, b| (&a.app, &a.name).cmp(&(&b.app, &b.name)));
        infos
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
