//! Polling/stream bridge: one task, one timer and one one-way channel per
//! connected client.
//!
//! Every tick the bridge reads the newest entries of its scope's fan-out
//! cache key, keeps the envelopes newer than its watermark and sends them as
//! one batch. The task ends when the client goes away or the connection
//! reaches its lifetime ceiling, whichever happens first.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::{ChatEnvelope, ChatScope};
use crate::cache::FanoutCache;
use crate::config::StreamConfig;

/// Events sent to the client, serialized as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected,
    Update { messages: Vec<ChatEnvelope> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientGone,
    LifetimeElapsed,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub poll_interval: Duration,
    pub max_lifetime: Duration,
    /// Newest cache entries inspected per tick.
    pub batch_size: usize,
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl From<&StreamConfig> for BridgeSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            // A zero period would panic the ticker.
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            max_lifetime: config.max_lifetime(),
            batch_size: config.batch_size.max(1),
        }
    }
}

pub struct Bridge {
    cache: Arc<FanoutCache>,
    scope: ChatScope,
    settings: BridgeSettings,
    phase: Phase,
    watermark: i64,
}

impl Bridge {
    pub fn new(cache: Arc<FanoutCache>, scope: ChatScope, settings: BridgeSettings) -> Self {
        Self {
            cache,
            scope,
            settings,
            phase: Phase::Connecting,
            watermark: now_ms(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// One tick: read the cache, pick fresh envelopes, advance the watermark
    /// when something is emitted. Cache failures count as "nothing new".
    pub async fn poll(&mut self) -> Option<Vec<ChatEnvelope>> {
        let read_at = now_ms();
        let stop = isize::try_from(self.settings.batch_size)
            .unwrap_or(isize::MAX)
            .saturating_sub(1);

        let raw = match self.cache.range(self.scope.cache_key(), 0, stop).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(scope = %self.scope, error = %e, "Chat stream cache read failed");
                return None;
            }
        };

        let fresh = select_fresh(&raw, self.watermark);
        if fresh.is_empty() {
            return None;
        }

        let newest = fresh
            .iter()
            .filter_map(ChatEnvelope::logical_time)
            .max()
            .unwrap_or(read_at);
        self.watermark = read_at.max(newest);
        Some(fresh)
    }

    /// Drive the connection until the client disconnects or the lifetime
    /// ceiling is reached. `tx` is dropped exactly once, on return.
    pub async fn run(mut self, tx: mpsc::Sender<StreamEvent>) -> CloseReason {
        let deadline = Instant::now() + self.settings.max_lifetime;

        let reason = if tx.send(StreamEvent::Connected).await.is_err() {
            CloseReason::ClientGone
        } else {
            self.phase = Phase::Open;
            tracing::debug!(scope = %self.scope, "Chat stream open");

            let period = self.settings.poll_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tx.closed() => break CloseReason::ClientGone,
                    _ = tokio::time::sleep_until(deadline) => break CloseReason::LifetimeElapsed,
                    _ = ticker.tick() => {
                        if let Some(messages) = self.poll().await {
                            if tx.send(StreamEvent::Update { messages }).await.is_err() {
                                break CloseReason::ClientGone;
                            }
                        }
                    }
                }
            }
        };

        self.phase = Phase::Closed;
        drop(tx);
        tracing::debug!(scope = %self.scope, ?reason, "Chat stream closed");
        reason
    }
}

/// Start a bridge task for one client and hand back its event channel.
pub fn spawn(
    cache: Arc<FanoutCache>,
    scope: ChatScope,
    settings: BridgeSettings,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(Bridge::new(cache, scope, settings).run(tx));
    rx
}

/// Parse raw cache entries and keep those strictly newer than `watermark`,
/// oldest first. Entries that do not parse are skipped.
pub fn select_fresh(raw: &[String], watermark: i64) -> Vec<ChatEnvelope> {
    let mut fresh: Vec<(i64, ChatEnvelope)> = raw
        .iter()
        .filter_map(|entry| match serde_json::from_str::<ChatEnvelope>(entry) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::debug!("Skipping unreadable cache entry: {}", e);
                None
            }
        })
        .filter_map(|envelope| {
            let at = envelope.logical_time()?;
            (at > watermark).then_some((at, envelope))
        })
        .collect();

    fresh.sort_by_key(|(at, envelope)| (*at, envelope.message.id));
    fresh.into_iter().map(|(_, envelope)| envelope).collect()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
