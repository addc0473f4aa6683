// Cache metrics collector with bounded event history and subscribers
// Author: kelexine (https://github.com/kelexine)

use super::registry::PrometheusMetrics;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Most recent events kept for introspection.
pub const MAX_EVENTS: usize = 1000;

/// What happened on the caching path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Store,
    JailUpdate,
    JailPromotion,
    Uncacheable,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub key: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub successful_caches: u64,
    pub problematic_responses: u64,
    pub jail_promotions: u64,
    pub cache_errors: u64,
    pub hit_rate: f64,
    pub avg_response_size: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

pub type MetricsSubscriber = Box<dyn Fn(&CacheMetrics) + Send + Sync>;
pub type EventSubscriber = Box<dyn Fn(&CacheEvent) + Send + Sync>;

/// Handle returned by the `subscribe_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct State {
    metrics: CacheMetrics,
    size_total: u64,
    size_samples: u64,
    events: VecDeque<CacheEvent>,
}

/// Counters, derived rates and recent events for one cache instance.
///
/// Updates are synchronous; subscribers run on the recording thread after the
/// state lock is released, and a panicking subscriber is logged and skipped.
pub struct MetricsCollector {
    enabled: bool,
    state: Mutex<State>,
    prometheus: PrometheusMetrics,
    metrics_subscribers: RwLock<Vec<(SubscriptionId, MetricsSubscriber)>>,
    event_subscribers: RwLock<Vec<(SubscriptionId, EventSubscriber)>>,
    next_subscription: AtomicU64,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Result<Self> {
        Ok(Self {
            enabled,
            state: Mutex::new(State::default()),
            prometheus: PrometheusMetrics::new()?,
            metrics_subscribers: RwLock::new(Vec::new()),
            event_subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_hit(&self, key: &str, size: usize) {
        self.record(CacheEventKind::Hit, key, Some(size), None);
    }

    pub fn record_miss(&self, key: &str) {
        self.record(CacheEventKind::Miss, key, None, None);
    }

    pub fn record_store(&self, key: &str, size: usize) {
        self.record(CacheEventKind::Store, key, Some(size), None);
    }

    pub fn record_jail_update(&self, key: &str, count: u32) {
        self.record(
            CacheEventKind::JailUpdate,
            key,
            None,
            Some(format!("count={}", count)),
        );
    }

    pub fn record_jail_promotion(&self, key: &str, count: u32) {
        self.record(
            CacheEventKind::JailPromotion,
            key,
            None,
            Some(format!("count={}", count)),
        );
    }

    pub fn record_uncacheable(&self, key: &str, reason: &str) {
        self.record(
            CacheEventKind::Uncacheable,
            key,
            None,
            Some(reason.to_string()),
        );
    }

    pub fn record_error(&self, key: &str, detail: &str) {
        self.record(CacheEventKind::Error, key, None, Some(detail.to_string()));
    }

    fn record(&self, kind: CacheEventKind, key: &str, size: Option<usize>, detail: Option<String>) {
        if !self.enabled {
            return;
        }

        let event = CacheEvent {
            kind,
            key: key.to_string(),
            timestamp: Utc::now(),
            size,
            detail,
        };

        let snapshot = {
            let mut state = self.state.lock();
            self.apply(&mut state, &event);

            state.events.push_back(event.clone());
            while state.events.len() > MAX_EVENTS {
                state.events.pop_front();
            }
            state.metrics.clone()
        };

        self.notify(&snapshot, &event);
    }

    fn apply(&self, state: &mut State, event: &CacheEvent) {
        let m = &mut state.metrics;
        match event.kind {
            CacheEventKind::Hit => {
                m.hits += 1;
                self.prometheus.hits.inc();
            }
            CacheEventKind::Miss => {
                m.misses += 1;
                self.prometheus.misses.inc();
            }
            CacheEventKind::Store => {
                m.successful_caches += 1;
                self.prometheus.stores.inc();
            }
            CacheEventKind::JailUpdate => {
                m.problematic_responses += 1;
                self.prometheus.jail_updates.inc();
            }
            CacheEventKind::JailPromotion => {
                m.jail_promotions += 1;
                self.prometheus.jail_promotions.inc();
            }
            CacheEventKind::Error => {
                m.cache_errors += 1;
                self.prometheus.errors.inc();
            }
            CacheEventKind::Uncacheable => {}
        }

        if matches!(event.kind, CacheEventKind::Hit | CacheEventKind::Miss) {
            let lookups = m.hits + m.misses;
            m.hit_rate = if lookups == 0 {
                0.0
            } else {
                m.hits as f64 / lookups as f64
            };
            self.prometheus.hit_rate.set(m.hit_rate);
        }

        if let Some(size) = event.size {
            state.size_total += size as u64;
            state.size_samples += 1;
            m.avg_response_size = state.size_total as f64 / state.size_samples as f64;
            self.prometheus.avg_response_size.set(m.avg_response_size);
        }

        m.last_updated = Some(event.timestamp);
    }

    fn notify(&self, snapshot: &CacheMetrics, event: &CacheEvent) {
        for (_, subscriber) in self.metrics_subscribers.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(snapshot))).is_err() {
                error!("Metrics subscriber panicked; continuing");
            }
        }
        for (_, subscriber) in self.event_subscribers.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                error!("Event subscriber panicked; continuing");
            }
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }

    /// Up to `limit` of the most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<CacheEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    /// Clear all counters and history.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = State::default();
        self.prometheus.reset();
    }

    /// Called with the updated counters after every recorded event.
    pub fn subscribe_metrics<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&CacheMetrics) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.metrics_subscribers.write().push((id, Box::new(subscriber)));
        id
    }

    /// Called with every recorded event.
    pub fn subscribe_events<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.event_subscribers.write().push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.metrics_subscribers.write().retain(|(sid, _)| *sid != id);
        self.event_subscribers.write().retain(|(sid, _)| *sid != id);
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    /// Prometheus text exposition of the counters.
    pub fn export_prometheus(&self) -> Result<String> {
        // Hold the state lock so a concurrent reset is never half-visible
        let _state = self.state.lock();
        Ok(self.prometheus.gather()?)
    }
}
