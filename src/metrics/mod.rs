// Metrics module: cache counters, event history and Prometheus export
// Author: kelexine (https://github.com/kelexine)

mod collector;
mod registry;

pub use collector::{
    CacheEvent, CacheEventKind, CacheMetrics, EventSubscriber, MetricsCollector,
    MetricsSubscriber, SubscriptionId, MAX_EVENTS,
};
