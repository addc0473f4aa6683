// Prometheus registry and collectors for one metrics collector instance
// Author: kelexine (https://github.com/kelexine)

use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};

/// Prometheus mirror of the cache counters.
///
/// Each [`MetricsCollector`](super::MetricsCollector) owns its own registry, so
/// independent instances never collide on metric names.
pub(crate) struct PrometheusMetrics {
    registry: Registry,
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub stores: IntCounter,
    pub jail_updates: IntCounter,
    pub jail_promotions: IntCounter,
    pub errors: IntCounter,
    pub hit_rate: Gauge,
    pub avg_response_size: Gauge,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let hits = counter(&registry, "gencache_cache_hits_total", "Total cache hits")?;
        let misses = counter(&registry, "gencache_cache_misses_total", "Total cache misses")?;
        let stores = counter(
            &registry,
            "gencache_cache_stores_total",
            "Total responses written to the cache",
        )?;
        let jail_updates = counter(
            &registry,
            "gencache_jail_updates_total",
            "Total probationary responses recorded in jail",
        )?;
        let jail_promotions = counter(
            &registry,
            "gencache_jail_promotions_total",
            "Total jailed responses promoted into the cache",
        )?;
        let errors = counter(
            &registry,
            "gencache_cache_errors_total",
            "Total errors swallowed on the caching path",
        )?;

        let hit_rate = Gauge::with_opts(Opts::new(
            "gencache_cache_hit_rate",
            "Cache hits divided by lookups",
        ))?;
        registry.register(Box::new(hit_rate.clone()))?;

        let avg_response_size = Gauge::with_opts(Opts::new(
            "gencache_avg_response_size_bytes",
            "Mean size of hit and stored responses",
        ))?;
        registry.register(Box::new(avg_response_size.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            stores,
            jail_updates,
            jail_promotions,
            errors,
            hit_rate,
            avg_response_size,
        })
    }

    pub fn reset(&self) {
        for c in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.jail_updates,
            &self.jail_promotions,
            &self.errors,
        ] {
            c.reset();
        }
        self.hit_rate.set(0.0);
        self.avg_response_size.set(0.0);
    }

    /// Render all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}
