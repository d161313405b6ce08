use std::sync::Arc;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::errors::{ExchangeError, Result};

/// Cloneable handle over the in-process Prometheus registry.
///
/// Scraping or pushing the registry content is out of scope here: an
/// external exporter is expected to read [`MetricsSink::registry`].
#[derive(Clone)]
pub struct MetricsSink {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    request_count: IntCounterVec,
    request_duration_ms: HistogramVec,
    health: IntGaugeVec,
}

impl MetricsSink {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let request_count = IntCounterVec::new(
            Opts::new("http_request_count", "Number of HTTP requests performed"),
            &["method"],
        )
        .map_err(to_invalid)?;
        let request_duration_ms = HistogramVec::new(
            HistogramOpts::new("http_request_duration_ms", "HTTP request duration")
                .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
            &["method"],
        )
        .map_err(to_invalid)?;
        let health = IntGaugeVec::new(
            Opts::new("venue_health", "Last observed venue health (1 = OK)"),
            &["venue"],
        )
        .map_err(to_invalid)?;
        registry
            .register(Box::new(request_count.clone()))
            .map_err(to_invalid)?;
        registry
            .register(Box::new(request_duration_ms.clone()))
            .map_err(to_invalid)?;
        registry.register(Box::new(health.clone())).map_err(to_invalid)?;
        Ok(MetricsSink {
            inner: Arc::new(Inner {
                registry,
                request_count,
                request_duration_ms,
                health,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn record_request(&self, method: &str, duration_ms: f64) {
        self.inner
            .request_count
            .with_label_values(&[method])
            .inc();
        self.inner
            .request_duration_ms
            .with_label_values(&[method])
            .observe(duration_ms);
    }

    pub fn record_health(&self, venue: &str, healthy: bool) {
        self.inner
            .health
            .with_label_values(&[venue])
            .set(i64::from(healthy));
    }
}

fn to_invalid(err: prometheus::Error) -> ExchangeError {
    ExchangeError::InvalidArgument(format!("metrics setup failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_without_panicking() {
        let sink = MetricsSink::new().unwrap();
        sink.record_request("GET", 42.0);
        sink.record_request("POST", 180.0);
        sink.record_health("kraken", true);
        let families = sink.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "http_request_count"));
    }
}
