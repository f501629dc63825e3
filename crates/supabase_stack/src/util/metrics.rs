use crate::stack::ServiceName;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder,
};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub deployments: IntCounter,
    pub failures: IntCounterVec,
    pub tier_duration: HistogramVec,
    registry: Registry,
}

impl Default for Metrics {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        let tier_duration = HistogramVec::new(
            histogram_opts!(
                "supabase_deploy_tier_duration_seconds",
                "The duration of applying and health gating one dependency tier in seconds",
            )
            .buckets(vec![0.1, 0.5, 1., 5., 15., 60., 180., 300.]),
            &["tier"],
        )
        .expect("static histogram options are valid");
        let failures = IntCounterVec::new(
            opts!("supabase_deploy_service_failures_total", "services that failed to deploy"),
            &["service", "reason"],
        )
        .expect("static counter options are valid");
        let deployments = IntCounter::new("supabase_deployments_total", "deploy invocations")
            .expect("static counter options are valid");
        Metrics {
            deployments,
            failures,
            tier_duration,
            registry: Registry::new(),
        }
    }
}

impl Metrics {
    /// Register deployment metrics to start tracking them.
    pub fn register(self) -> Result<Self, prometheus::Error> {
        self.registry.register(Box::new(self.tier_duration.clone()))?;
        self.registry.register(Box::new(self.failures.clone()))?;
        self.registry.register(Box::new(self.deployments.clone()))?;
        Ok(self)
    }

    pub fn service_failure(&self, service: ServiceName, reason: &str) {
        self.failures.with_label_values(&[service.as_str(), reason]).inc()
    }

    pub fn measure_tier(&self, tier: usize) -> TierMeasurer {
        TierMeasurer {
            start: Instant::now(),
            metric: self.tier_duration.clone(),
            tier: tier.to_string(),
        }
    }

    /// Text exposition of everything registered, for the node-exporter textfile collector.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct TierMeasurer {
    start: Instant,
    metric: HistogramVec,
    tier: String,
}

impl Drop for TierMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[self.tier.as_str()]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        let metrics = Metrics::default().register().unwrap();
        metrics.deployments.inc();
        metrics.service_failure(ServiceName::Postgres, "health_timeout");
        drop(metrics.measure_tier(0));

        let text = metrics.encode().unwrap();
        assert!(text.contains("supabase_deployments_total 1"));
        assert!(text.contains("service=\"postgres\""));
        assert!(text.contains("supabase_deploy_tier_duration_seconds_count{tier=\"0\"} 1"));
    }
}
