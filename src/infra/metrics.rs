//! Prometheus metrics for the underwriter pipeline.

use std::sync::Arc;

#[derive(prometheus_metric_storage::MetricStorage, Clone, Debug)]
#[metric(subsystem = "underwriter")]
pub struct Metrics {
    /// Swaps observed on the AMB feed and committed to the store.
    #[metric(labels("chain"))]
    pub swaps_observed: prometheus::IntCounterVec,

    /// Orders admitted into the pipeline.
    #[metric(labels("chain"))]
    pub orders_admitted: prometheus::IntCounterVec,

    /// Orders dropped before submission, by pipeline stage.
    #[metric(labels("chain", "stage"))]
    pub orders_dropped: prometheus::IntCounterVec,

    /// Underwrite transactions confirmed on chain.
    #[metric(labels("chain"))]
    pub underwrites_confirmed: prometheus::IntCounterVec,

    /// Approval transactions issued.
    #[metric(labels("chain"))]
    pub approvals_submitted: prometheus::IntCounterVec,
}

impl Metrics {
    /// Registers the metric family on the registry. Uses the `new`
    /// constructor generated by the storage derive.
    pub fn create(registry: &prometheus::Registry) -> Arc<Self> {
        Arc::new(Metrics::new(registry).expect("metrics register once per registry"))
    }
}

/// Renders a registry in the Prometheus text exposition format.
pub fn encode(registry: &prometheus::Registry) -> String {
    let mut buffer = String::new();
    let encoder = prometheus::TextEncoder::new();
    if let Err(err) = encoder.encode_utf8(&registry.gather(), &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
    }
    buffer
}
