//! # Telemetry
//!
//! Components do not reach for a global logger. Each one is handed a
//! [`Telemetry`] at construction: a parent `tracing` span that its events
//! attach to, plus a shared set of Prometheus counters. The binary decides
//! where spans go (pretty, JSON, nowhere); tests hand in [`Telemetry::detached`].
//!
//! All counters live in a dedicated [`prometheus::Registry`] with the
//! `wallet_gateway` prefix, so they never collide with a default registry.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::Span;

/// Span + metrics handle passed into every component.
#[derive(Clone)]
pub struct Telemetry {
    span: Span,
    metrics: Arc<GatewayMetrics>,
}

impl Telemetry {
    pub fn new(span: Span, metrics: Arc<GatewayMetrics>) -> Self {
        Self { span, metrics }
    }

    /// No parent span and a private registry nobody scrapes.
    pub fn detached() -> Self {
        Self::new(Span::none(), Arc::new(GatewayMetrics::new()))
    }

    /// A child span for one component, sharing the same counters.
    pub fn component(&self, name: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", component = name),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("span", &self.span.metadata().map(|m| m.name()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counter handles for the gateway. Cheap to clone; every handle shares the
/// same underlying atomic.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    pub accounts_created_total: IntCounter,
    pub accounts_deleted_total: IntCounter,
    pub auth_failures_total: IntCounter,
    pub tokens_issued_total: IntCounter,
    pub claims_succeeded_total: IntCounter,
    pub claims_rejected_total: IntCounter,
    pub claims_reverted_total: IntCounter,
    pub transfers_published_total: IntCounter,
    pub transfers_failed_total: IntCounter,
    pub publish_failures_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

impl GatewayMetrics {
    /// Creates and registers all counters.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("wallet_gateway".into()), None)
            .expect("failed to create prometheus registry");

        Self {
            accounts_created_total: counter(
                &registry,
                "accounts_created_total",
                "Accounts created or imported",
            ),
            accounts_deleted_total: counter(
                &registry,
                "accounts_deleted_total",
                "Accounts deleted",
            ),
            auth_failures_total: counter(
                &registry,
                "auth_failures_total",
                "Authentication attempts that did not verify",
            ),
            tokens_issued_total: counter(
                &registry,
                "tokens_issued_total",
                "Session tokens issued",
            ),
            claims_succeeded_total: counter(
                &registry,
                "claims_succeeded_total",
                "Faucet claims that reached publication",
            ),
            claims_rejected_total: counter(
                &registry,
                "claims_rejected_total",
                "Faucet claims rejected by the ruleset",
            ),
            claims_reverted_total: counter(
                &registry,
                "claims_reverted_total",
                "Reserved faucet claims rolled back after a transfer failure",
            ),
            transfers_published_total: counter(
                &registry,
                "transfers_published_total",
                "Transactions published to the ledger",
            ),
            transfers_failed_total: counter(
                &registry,
                "transfers_failed_total",
                "Transfers abandoned before reaching the ledger",
            ),
            publish_failures_total: counter(
                &registry,
                "publish_failures_total",
                "Transactions persisted but not published",
            ),
            registry,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition
    /// format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_prefixed() {
        let metrics = GatewayMetrics::new();
        metrics.accounts_created_total.inc();
        metrics.accounts_created_total.inc();

        let text = metrics.encode();
        assert!(text.contains("wallet_gateway_accounts_created_total 2"));
        assert!(text.contains("wallet_gateway_publish_failures_total 0"));
    }

    #[test]
    fn components_share_counters() {
        let root = Telemetry::detached();
        let child = root.component("accounts");
        child.metrics().tokens_issued_total.inc();
        assert_eq!(root.metrics().tokens_issued_total.get(), 1);
    }
}
