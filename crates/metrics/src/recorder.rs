//! Per-activation metrics recorder.
//!
//! Each [`Metrics`] owns a private Prometheus recorder instead of installing
//! the process-global one, so repeated activations (and parallel tests) never
//! fight over global state. Writes go through `metrics::with_local_recorder`;
//! they only touch in-memory atomics and never block on I/O.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    metrics::{counter, gauge, histogram},
    metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder},
    tracing::debug,
};

use crate::{
    definitions::{buckets, config, events, fetch, http, labels, lifecycle, llm, runs},
    error::Result,
    snapshot::MetricsSnapshot,
};

/// Environment variable holding the installation identifier.
pub const INSTALLATION_ID_ENV: &str = "PARLEY_INSTALLATION_ID";

/// Identity labels attached to every exported series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceInfo {
    pub installation_id: String,
    pub plugin_version: String,
}

impl InstanceInfo {
    #[must_use]
    pub fn new(installation_id: impl Into<String>, plugin_version: impl Into<String>) -> Self {
        Self {
            installation_id: installation_id.into(),
            plugin_version: plugin_version.into(),
        }
    }

    /// Reads the installation id from [`INSTALLATION_ID_ENV`]; an unset
    /// variable yields an empty label rather than an error.
    #[must_use]
    pub fn from_env(plugin_version: impl Into<String>) -> Self {
        Self::new(
            std::env::var(INSTALLATION_ID_ENV).unwrap_or_default(),
            plugin_version,
        )
    }
}

/// Cheap-to-clone handle to one activation's metrics.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    instance: InstanceInfo,
    started: Instant,
}

impl Metrics {
    pub fn new(instance: InstanceInfo) -> Result<Self> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(http::REQUEST_DURATION_SECONDS.to_string()),
                &buckets::HTTP_DURATION,
            )?
            .set_buckets_for_metric(
                Matcher::Full(llm::REQUEST_DURATION_SECONDS.to_string()),
                &buckets::LLM_DURATION,
            )?
            .set_buckets_for_metric(
                Matcher::Full(fetch::DURATION_SECONDS.to_string()),
                &buckets::FETCH_DURATION,
            )?
            .set_buckets_for_metric(
                Matcher::Full(lifecycle::DEACTIVATION_DURATION_SECONDS.to_string()),
                &buckets::DRAIN_DURATION,
            )?
            .add_global_label(labels::INSTALLATION_ID, instance.installation_id.clone())
            .add_global_label(labels::PLUGIN_VERSION, instance.plugin_version.clone())
            .build_recorder();
        let handle = recorder.handle();

        debug!(
            installation_id = %instance.installation_id,
            plugin_version = %instance.plugin_version,
            "metrics recorder initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                recorder,
                handle,
                instance,
                started: Instant::now(),
            }),
        })
    }

    #[must_use]
    pub fn instance(&self) -> &InstanceInfo {
        &self.inner.instance
    }

    fn with<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.inner.recorder, f)
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    pub fn record_event(&self, kind: &'static str) {
        self.with(|| counter!(events::RECEIVED_TOTAL, labels::KIND => kind).increment(1));
    }

    pub fn record_event_dropped(&self, kind: &'static str, reason: &'static str) {
        self.with(|| {
            counter!(events::DROPPED_TOTAL, labels::KIND => kind, labels::REASON => reason)
                .increment(1);
        });
    }

    pub fn record_llm_request(&self, endpoint: &str, outcome: &'static str, elapsed: Duration) {
        let endpoint = endpoint.to_owned();
        self.with(|| {
            counter!(
                llm::REQUESTS_TOTAL,
                labels::ENDPOINT => endpoint.clone(),
                labels::OUTCOME => outcome
            )
            .increment(1);
            histogram!(llm::REQUEST_DURATION_SECONDS, labels::ENDPOINT => endpoint)
                .record(elapsed.as_secs_f64());
        });
    }

    pub fn record_llm_retry(&self, endpoint: &str, reason: &'static str) {
        let endpoint = endpoint.to_owned();
        self.with(|| {
            counter!(llm::RETRIES_TOTAL, labels::ENDPOINT => endpoint, labels::REASON => reason)
                .increment(1);
        });
    }

    pub fn record_llm_tokens(&self, endpoint: &str, model: &str, input: u64, output: u64) {
        let endpoint = endpoint.to_owned();
        let model = model.to_owned();
        self.with(|| {
            counter!(
                llm::INPUT_TOKENS_TOTAL,
                labels::ENDPOINT => endpoint.clone(),
                labels::MODEL => model.clone()
            )
            .increment(input);
            counter!(
                llm::OUTPUT_TOKENS_TOTAL,
                labels::ENDPOINT => endpoint,
                labels::MODEL => model
            )
            .increment(output);
        });
    }

    pub fn record_untrusted_fetch(&self, outcome: &'static str, elapsed: Duration) {
        self.with(|| {
            counter!(fetch::REQUESTS_TOTAL, labels::OUTCOME => outcome).increment(1);
            histogram!(fetch::DURATION_SECONDS).record(elapsed.as_secs_f64());
        });
    }

    /// `revision` is the active revision after the attempt.
    pub fn record_config_reload(&self, outcome: &'static str, revision: u64) {
        self.with(|| {
            counter!(config::RELOADS_TOTAL, labels::OUTCOME => outcome).increment(1);
            gauge!(config::REVISION).set(revision as f64);
        });
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let method = method.to_owned();
        let path = path.to_owned();
        self.with(|| {
            counter!(
                http::REQUESTS_TOTAL,
                labels::METHOD => method.clone(),
                labels::PATH => path.clone(),
                labels::STATUS => status.to_string()
            )
            .increment(1);
            histogram!(
                http::REQUEST_DURATION_SECONDS,
                labels::METHOD => method,
                labels::PATH => path
            )
            .record(elapsed.as_secs_f64());
        });
    }

    pub fn set_runs_in_flight(&self, count: usize) {
        self.with(|| gauge!(runs::IN_FLIGHT).set(count as f64));
    }

    pub fn record_run_finished(&self, outcome: &'static str) {
        self.with(|| counter!(runs::FINISHED_TOTAL, labels::OUTCOME => outcome).increment(1));
    }

    pub fn record_deactivation(&self, outcome: &'static str, elapsed: Duration) {
        self.with(|| {
            counter!(lifecycle::DEACTIVATIONS_TOTAL, labels::OUTCOME => outcome).increment(1);
            histogram!(lifecycle::DEACTIVATION_DURATION_SECONDS).record(elapsed.as_secs_f64());
        });
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Prometheus text exposition of every series recorded so far.
    #[must_use]
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Structured view of [`Self::render`] with per-category aggregates.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::from_prometheus_text(&self.render());
        snapshot.instance.installation_id = self.inner.instance.installation_id.clone();
        snapshot.instance.plugin_version = self.inner.instance.plugin_version.clone();
        snapshot.instance.uptime_seconds = self.inner.started.elapsed().as_secs_f64();
        snapshot
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("instance", &self.inner.instance)
            .finish_non_exhaustive()
    }
}
