//! Metric name and label definitions.
//!
//! Every series parley exports is named here, so the recorder, the snapshot
//! parser and dashboards agree on one vocabulary.

/// Chat event intake
pub mod events {
    /// Events received from the host, by kind
    pub const RECEIVED_TOTAL: &str = "parley_events_total";
    /// Events ignored before any work was scheduled, by kind and reason
    pub const DROPPED_TOTAL: &str = "parley_events_dropped_total";
}

/// Orchestration runs (one per answered post)
pub mod runs {
    /// Runs currently scheduled or executing
    pub const IN_FLIGHT: &str = "parley_runs_in_flight";
    /// Finished runs by outcome
    pub const FINISHED_TOTAL: &str = "parley_runs_finished_total";
}

/// Upstream LLM calls
pub mod llm {
    /// Completion requests by endpoint and outcome
    pub const REQUESTS_TOTAL: &str = "parley_llm_requests_total";
    /// Completion request duration in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "parley_llm_request_duration_seconds";
    /// Retries scheduled after a transient failure
    pub const RETRIES_TOTAL: &str = "parley_llm_retries_total";
    /// Prompt tokens reported by the upstream
    pub const INPUT_TOKENS_TOTAL: &str = "parley_llm_input_tokens_total";
    /// Completion tokens reported by the upstream
    pub const OUTPUT_TOKENS_TOTAL: &str = "parley_llm_output_tokens_total";
}

/// Untrusted resource fetches
pub mod fetch {
    /// Fetches by outcome
    pub const REQUESTS_TOTAL: &str = "parley_untrusted_fetches_total";
    /// Fetch duration in seconds
    pub const DURATION_SECONDS: &str = "parley_untrusted_fetch_duration_seconds";
}

/// Configuration reloads
pub mod config {
    /// Reload attempts by outcome
    pub const RELOADS_TOTAL: &str = "parley_config_reloads_total";
    /// Revision of the active snapshot
    pub const REVISION: &str = "parley_config_revision";
}

/// Plugin HTTP surface
pub mod http {
    /// Requests handled by method, normalized path and status
    pub const REQUESTS_TOTAL: &str = "parley_http_requests_total";
    /// Request duration in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "parley_http_request_duration_seconds";
}

/// Plugin lifecycle
pub mod lifecycle {
    /// Deactivations by outcome
    pub const DEACTIVATIONS_TOTAL: &str = "parley_deactivations_total";
    /// Time spent draining in-flight runs during deactivation
    pub const DEACTIVATION_DURATION_SECONDS: &str = "parley_deactivation_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const INSTALLATION_ID: &str = "installation_id";
    pub const PLUGIN_VERSION: &str = "plugin_version";
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
    pub const OUTCOME: &str = "outcome";
    pub const ENDPOINT: &str = "endpoint";
    pub const MODEL: &str = "model";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const STATUS: &str = "status";
}

/// Values for the `outcome` label
pub mod outcome {
    pub const SUCCESS: &str = "success";
    /// Failed after exhausting retries on a transient error
    pub const TRANSIENT_ERROR: &str = "transient_error";
    pub const PERMANENT_ERROR: &str = "permanent_error";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const CANCELLED: &str = "cancelled";
    /// Superseded by a newer run for the same post
    pub const SUPERSEDED: &str = "superseded";
    pub const BLOCKED: &str = "blocked";
    pub const REJECTED: &str = "rejected";
    pub const TIMEOUT: &str = "timeout";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// HTTP request duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub static HTTP_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// LLM request duration buckets (in seconds)
    /// Covers 100ms to the 10 minute trusted ceiling
    pub static LLM_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Untrusted fetch duration buckets (in seconds)
    /// Covers 10ms to 60s
    pub static FETCH_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// Deactivation drain buckets (in seconds)
    pub static DRAIN_DURATION: Lazy<Vec<f64>> =
        Lazy::new(|| vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]);
}
