//! Metrics collection and export for parley.
//!
//! Every activation owns one [`Metrics`] handle backed by a private Prometheus
//! recorder. Series carry the `installation_id` and `plugin_version` global
//! labels.
//!
//! ```rust,ignore
//! use parley_metrics::{InstanceInfo, Metrics, outcome};
//!
//! let metrics = Metrics::new(InstanceInfo::from_env(env!("CARGO_PKG_VERSION")))?;
//! metrics.record_event("posted");
//! metrics.record_llm_request("openai", outcome::SUCCESS, elapsed);
//! let text = metrics.render();
//! ```

mod definitions;
pub mod error;
mod recorder;
mod snapshot;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{INSTALLATION_ID_ENV, InstanceInfo, Metrics},
    snapshot::{
        CategoryMetrics, ConfigMetrics, EndpointMetrics, EventMetrics, InstanceSnapshot,
        LlmCategoryMetrics, MetricCategories, MetricSnapshot, MetricType, MetricsSnapshot,
        RunMetrics,
    },
};
