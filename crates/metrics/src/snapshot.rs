//! Metrics snapshot for the JSON summary endpoint.
//!
//! Parsed from the Prometheus text the recorder renders, so the summary and
//! the scrape endpoint always describe the same state.

use {
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

use crate::definitions::{config, events, fetch, http, labels, llm, outcome, runs};

/// Type of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// A single series value with its labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub labels: HashMap<String, String>,
    pub value: f64,
}

/// A complete snapshot of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Timestamp when the snapshot was taken (Unix millis)
    pub timestamp: u64,
    pub instance: InstanceSnapshot,
    /// Every series except histogram buckets
    pub metrics: Vec<MetricSnapshot>,
    pub categories: MetricCategories,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub installation_id: String,
    pub plugin_version: String,
    pub uptime_seconds: f64,
}

/// Aggregates per concern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricCategories {
    pub events: EventMetrics,
    pub runs: RunMetrics,
    pub llm: LlmCategoryMetrics,
    pub fetch: CategoryMetrics,
    pub http: CategoryMetrics,
    pub config: ConfigMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetrics {
    pub received: u64,
    pub dropped: u64,
    pub by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub in_flight: u64,
    pub finished: u64,
    pub by_outcome: HashMap<String, u64>,
}

/// Generic category metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub total: u64,
    pub errors: u64,
    pub avg_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCategoryMetrics {
    pub requests: u64,
    pub errors: u64,
    pub retries: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_duration_seconds: Option<f64>,
    pub by_endpoint: HashMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub errors: u64,
    pub retries: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigMetrics {
    pub reloads: u64,
    pub rejected: u64,
    pub revision: u64,
}

/// Running `_sum`/`_count` pair for one histogram family.
#[derive(Default)]
struct Durations {
    sum: f64,
    count: f64,
}

impl Durations {
    fn average(&self) -> Option<f64> {
        (self.count > 0.0).then(|| self.sum / self.count)
    }
}

impl MetricsSnapshot {
    /// Create a new empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            instance: InstanceSnapshot::default(),
            metrics: Vec::new(),
            categories: MetricCategories::default(),
        }
    }

    /// Parse Prometheus text format into a structured snapshot.
    ///
    /// Best effort: lines that do not parse are skipped.
    #[must_use]
    pub fn from_prometheus_text(text: &str) -> Self {
        let mut snapshot = Self::new();
        let mut durations: HashMap<String, Durations> = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(metric) = parse_prometheus_line(line) else {
                continue;
            };

            if metric.metric_type == MetricType::Histogram {
                if let Some(family) = metric.name.strip_suffix("_sum") {
                    durations.entry(family.to_string()).or_default().sum += metric.value;
                } else if let Some(family) = metric.name.strip_suffix("_count") {
                    durations.entry(family.to_string()).or_default().count += metric.value;
                }
            } else {
                update_categories(&mut snapshot.categories, &metric);
            }

            if snapshot.instance.installation_id.is_empty()
                && let Some(id) = metric.labels.get(labels::INSTALLATION_ID)
            {
                snapshot.instance.installation_id = id.clone();
            }
            if snapshot.instance.plugin_version.is_empty()
                && let Some(version) = metric.labels.get(labels::PLUGIN_VERSION)
            {
                snapshot.instance.plugin_version = version.clone();
            }

            snapshot.metrics.push(metric);
        }

        let avg = |name: &str| durations.get(name).and_then(Durations::average);
        snapshot.categories.llm.avg_duration_seconds = avg(llm::REQUEST_DURATION_SECONDS);
        snapshot.categories.fetch.avg_duration_seconds = avg(fetch::DURATION_SECONDS);
        snapshot.categories.http.avg_duration_seconds = avg(http::REQUEST_DURATION_SECONDS);

        snapshot
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a single Prometheus metric line: `name{k="v",...} value`.
fn parse_prometheus_line(line: &str) -> Option<MetricSnapshot> {
    let (name_and_labels, value_str) = line.rsplit_once(' ')?;
    let value: f64 = value_str.parse().ok()?;

    let (name, labels) = match name_and_labels.find('{') {
        Some(brace_start) => {
            let labels_str = name_and_labels
                .get(brace_start + 1..)?
                .strip_suffix('}')?;
            (&name_and_labels[..brace_start], parse_labels(labels_str))
        },
        None => (name_and_labels, HashMap::new()),
    };

    let metric_type = if name.ends_with("_bucket") {
        return None;
    } else if name.ends_with("_sum") || name.ends_with("_count") {
        MetricType::Histogram
    } else if name.ends_with("_total") {
        MetricType::Counter
    } else {
        MetricType::Gauge
    };

    Some(MetricSnapshot {
        name: name.to_string(),
        metric_type,
        labels,
        value,
    })
}

/// Parse Prometheus label format: `key1="value1",key2="value2"`.
///
/// Quoted values may contain commas and `\"`, `\\`, `\n` escapes.
fn parse_labels(labels_str: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    let mut chars = labels_str.chars().peekable();

    loop {
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().trim_start_matches(',').trim();
        if key.is_empty() || chars.next() != Some('"') {
            break;
        }

        let mut value = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some(other) => value.push(other),
                    None => break,
                },
                '"' => break,
                _ => value.push(c),
            }
        }
        labels.insert(key.to_string(), value);

        if chars.peek() == Some(&',') {
            chars.next();
        }
    }

    labels
}

fn is_failure(metric: &MetricSnapshot) -> bool {
    metric
        .labels
        .get(labels::OUTCOME)
        .is_some_and(|o| o != outcome::SUCCESS)
}

fn as_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

/// Update category aggregates based on a metric
fn update_categories(categories: &mut MetricCategories, metric: &MetricSnapshot) {
    let value = as_count(metric.value);
    let endpoint = metric.labels.get(labels::ENDPOINT).cloned();

    match metric.name.as_str() {
        events::RECEIVED_TOTAL => {
            categories.events.received += value;
            if let Some(kind) = metric.labels.get(labels::KIND) {
                *categories.events.by_kind.entry(kind.clone()).or_default() += value;
            }
        },
        events::DROPPED_TOTAL => categories.events.dropped += value,
        runs::IN_FLIGHT => categories.runs.in_flight = value,
        runs::FINISHED_TOTAL => {
            categories.runs.finished += value;
            if let Some(o) = metric.labels.get(labels::OUTCOME) {
                *categories.runs.by_outcome.entry(o.clone()).or_default() += value;
            }
        },
        llm::REQUESTS_TOTAL => {
            let failed = is_failure(metric);
            categories.llm.requests += value;
            if failed {
                categories.llm.errors += value;
            }
            if let Some(endpoint) = endpoint {
                let entry = categories.llm.by_endpoint.entry(endpoint).or_default();
                entry.requests += value;
                if failed {
                    entry.errors += value;
                }
            }
        },
        llm::RETRIES_TOTAL => {
            categories.llm.retries += value;
            if let Some(endpoint) = endpoint {
                categories.llm.by_endpoint.entry(endpoint).or_default().retries += value;
            }
        },
        llm::INPUT_TOKENS_TOTAL => {
            categories.llm.input_tokens += value;
            if let Some(endpoint) = endpoint {
                categories.llm.by_endpoint.entry(endpoint).or_default().input_tokens += value;
            }
        },
        llm::OUTPUT_TOKENS_TOTAL => {
            categories.llm.output_tokens += value;
            if let Some(endpoint) = endpoint {
                categories.llm.by_endpoint.entry(endpoint).or_default().output_tokens += value;
            }
        },
        fetch::REQUESTS_TOTAL => {
            categories.fetch.total += value;
            if is_failure(metric) {
                categories.fetch.errors += value;
            }
        },
        http::REQUESTS_TOTAL => {
            categories.http.total += value;
            if metric
                .labels
                .get(labels::STATUS)
                .is_some_and(|s| s.starts_with('5'))
            {
                categories.http.errors += value;
            }
        },
        config::RELOADS_TOTAL => {
            categories.config.reloads += value;
            if metric.labels.get(labels::OUTCOME).map(String::as_str) == Some(outcome::REJECTED) {
                categories.config.rejected += value;
            }
        },
        config::REVISION => categories.config.revision = value,
        _ => {},
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prometheus_line_simple() {
        let metric = parse_prometheus_line("parley_events_total 42").unwrap();
        assert_eq!(metric.name, "parley_events_total");
        assert_eq!(metric.value, 42.0);
        assert!(metric.labels.is_empty());
        assert_eq!(metric.metric_type, MetricType::Counter);
    }

    #[test]
    fn labels_with_commas_and_escapes() {
        let metric = parse_prometheus_line(
            r#"parley_http_requests_total{method="GET",path="/a,b",note="say \"hi\""} 3"#,
        )
        .unwrap();
        assert_eq!(metric.labels["method"], "GET");
        assert_eq!(metric.labels["path"], "/a,b");
        assert_eq!(metric.labels["note"], "say \"hi\"");
    }

    #[test]
    fn buckets_are_skipped() {
        assert!(
            parse_prometheus_line(r#"parley_llm_request_duration_seconds_bucket{le="0.5"} 1"#)
                .is_none()
        );
    }

    #[test]
    fn snapshot_from_prometheus_text() {
        let text = r#"
# TYPE parley_events_total counter
parley_events_total{installation_id="i",plugin_version="1",kind="posted"} 100
parley_events_total{installation_id="i",plugin_version="1",kind="updated"} 5
parley_llm_requests_total{installation_id="i",plugin_version="1",endpoint="a",outcome="success"} 7
parley_llm_requests_total{installation_id="i",plugin_version="1",endpoint="a",outcome="permanent_error"} 1
parley_http_requests_total{installation_id="i",plugin_version="1",method="GET",path="/x",status="503"} 2
parley_http_request_duration_seconds_sum{installation_id="i",plugin_version="1",method="GET",path="/x"} 1
parley_http_request_duration_seconds_count{installation_id="i",plugin_version="1",method="GET",path="/x"} 4
"#;

        let snapshot = MetricsSnapshot::from_prometheus_text(text);
        assert_eq!(snapshot.instance.installation_id, "i");
        assert_eq!(snapshot.categories.events.received, 105);
        assert_eq!(snapshot.categories.events.by_kind["updated"], 5);
        assert_eq!(snapshot.categories.llm.requests, 8);
        assert_eq!(snapshot.categories.llm.by_endpoint["a"].errors, 1);
        assert_eq!(snapshot.categories.http.errors, 2);
        assert_eq!(snapshot.categories.http.avg_duration_seconds, Some(0.25));
    }
}
