//! One configured outbound client.

use std::time::{Duration, Instant};

use {
    parley_config::{HttpConfig, TrustLevel},
    tracing::debug,
    url::Url,
};

use crate::{
    deadline::CallDeadline,
    error::{Result, UpstreamError},
    ssrf::ssrf_check,
    upstream::{UpstreamRequest, UpstreamResponse, status_error},
};

/// Policy applied to untrusted destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_redirects: u8,
    pub allow_private_networks: bool,
    pub max_fetch_bytes: usize,
}

impl From<&HttpConfig> for FetchPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_redirects: config.max_redirects,
            allow_private_networks: config.allow_private_networks,
            max_fetch_bytes: config.max_fetch_bytes,
        }
    }
}

/// Body of an untrusted resource, capped at the policy's byte limit.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Cheap `Clone` handle over a pooled `reqwest::Client` with a fixed trust
/// level and timeout.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    trust: TrustLevel,
    timeout: Duration,
    policy: FetchPolicy,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        trust: TrustLevel,
        timeout: Duration,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            http,
            trust,
            timeout,
            policy,
        }
    }

    #[must_use]
    pub fn trust(&self) -> TrustLevel {
        self.trust
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same connection pool, different timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.map_or(self.timeout, |t| t.min(self.timeout))
    }

    async fn guard(&self, url: &Url) -> Result<()> {
        if self.trust == TrustLevel::Untrusted && !self.policy.allow_private_networks {
            ssrf_check(url).await?;
        }
        Ok(())
    }

    /// Run one outbound call. Non-2xx statuses come back as classified errors.
    pub async fn execute(
        &self,
        request: UpstreamRequest,
        deadline: &CallDeadline,
    ) -> Result<UpstreamResponse> {
        let timeout = self.effective_timeout(request.timeout);
        let url = Url::parse(&request.url).map_err(|e| {
            UpstreamError::InvalidRequest(format!("invalid url {}: {e}", request.url))
        })?;
        let endpoint = request.endpoint.clone();
        let started = Instant::now();

        let result = deadline
            .run(timeout, async move {
                self.guard(&url).await?;

                let mut builder = self
                    .http
                    .request(request.method, url)
                    .headers(request.headers)
                    .timeout(timeout);
                if let Some(body) = &request.body {
                    builder = builder.json(body);
                }

                let resp = builder
                    .send()
                    .await
                    .map_err(|e| UpstreamError::from_reqwest(&e, timeout))?;
                let status = resp.status().as_u16();
                let headers = resp.headers().clone();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| UpstreamError::from_reqwest(&e, timeout))?;

                if !(200..300).contains(&status) {
                    return Err(status_error(status, &headers, &body));
                }
                Ok(UpstreamResponse {
                    status,
                    headers,
                    body,
                    elapsed: started.elapsed(),
                })
            })
            .await;

        match &result {
            Ok(resp) => debug!(
                %endpoint,
                trust = %self.trust,
                status = resp.status,
                elapsed_ms = resp.elapsed.as_millis(),
                "upstream call completed"
            ),
            Err(e) => debug!(
                %endpoint,
                trust = %self.trust,
                error = %e,
                elapsed_ms = started.elapsed().as_millis(),
                "upstream call failed"
            ),
        }
        result
    }

    /// GET a caller-supplied URL under the untrusted policy: private-network
    /// guard on every hop, manual redirects with loop detection, byte cap.
    pub async fn fetch_resource(
        &self,
        url: &str,
        deadline: &CallDeadline,
    ) -> Result<FetchedResource> {
        if self.trust != TrustLevel::Untrusted {
            return Err(UpstreamError::InvalidRequest(
                "resource fetches must use the untrusted client".into(),
            ));
        }
        let start_url =
            Url::parse(url).map_err(|e| UpstreamError::InvalidRequest(format!("{url}: {e}")))?;
        match start_url.scheme() {
            "http" | "https" => {},
            s => {
                return Err(UpstreamError::InvalidRequest(format!(
                    "unsupported URL scheme: {s}"
                )));
            },
        }

        let timeout = self.timeout;
        let started = Instant::now();
        deadline
            .run(timeout, async move {
                let mut current = start_url;
                let mut visited: Vec<String> = Vec::new();
                let mut hops = 0u8;

                loop {
                    self.guard(&current).await?;
                    visited.push(current.to_string());

                    let resp = self
                        .http
                        .get(current.as_str())
                        .timeout(timeout)
                        .send()
                        .await
                        .map_err(|e| UpstreamError::from_reqwest(&e, timeout))?;
                    let status = resp.status();

                    if status.is_redirection() {
                        if hops >= self.policy.max_redirects {
                            return Err(UpstreamError::Blocked(format!(
                                "too many redirects (max {})",
                                self.policy.max_redirects
                            )));
                        }
                        let location = resp
                            .headers()
                            .get(http::header::LOCATION)
                            .and_then(|v| v.to_str().ok())
                            .ok_or_else(|| {
                                UpstreamError::InvalidResponse(
                                    "redirect without Location header".into(),
                                )
                            })?;
                        let next = current
                            .join(location)
                            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

                        if visited.contains(&next.to_string()) {
                            return Err(UpstreamError::Blocked(format!(
                                "redirect loop detected: {current} -> {next}"
                            )));
                        }
                        current = next;
                        hops += 1;
                        continue;
                    }

                    let headers = resp.headers().clone();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(status_error(status.as_u16(), &headers, &body));
                    }

                    let content_type = headers
                        .get(http::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let (bytes, truncated) =
                        read_capped(resp, self.policy.max_fetch_bytes, timeout).await?;

                    return Ok(FetchedResource {
                        url: current.to_string(),
                        status: status.as_u16(),
                        content_type,
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                        truncated,
                        elapsed: started.elapsed(),
                    });
                }
            })
            .await
    }
}

async fn read_capped(
    mut resp: reqwest::Response,
    cap: usize,
    timeout: Duration,
) -> Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| UpstreamError::from_reqwest(&e, timeout))?
    {
        let room = cap.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            Json, Router,
            http::{HeaderMap, StatusCode, header},
            response::{IntoResponse, Redirect},
            routing::{get, post},
        },
        std::net::SocketAddr,
    };

    async fn start_mock(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn policy(allow_private_networks: bool) -> FetchPolicy {
        FetchPolicy {
            max_redirects: 3,
            allow_private_networks,
            max_fetch_bytes: 64,
        }
    }

    fn client(trust: TrustLevel, timeout: Duration, allow_private: bool) -> UpstreamClient {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        UpstreamClient::new(http, trust, timeout, policy(allow_private))
    }

    fn trusted() -> UpstreamClient {
        client(TrustLevel::Trusted, Duration::from_secs(30), false)
    }

    fn untrusted(timeout: Duration) -> UpstreamClient {
        client(TrustLevel::Untrusted, timeout, true)
    }

    #[tokio::test]
    async fn execute_returns_success_body() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({ "echo": body["model"] }))
            }),
        );
        let addr = start_mock(app).await;

        let req = UpstreamRequest::post_json(
            "local",
            format!("http://{addr}/v1/chat/completions"),
            serde_json::json!({ "model": "m1" }),
        );
        let resp = trusted()
            .execute(req, &CallDeadline::unbounded())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["echo"], "m1");
    }

    #[tokio::test]
    async fn execute_sends_bearer_token() {
        let app = Router::new().route(
            "/auth",
            get(|headers: HeaderMap| async move {
                match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                    Some("Bearer sk-test") => StatusCode::OK,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }),
        );
        let addr = start_mock(app).await;

        let req = UpstreamRequest::get("local", format!("http://{addr}/auth"))
            .with_bearer("sk-test")
            .unwrap();
        trusted()
            .execute(req, &CallDeadline::unbounded())
            .await
            .unwrap();

        let req = UpstreamRequest::get("local", format!("http://{addr}/auth"));
        let err = trusted()
            .execute(req, &CallDeadline::unbounded())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_4xx");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn execute_classifies_error_statuses() {
        let app = Router::new()
            .route(
                "/down",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream exploded") }),
            )
            .route(
                "/busy",
                get(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [(header::RETRY_AFTER, "7")],
                        "slow down",
                    )
                }),
            );
        let addr = start_mock(app).await;
        let deadline = CallDeadline::unbounded();

        let err = trusted()
            .execute(
                UpstreamRequest::get("local", format!("http://{addr}/down")),
                &deadline,
            )
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Upstream {
            status: 502,
            body: "upstream exploded".into(),
        });
        assert!(err.is_transient());

        let err = trusted()
            .execute(
                UpstreamRequest::get("local", format!("http://{addr}/busy")),
                &deadline,
            )
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn cancelled_call_returns_promptly() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let addr = start_mock(app).await;

        let cancel = tokio_util::sync::CancellationToken::new();
        let deadline = CallDeadline::new(
            cancel.clone(),
            tokio_util::sync::CancellationToken::new(),
            Duration::ZERO,
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = trusted()
            .execute(
                UpstreamRequest::get("local", format!("http://{addr}/slow")),
                &deadline,
            )
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn slow_untrusted_fetch_does_not_hold_up_trusted_calls() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }),
            )
            .route("/fast", get(|| async { "ok" }));
        let addr = start_mock(app).await;

        let untrusted = untrusted(Duration::from_millis(300));
        let trusted = trusted();
        let deadline = CallDeadline::unbounded();

        let slow_url = format!("http://{addr}/slow");
        let slow = untrusted.fetch_resource(&slow_url, &deadline);
        let fast = async {
            let started = Instant::now();
            let resp = trusted
                .execute(
                    UpstreamRequest::get("local", format!("http://{addr}/fast")),
                    &deadline,
                )
                .await
                .unwrap();
            (resp, started.elapsed())
        };

        let started = Instant::now();
        let (slow, (fast, fast_elapsed)) = tokio::join!(slow, fast);

        assert_eq!(fast.body, "ok");
        assert!(fast_elapsed < Duration::from_millis(300), "{fast_elapsed:?}");
        assert!(matches!(slow, Err(UpstreamError::Timeout { .. })), "{slow:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fetch_follows_redirects() {
        let app = Router::new()
            .route("/start", get(|| async { Redirect::temporary("/middle") }))
            .route("/middle", get(|| async { Redirect::permanent("/end") }))
            .route(
                "/end",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "arrived") }),
            );
        let addr = start_mock(app).await;

        let fetched = untrusted(Duration::from_secs(5))
            .fetch_resource(&format!("http://{addr}/start"), &CallDeadline::unbounded())
            .await
            .unwrap();
        assert_eq!(fetched.url, format!("http://{addr}/end"));
        assert_eq!(fetched.body, "arrived");
        assert_eq!(fetched.content_type, "text/plain");
        assert!(!fetched.truncated);
    }

    #[tokio::test]
    async fn fetch_detects_redirect_loops() {
        let app = Router::new()
            .route("/a", get(|| async { Redirect::temporary("/b") }))
            .route("/b", get(|| async { Redirect::temporary("/a") }));
        let addr = start_mock(app).await;

        let err = untrusted(Duration::from_secs(5))
            .fetch_resource(&format!("http://{addr}/a"), &CallDeadline::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Blocked(ref m) if m.contains("loop")), "{err:?}");
    }

    #[tokio::test]
    async fn fetch_caps_redirect_chain() {
        let app = Router::new().route(
            "/hop/{n}",
            get(
                |axum::extract::Path(n): axum::extract::Path<u32>| async move {
                    Redirect::temporary(&format!("/hop/{}", n + 1)).into_response()
                },
            ),
        );
        let addr = start_mock(app).await;

        let err = untrusted(Duration::from_secs(5))
            .fetch_resource(&format!("http://{addr}/hop/0"), &CallDeadline::unbounded())
            .await
            .unwrap_err();
        assert!(
            matches!(err, UpstreamError::Blocked(ref m) if m.contains("too many redirects")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn fetch_truncates_large_bodies() {
        let app = Router::new().route("/big", get(|| async { "x".repeat(1_000) }));
        let addr = start_mock(app).await;

        let fetched = untrusted(Duration::from_secs(5))
            .fetch_resource(&format!("http://{addr}/big"), &CallDeadline::unbounded())
            .await
            .unwrap();
        assert!(fetched.truncated);
        assert_eq!(fetched.body.len(), 64);
    }

    #[tokio::test]
    async fn fetch_blocks_private_networks_by_default() {
        let app = Router::new().route("/secret", get(|| async { "metadata" }));
        let addr = start_mock(app).await;

        let guarded = client(TrustLevel::Untrusted, Duration::from_secs(5), false);
        let err = guarded
            .fetch_resource(&format!("http://{addr}/secret"), &CallDeadline::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Blocked(_)), "{err:?}");
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes_and_trusted_clients() {
        let deadline = CallDeadline::unbounded();
        let err = untrusted(Duration::from_secs(5))
            .fetch_resource("file:///etc/passwd", &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidRequest(_)));

        let err = trusted()
            .fetch_resource("https://example.com/", &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidRequest(_)));
    }
}
