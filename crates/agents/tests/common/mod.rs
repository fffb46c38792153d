#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post as post_route},
    },
    parley_agents::{AgentsService, ServiceDeps},
    parley_common::{Channel, ChannelKind, HostApi, NewPost, Post},
    parley_config::{BotConfig, ConfigStore, EndpointConfig, PluginConfig},
    parley_httpservice::{ClientPool, DefaultHttpServiceFactory},
    parley_metrics::{InstanceInfo, Metrics},
    tokio::sync::Notify,
};

// ── Host ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockHost {
    pub channels: Mutex<HashMap<String, Channel>>,
    pub posts: Mutex<HashMap<String, Post>>,
    pub created: Mutex<Vec<(String, NewPost)>>,
    pub updated: Mutex<Vec<(String, String)>>,
    pub fail_ensure: AtomicBool,
    next_id: AtomicUsize,
}

impl MockHost {
    pub fn remember(&self, post: &Post) {
        self.posts
            .lock()
            .unwrap()
            .insert(post.id.clone(), post.clone());
    }

    pub fn add_direct_channel(&self, id: &str, members: &[&str]) {
        self.channels.lock().unwrap().insert(id.into(), Channel {
            id: id.into(),
            kind: ChannelKind::Direct,
            member_ids: members.iter().map(|m| (*m).to_string()).collect(),
        });
    }

    pub fn created(&self) -> Vec<(String, NewPost)> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(String, String)> {
        self.updated.lock().unwrap().clone()
    }

    /// Text of the reply as the user would see it now.
    pub fn visible_reply(&self, reply_id: &str) -> Option<String> {
        let updated = self
            .updated
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == reply_id)
            .map(|(_, message)| message.clone());
        updated.or_else(|| {
            self.created
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == reply_id)
                .map(|(_, p)| p.message.clone())
        })
    }
}

#[async_trait]
impl HostApi for MockHost {
    async fn ensure_bot(&self, username: &str, _display_name: &str) -> anyhow::Result<String> {
        if self.fail_ensure.load(Ordering::SeqCst) {
            anyhow::bail!("bot accounts are disabled on this server");
        }
        Ok(format!("bot-{username}"))
    }

    async fn get_channel(&self, channel_id: &str) -> anyhow::Result<Channel> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| Channel {
                id: channel_id.into(),
                kind: ChannelKind::Open,
                member_ids: Vec::new(),
            }))
    }

    async fn get_post(&self, post_id: &str) -> anyhow::Result<Post> {
        self.posts
            .lock()
            .unwrap()
            .get(post_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("post {post_id} not found"))
    }

    async fn create_post(&self, post: NewPost) -> anyhow::Result<String> {
        let id = format!("reply-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created.lock().unwrap().push((id.clone(), post));
        Ok(id)
    }

    async fn update_post(&self, post_id: &str, message: &str) -> anyhow::Result<()> {
        self.updated
            .lock()
            .unwrap()
            .push((post_id.into(), message.into()));
        Ok(())
    }
}

// ── Model endpoint ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLlm {
    pub calls: AtomicUsize,
    pub models: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub delay: Mutex<Duration>,
    /// Statuses returned by the next calls, in order.
    pub failures: Mutex<VecDeque<u16>>,
    /// Status returned by every call once `failures` is drained.
    pub always: Mutex<Option<u16>>,
    pub started: Notify,
}

impl MockLlm {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail_next(&self, statuses: &[u16]) {
        self.failures.lock().unwrap().extend(statuses);
    }

    pub fn fail_always(&self, status: u16) {
        *self.always.lock().unwrap() = Some(status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_failure(&self) -> Option<u16> {
        self.failures
            .lock()
            .unwrap()
            .pop_front()
            .or(*self.always.lock().unwrap())
    }
}

async fn completions(
    State(llm): State<Arc<MockLlm>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    llm.calls.fetch_add(1, Ordering::SeqCst);
    let model = body["model"].as_str().unwrap_or_default().to_string();
    let prompt = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    llm.models.lock().unwrap().push(model.clone());
    llm.prompts.lock().unwrap().push(prompt.clone());
    llm.started.notify_one();

    let delay = *llm.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = llm.next_failure() {
        return (StatusCode::from_u16(status).unwrap(), "mock failure").into_response();
    }
    Json(serde_json::json!({
        "model": model,
        "choices": [{ "message": { "role": "assistant", "content": format!("answer to: {prompt}") } }],
        "usage": { "prompt_tokens": 5, "completion_tokens": 7 },
    }))
    .into_response()
}

/// Start the mock model server. It also serves `/page` for link fetches.
pub async fn start_llm() -> (Arc<MockLlm>, SocketAddr) {
    let llm = Arc::new(MockLlm::default());
    let app = Router::new()
        .route("/v1/chat/completions", post_route(completions))
        .route(
            "/page",
            get(|| async {
                (
                    [(axum::http::header::CONTENT_TYPE, "text/html")],
                    "<html><body><h1>Release notes</h1><p>Version 2 ships today.</p></body></html>",
                )
            }),
        )
        .with_state(Arc::clone(&llm));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (llm, addr)
}

// ── Service ─────────────────────────────────────────────────────────────────

pub fn config(addr: SocketAddr, model: &str) -> PluginConfig {
    let mut config = PluginConfig {
        endpoints: vec![EndpointConfig {
            name: "local".into(),
            url: format!("http://{addr}/v1"),
            model: model.into(),
            api_key: Some(secrecy::Secret::new("sk-test".into())),
            ..Default::default()
        }],
        bots: vec![BotConfig {
            name: "ai".into(),
            display_name: "Assistant".into(),
            endpoint: "local".into(),
            ..Default::default()
        }],
        ..Default::default()
    };
    config.retry.initial_backoff_ms = 10;
    config.retry.max_backoff_ms = 50;
    config.http.allow_private_networks = true;
    config
}

pub struct Harness {
    pub service: Arc<AgentsService>,
    pub host: Arc<MockHost>,
    pub llm: Arc<MockLlm>,
    pub addr: SocketAddr,
    pub metrics: Metrics,
}

pub async fn harness(tweak: impl FnOnce(&mut PluginConfig)) -> Harness {
    let (llm, addr) = start_llm().await;
    let mut cfg = config(addr, "model-a");
    tweak(&mut cfg);

    let host = Arc::new(MockHost::default());
    let pool = ClientPool::from_factory(&DefaultHttpServiceFactory::new(cfg.http.clone())).unwrap();
    let metrics = Metrics::new(InstanceInfo::new("test-install", "0.0.0-test")).unwrap();
    let service = AgentsService::initialize(ServiceDeps {
        config: Arc::new(ConfigStore::new(cfg).unwrap()),
        pool,
        metrics: metrics.clone(),
        host: Arc::clone(&host) as Arc<dyn HostApi>,
    })
    .await
    .unwrap();

    Harness {
        service,
        host,
        llm,
        addr,
        metrics,
    }
}

pub fn post(id: &str, user: &str, message: &str) -> Post {
    Post {
        id: id.into(),
        channel_id: "town-square".into(),
        user_id: user.into(),
        message: message.into(),
        ..Default::default()
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until no run is in flight.
pub async fn settle(service: &AgentsService) {
    assert!(
        wait_for(Duration::from_secs(10), || service.status().runs_in_flight == 0).await,
        "runs did not settle"
    );
}
