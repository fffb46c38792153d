//! The orchestration service: one per plugin activation.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    parley_common::{EventContext, HostApi, Post},
    parley_config::{BotConfig, ConfigStore, PluginConfig, Snapshot, TrustLevel},
    parley_httpservice::ClientPool,
    parley_metrics::{Metrics, outcome},
    serde::Serialize,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{Instrument, debug, error, info, info_span, warn},
};

use crate::{
    error::{ActivationError, DeactivationError, Result, ServiceError},
    run::Run,
    tracker::{ConversationTracker, Refusal},
};

/// Extra time runs get after the shutdown grace to publish their replies.
const PUBLISH_MARGIN: Duration = Duration::from_secs(2);
/// How long force-cancelled runs get to unwind.
const FORCE_CANCEL_WAIT: Duration = Duration::from_secs(5);

/// Why an event did not schedule a run.
pub mod drop_reason {
    pub const NOT_ACCEPTING: &str = "not_accepting";
    pub const SYSTEM_POST: &str = "system_post";
    pub const BOT_AUTHOR: &str = "bot_author";
    pub const NOT_ADDRESSED: &str = "not_addressed";
    pub const UNCHANGED: &str = "unchanged";
    pub const EDITS_DISABLED: &str = "edits_disabled";
    pub const CANCELLED: &str = "cancelled";
    pub const HOST_ERROR: &str = "host_error";
    pub const STALE: &str = "stale";
}

/// Collaborators built by the activation sequence.
pub struct ServiceDeps {
    pub config: Arc<ConfigStore>,
    pub pool: ClientPool,
    pub metrics: Metrics,
    pub host: Arc<dyn HostApi>,
}

/// What a callback did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Scheduled { post_id: String, generation: u64 },
    Dropped(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotInfo {
    pub name: String,
    pub display_name: String,
    pub endpoint: String,
    pub trust: Option<TrustLevel>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub accepting: bool,
    pub runs_in_flight: usize,
    pub tracked_posts: usize,
    pub config_revision: u64,
}

pub struct AgentsService {
    config: Arc<ConfigStore>,
    pool: ClientPool,
    metrics: Metrics,
    host: Arc<dyn HostApi>,
    tracker: ConversationTracker,
    tasks: TaskTracker,
    /// Shrinks outstanding upstream deadlines to the shutdown grace.
    shutdown: CancellationToken,
    /// Parent of every run token; cancelling it aborts all runs.
    abort: CancellationToken,
    /// Held for reading while a run is admitted and spawned, for writing
    /// while admission is closed.
    admission: RwLock<()>,
    /// Bot username to host user id.
    bot_ids: RwLock<HashMap<String, String>>,
    deactivated: AtomicBool,
}

impl AgentsService {
    /// Build the service and make sure every configured bot has a host
    /// account. Any failure aborts activation.
    pub async fn initialize(deps: ServiceDeps) -> Result<Arc<Self>, ActivationError> {
        let ServiceDeps {
            config,
            pool,
            metrics,
            host,
        } = deps;
        let snapshot = config.get();

        let service = Arc::new(Self {
            config,
            pool,
            metrics,
            host,
            tracker: ConversationTracker::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            admission: RwLock::new(()),
            bot_ids: RwLock::new(HashMap::new()),
            deactivated: AtomicBool::new(false),
        });

        for bot in &snapshot.bots {
            service
                .ensure_bot(bot)
                .await
                .map_err(|e| ActivationError::bot(&bot.name, e))?;
        }
        service.metrics.set_runs_in_flight(0);

        info!(
            revision = snapshot.revision(),
            bots = snapshot.bots.len(),
            endpoints = snapshot.endpoints.len(),
            "agents service initialized"
        );
        Ok(service)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> Arc<Snapshot> {
        self.config.get()
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub(crate) fn host(&self) -> &dyn HostApi {
        self.host.as_ref()
    }

    pub(crate) fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn bot_user_id(&self, bot: &str) -> Option<String> {
        self.bot_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bot)
            .cloned()
    }

    fn is_bot_user(&self, user_id: &str) -> bool {
        self.bot_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|id| id == user_id)
    }

    async fn ensure_bot(&self, bot: &BotConfig) -> anyhow::Result<()> {
        let user_id = self.host.ensure_bot(&bot.name, bot.display_name()).await?;
        debug!(bot = %bot.name, %user_id, "bot account ready");
        self.bot_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bot.name.clone(), user_id);
        Ok(())
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Schedule an answer for a new post when it addresses a bot. Returns as
    /// soon as the run is spawned.
    pub async fn on_message_posted(self: &Arc<Self>, ctx: &EventContext, post: Post) -> Dispatch {
        const KIND: &str = "posted";
        self.metrics.record_event(KIND);

        if let Some(reason) = self.precheck(&post) {
            return self.drop_event(KIND, &post, reason);
        }
        let snapshot = self.config.get();
        match self.addressed_bot(ctx, &snapshot, &post).await {
            Ok(Some(bot)) => {
                let requester = post.user_id.clone();
                self.schedule(KIND, ctx, snapshot, bot, post, &requester)
            },
            Ok(None) => self.drop_event(KIND, &post, drop_reason::NOT_ADDRESSED),
            Err(reason) => self.drop_event(KIND, &post, reason),
        }
    }

    /// Re-answer an edited post, superseding any run still in flight for it.
    /// The new run edits the existing reply in place.
    pub async fn on_message_updated(
        self: &Arc<Self>,
        ctx: &EventContext,
        old: &Post,
        new: Post,
    ) -> Dispatch {
        const KIND: &str = "updated";
        self.metrics.record_event(KIND);

        if let Some(reason) = self.precheck(&new) {
            return self.drop_event(KIND, &new, reason);
        }
        if old.message == new.message {
            return self.drop_event(KIND, &new, drop_reason::UNCHANGED);
        }
        let snapshot = self.config.get();
        if !snapshot.features.reprocess_edits {
            return self.drop_event(KIND, &new, drop_reason::EDITS_DISABLED);
        }
        match self.addressed_bot(ctx, &snapshot, &new).await {
            Ok(Some(bot)) => {
                let requester = new.user_id.clone();
                self.schedule(KIND, ctx, snapshot, bot, new, &requester)
            },
            Ok(None) => self.drop_event(KIND, &new, drop_reason::NOT_ADDRESSED),
            Err(reason) => self.drop_event(KIND, &new, reason),
        }
    }

    fn precheck(&self, post: &Post) -> Option<&'static str> {
        if !self.tracker.is_accepting() {
            Some(drop_reason::NOT_ACCEPTING)
        } else if post.is_system() {
            Some(drop_reason::SYSTEM_POST)
        } else if self.is_bot_user(&post.user_id) {
            Some(drop_reason::BOT_AUTHOR)
        } else {
            None
        }
    }

    fn drop_event(&self, kind: &'static str, post: &Post, reason: &'static str) -> Dispatch {
        debug!(post_id = %post.id, kind, reason, "event dropped");
        self.metrics.record_event_dropped(kind, reason);
        Dispatch::Dropped(reason)
    }

    /// The bot a post is for: the earliest `@mention`, otherwise the bot in a
    /// direct channel.
    async fn addressed_bot(
        &self,
        ctx: &EventContext,
        snapshot: &Snapshot,
        post: &Post,
    ) -> std::result::Result<Option<BotConfig>, &'static str> {
        if let Some(bot) = mentioned_bot(snapshot.config(), &post.message) {
            return Ok(Some(bot.clone()));
        }

        let channel = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(drop_reason::CANCELLED),
            channel = self.host.get_channel(&post.channel_id) => channel,
        };
        let channel = match channel {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    post_id = %post.id,
                    channel_id = %post.channel_id,
                    error = %e,
                    "channel lookup failed"
                );
                return Err(drop_reason::HOST_ERROR);
            },
        };
        if !channel.is_direct() {
            return Ok(None);
        }

        let ids = self
            .bot_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let present: Vec<&BotConfig> = snapshot
            .bots
            .iter()
            .filter(|b| {
                ids.get(&b.name)
                    .is_some_and(|id| channel.member_ids.contains(id))
            })
            .collect();
        let chosen = match present.as_slice() {
            [] => None,
            [only] => Some(*only),
            several => snapshot
                .default_bot
                .as_deref()
                .and_then(|name| several.iter().copied().find(|b| b.name == name))
                .or_else(|| several.first().copied()),
        };
        Ok(chosen.cloned())
    }

    fn schedule(
        self: &Arc<Self>,
        kind: &'static str,
        ctx: &EventContext,
        snapshot: Arc<Snapshot>,
        bot: BotConfig,
        post: Post,
        requester: &str,
    ) -> Dispatch {
        let version = post.content_version();
        let gate = self.admission.read().unwrap_or_else(PoisonError::into_inner);
        let admission = match self
            .tracker
            .admit(&post.id, version, requester, &bot.name, &self.abort)
        {
            Ok(admission) => admission,
            Err(refusal) => {
                drop(gate);
                let reason = match refusal {
                    Refusal::Closed => drop_reason::NOT_ACCEPTING,
                    Refusal::Stale => drop_reason::STALE,
                };
                return self.drop_event(kind, &post, reason);
            },
        };

        let dispatch = Dispatch::Scheduled {
            post_id: admission.post_id.clone(),
            generation: admission.generation,
        };
        let span = info_span!(
            "run",
            post_id = %admission.post_id,
            generation = admission.generation,
            bot = %bot.name,
            revision = snapshot.revision(),
            request_id = %ctx.request_id,
        );
        if admission.superseded {
            info!(
                post_id = %admission.post_id,
                generation = admission.generation,
                "superseding in-flight run"
            );
        }

        let run = Run {
            admission,
            snapshot,
            bot,
            post,
        };
        self.tasks
            .spawn(run.execute(Arc::clone(self)).instrument(span));
        drop(gate);

        self.metrics.set_runs_in_flight(self.tracker.in_flight());
        dispatch
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Cancel the in-flight run for `post_id`. Only its requester may.
    pub fn stop(&self, post_id: &str, user_id: &str) -> Result<()> {
        let info = self
            .tracker
            .info(post_id)
            .filter(|i| i.running)
            .ok_or_else(|| ServiceError::not_found(format!("no run in flight for post {post_id}")))?;
        if info.requester != user_id {
            return Err(ServiceError::Forbidden);
        }
        self.tracker.cancel(post_id);
        info!(%post_id, %user_id, "run stopped by requester");
        Ok(())
    }

    /// Answer `post_id` again and replace the existing reply. Returns the new
    /// run's generation.
    pub async fn regenerate(self: &Arc<Self>, post_id: &str, user_id: &str) -> Result<u64> {
        if !self.tracker.is_accepting() {
            return Err(ServiceError::NotAccepting);
        }
        let info = self
            .tracker
            .info(post_id)
            .ok_or_else(|| ServiceError::not_found(format!("post {post_id} was never answered")))?;
        if info.requester != user_id {
            return Err(ServiceError::Forbidden);
        }

        let mut post = self
            .host
            .get_post(post_id)
            .await
            .map_err(|e| ServiceError::host(format!("failed to load post {post_id}"), e))?;
        let snapshot = self.config.get();
        let bot = snapshot
            .bot(&info.bot)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("bot @{} is no longer configured", info.bot)))?;

        // Regeneration answers the text the tracker already saw, even if the
        // host reports an older edit time.
        post.update_at = post.content_version().max(info.version);
        let ctx = EventContext::detached();
        match self.schedule("regenerate", &ctx, snapshot, bot, post, user_id) {
            Dispatch::Scheduled { generation, .. } => {
                info!(%post_id, generation, "regenerating reply");
                Ok(generation)
            },
            Dispatch::Dropped(_) => Err(ServiceError::NotAccepting),
        }
    }

    #[must_use]
    pub fn list_bots(&self) -> Vec<BotInfo> {
        let snapshot = self.config.get();
        snapshot
            .bots
            .iter()
            .map(|bot| BotInfo {
                name: bot.name.clone(),
                display_name: bot.display_name().to_string(),
                endpoint: bot.endpoint.clone(),
                trust: snapshot.endpoint(&bot.endpoint).map(|e| e.trust),
                user_id: self.bot_user_id(&bot.name),
            })
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            accepting: self.tracker.is_accepting(),
            runs_in_flight: self.tracker.in_flight(),
            tracked_posts: self.tracker.len(),
            config_revision: self.config.get().revision(),
        }
    }

    /// Publish a new configuration. Runs already admitted keep the snapshot
    /// they started with. Bot accounts for new bots are created best-effort.
    pub async fn reload_config(&self, config: PluginConfig) -> Result<u64> {
        let snapshot = match self.config.set(config) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics
                    .record_config_reload(outcome::REJECTED, self.config.get().revision());
                return Err(e.into());
            },
        };

        for bot in &snapshot.bots {
            if let Err(e) = self.ensure_bot(bot).await {
                warn!(bot = %bot.name, error = %e, "failed to ensure bot account after reload");
            }
        }
        self.metrics
            .record_config_reload(outcome::SUCCESS, snapshot.revision());
        Ok(snapshot.revision())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Stop admitting events and drain in-flight runs. Outstanding upstream
    /// calls get the configured shutdown grace, then everything left is
    /// cancelled. Only the first call does anything.
    pub async fn deactivate(&self) -> std::result::Result<(), DeactivationError> {
        if self.deactivated.swap(true, Ordering::AcqRel) {
            debug!("already deactivated");
            return Ok(());
        }
        let started = Instant::now();
        {
            let _gate = self.admission.write().unwrap_or_else(PoisonError::into_inner);
            self.tracker.close();
        }
        self.tasks.close();

        let grace = self.config.get().shutdown.grace();
        info!(
            in_flight = self.tasks.len(),
            grace_secs = grace.as_secs(),
            "deactivating, draining in-flight runs"
        );
        self.shutdown.cancel();

        if tokio::time::timeout(grace + PUBLISH_MARGIN, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "runs outlived the shutdown grace, cancelling"
            );
            self.abort.cancel();
            if tokio::time::timeout(FORCE_CANCEL_WAIT, self.tasks.wait())
                .await
                .is_err()
            {
                let remaining = self.tasks.len();
                let waited = started.elapsed();
                error!(remaining, waited_ms = waited.as_millis(), "deactivation timed out");
                self.metrics.record_deactivation(outcome::TIMEOUT, waited);
                return Err(DeactivationError::Timeout { remaining, waited });
            }
        }

        self.metrics.set_runs_in_flight(0);
        self.metrics
            .record_deactivation(outcome::SUCCESS, started.elapsed());
        info!(elapsed_ms = started.elapsed().as_millis(), "agents service deactivated");
        Ok(())
    }
}

impl std::fmt::Debug for AgentsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentsService")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .field("deactivated", &self.deactivated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// The configured bot whose `@name` appears first in `message`.
fn mentioned_bot<'a>(config: &'a PluginConfig, message: &str) -> Option<&'a BotConfig> {
    let lower = message.to_lowercase();
    config
        .bots
        .iter()
        .filter_map(|bot| mention_position(&lower, &bot.name.to_lowercase()).map(|at| (at, bot)))
        .min_by_key(|(at, _)| *at)
        .map(|(_, bot)| bot)
}

fn mention_position(message: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let needle = format!("@{name}");
    message.match_indices(&needle).map(|(at, _)| at).find(|&at| {
        let before_ok = message[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !is_name_char(c));
        let after_ok = message[at + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_name_char(c));
        before_ok && after_ok
    })
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn config() -> PluginConfig {
        PluginConfig {
            bots: vec![
                BotConfig {
                    name: "ai".into(),
                    ..Default::default()
                },
                BotConfig {
                    name: "helper".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[rstest]
    #[case("@ai what is rust?", Some("ai"))]
    #[case("hey @AI, help", Some("ai"))]
    #[case("ask @helper then @ai", Some("helper"))]
    #[case("@aide is someone else", None)]
    #[case("mail me at bob@ai.example", None)]
    #[case("@ai-team ping", None)]
    #[case("no mention", None)]
    fn mentions(#[case] message: &str, #[case] expected: Option<&str>) {
        let config = config();
        assert_eq!(mentioned_bot(&config, message).map(|b| b.name.as_str()), expected);
    }
}
