//! One background run: answer a post and publish the reply.

use std::{sync::Arc, time::Instant};

use {
    parley_common::{NewPost, Post},
    parley_config::{BotConfig, EndpointConfig, Snapshot},
    parley_httpservice::{CallDeadline, UpstreamError},
    parley_metrics::outcome,
    tracing::{debug, error, info, warn},
};

use crate::{
    completion::{Completion, build_messages, build_request, parse_response},
    error::RunError,
    links::{extract_links, fetch_links},
    retry::{RetryPolicy, retry},
    service::AgentsService,
    tracker::Admission,
};

/// Everything a run needs, fixed at admission.
pub(crate) struct Run {
    pub admission: Admission,
    /// The snapshot the whole run works against, even across reloads.
    pub snapshot: Arc<Snapshot>,
    pub bot: BotConfig,
    pub post: Post,
}

enum Finish {
    Reply(String),
    Silent,
}

impl Run {
    pub(crate) async fn execute(self, service: Arc<AgentsService>) {
        let started = Instant::now();
        let post_id = self.admission.post_id.clone();
        let generation = self.admission.generation;

        let (label, finish) = match self.answer(&service).await {
            Ok(completion) => (outcome::SUCCESS, Finish::Reply(completion.content)),
            Err(e) => self.classify(&service, &e),
        };

        let label = match finish {
            Finish::Reply(text) => self.publish(&service, &text).await.unwrap_or(label),
            Finish::Silent => label,
        };

        service.tracker().finish(&post_id, generation);
        let metrics = service.metrics();
        metrics.record_run_finished(label);
        metrics.set_runs_in_flight(service.tracker().in_flight());
        info!(
            outcome = label,
            elapsed_ms = started.elapsed().as_millis(),
            "run finished"
        );
    }

    async fn answer(&self, service: &AgentsService) -> Result<Completion, RunError> {
        let endpoint = self.snapshot.endpoint(&self.bot.endpoint).ok_or_else(|| {
            RunError::config(format!(
                "bot @{} references unknown endpoint {}",
                self.bot.name, self.bot.endpoint
            ))
        })?;
        let pool = service.pool();
        let client = pool.for_endpoint(endpoint);
        let deadline = CallDeadline::new(
            self.admission.cancel.clone(),
            service.shutdown_token().clone(),
            self.snapshot.shutdown.grace(),
        );

        let links = if self.snapshot.features.fetch_links {
            let urls = extract_links(&self.post.message, self.snapshot.features.max_links);
            if urls.is_empty() {
                Vec::new()
            } else {
                debug!(count = urls.len(), "fetching link context");
                fetch_links(pool.untrusted(), &urls, &deadline, service.metrics()).await
            }
        } else {
            Vec::new()
        };

        let messages = build_messages(&self.bot, &self.post.message, &links);
        let request = build_request(endpoint, &messages)?;
        let policy = RetryPolicy::from(&self.snapshot.retry);
        let metrics = service.metrics();
        let client = &client;
        let deadline = &deadline;

        let attempted = retry(
            &policy,
            deadline,
            |_, err, _| metrics.record_llm_retry(&endpoint.name, err.kind()),
            move |attempt| {
                let request = request.clone();
                async move {
                    debug!(attempt, endpoint = %endpoint.name, "calling model endpoint");
                    let started = Instant::now();
                    let result = client
                        .execute(request, deadline)
                        .await
                        .and_then(|resp| parse_response(&resp));
                    metrics.record_llm_request(
                        &endpoint.name,
                        attempt_outcome(&result),
                        started.elapsed(),
                    );
                    result
                }
            },
        )
        .await;

        let completion = attempted.result.map_err(|e| {
            debug!(attempts = attempted.attempts, error = %e, "model call gave up");
            e
        })?;
        record_usage(service, endpoint, &completion);
        Ok(completion)
    }

    fn classify(&self, service: &AgentsService, err: &RunError) -> (&'static str, Finish) {
        let tracker = service.tracker();
        match err {
            RunError::Upstream(UpstreamError::Cancelled) => {
                if tracker.is_current(&self.admission.post_id, self.admission.generation) {
                    info!("run cancelled");
                    (outcome::CANCELLED, Finish::Silent)
                } else {
                    debug!("run superseded by a newer event");
                    (outcome::SUPERSEDED, Finish::Silent)
                }
            },
            RunError::Upstream(e) if e.is_transient() => {
                warn!(error = %e, "model endpoint unavailable after retries");
                (
                    outcome::TRANSIENT_ERROR,
                    Finish::Reply(format!(
                        "Sorry, {} is not reachable right now. Please try again in a little while.",
                        self.bot.display_name()
                    )),
                )
            },
            RunError::Upstream(e) => {
                warn!(error = %e, kind = e.kind(), "model call failed");
                (
                    outcome::PERMANENT_ERROR,
                    Finish::Reply(format!(
                        "Sorry, I couldn't answer that ({}).",
                        e.kind().replace('_', " ")
                    )),
                )
            },
            RunError::Config(message) => {
                error!(%message, "run cannot be served by its configuration");
                (outcome::CONFIG_ERROR, Finish::Silent)
            },
            RunError::Host { .. } => {
                error!(error = %err, "host call failed during run");
                (outcome::PERMANENT_ERROR, Finish::Silent)
            },
        }
    }

    /// Create or edit the reply. Returns an outcome override when the reply
    /// was not published.
    async fn publish(&self, service: &AgentsService, text: &str) -> Option<&'static str> {
        if self.admission.cancel.is_cancelled()
            && service
                .tracker()
                .is_current(&self.admission.post_id, self.admission.generation)
        {
            info!("run stopped before publishing");
            return Some(outcome::CANCELLED);
        }

        let Some(mut slot) = service
            .tracker()
            .publish_slot(&self.admission.post_id, self.admission.generation)
            .await
        else {
            debug!("newer run owns the reply, discarding");
            return Some(outcome::SUPERSEDED);
        };

        let existing = slot.reply_id().map(str::to_string);
        let result = match existing {
            Some(reply_id) => service
                .host()
                .update_post(&reply_id, text)
                .await
                .map_err(|e| RunError::host("failed to update reply", e)),
            None => match service.bot_user_id(&self.bot.name) {
                Some(user_id) => service
                    .host()
                    .create_post(NewPost {
                        channel_id: self.post.channel_id.clone(),
                        root_id: self.post.thread_root().to_string(),
                        user_id,
                        message: text.to_string(),
                    })
                    .await
                    .map(|id| slot.set_reply_id(id))
                    .map_err(|e| RunError::host("failed to create reply", e)),
                None => Err(RunError::config(format!(
                    "bot @{} has no account on the host",
                    self.bot.name
                ))),
            },
        };

        match result {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "failed to publish reply");
                Some(match e {
                    RunError::Config(_) => outcome::CONFIG_ERROR,
                    _ => outcome::PERMANENT_ERROR,
                })
            },
        }
    }
}

fn attempt_outcome<T>(result: &Result<T, UpstreamError>) -> &'static str {
    match result {
        Ok(_) => outcome::SUCCESS,
        Err(UpstreamError::Cancelled) => outcome::CANCELLED,
        Err(UpstreamError::Timeout { .. }) => outcome::TIMEOUT,
        Err(e) if e.is_transient() => outcome::TRANSIENT_ERROR,
        Err(_) => outcome::PERMANENT_ERROR,
    }
}

fn record_usage(service: &AgentsService, endpoint: &EndpointConfig, completion: &Completion) {
    let model = if completion.model.is_empty() {
        &endpoint.model
    } else {
        &completion.model
    };
    service.metrics().record_llm_tokens(
        &endpoint.name,
        model,
        completion.usage.input_tokens,
        completion.usage.output_tokens,
    );
}
