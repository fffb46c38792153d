use std::sync::{Arc, PoisonError, RwLock};

use {
    async_trait::async_trait,
    axum::{
        Json, Router,
        body::Body,
        http::{Request, StatusCode},
        response::{IntoResponse, Response},
    },
    parley_agents::{ActivationError, AgentsService, ServiceDeps},
    parley_common::{EventContext, HostApi, Post},
    parley_config::{ConfigSource, ConfigStore},
    parley_httpservice::{ClientPool, DefaultHttpServiceFactory, HttpServiceFactory},
    parley_metrics::{InstanceInfo, Metrics},
    tokio::sync::Mutex,
    tower::ServiceExt,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, Error, Result},
    hooks::PluginHooks,
    manifest::Manifest,
};

/// Everything built by a successful activation.
struct Active {
    service: Arc<AgentsService>,
    api: Router,
    metrics: Router,
}

pub struct Plugin {
    manifest: Manifest,
    host: Arc<dyn HostApi>,
    config_source: Arc<dyn ConfigSource>,
    /// Overrides the factory built from the configuration's `http` section.
    http_factory: Option<Arc<dyn HttpServiceFactory>>,
    state: RwLock<Option<Arc<Active>>>,
    /// Serializes activate, deactivate and configuration changes.
    lifecycle: Mutex<()>,
}

impl Plugin {
    #[must_use]
    pub fn new(
        manifest: Manifest,
        host: Arc<dyn HostApi>,
        config_source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            manifest,
            host,
            config_source,
            http_factory: None,
            state: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Use a host-provided client factory instead of the built-in one.
    #[must_use]
    pub fn with_http_factory(mut self, factory: Arc<dyn HttpServiceFactory>) -> Self {
        self.http_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// The orchestration service of the current activation.
    #[must_use]
    pub fn service(&self) -> Option<Arc<AgentsService>> {
        self.active().map(|active| Arc::clone(&active.service))
    }

    fn active(&self) -> Option<Arc<Active>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, active: Option<Arc<Active>>) -> Option<Arc<Active>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, active)
    }

    async fn build(&self) -> std::result::Result<Active, ActivationError> {
        let config = self.config_source.load().map_err(|e| ActivationError::External {
            context: "failed to load configuration".into(),
            source: e.into(),
        })?;
        let store = Arc::new(ConfigStore::new(config)?);
        let snapshot = store.get();

        let pool = match &self.http_factory {
            Some(factory) => ClientPool::from_factory(factory.as_ref())?,
            None => ClientPool::from_factory(
                &DefaultHttpServiceFactory::new(snapshot.http.clone())
                    .with_user_agent(self.manifest.user_agent()),
            )?,
        };

        let metrics = Metrics::new(InstanceInfo::from_env(self.manifest.version.clone()))?;

        let service = AgentsService::initialize(ServiceDeps {
            config: store,
            pool,
            metrics: metrics.clone(),
            host: Arc::clone(&self.host),
        })
        .await?;

        Ok(Active {
            api: parley_api::api_router(Arc::clone(&service)),
            metrics: parley_api::metrics_router(metrics),
            service,
        })
    }
}

#[async_trait]
impl PluginHooks for Plugin {
    async fn on_activate(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }

        let active = self.build().await.map_err(|e| {
            warn!(plugin = %self.manifest.id, error = %e, "activation failed");
            Error::Activation(e)
        })?;
        let revision = active.service.config().revision();
        self.set_active(Some(Arc::new(active)));
        info!(
            plugin = %self.manifest.id,
            version = %self.manifest.version,
            revision,
            "plugin activated"
        );
        Ok(())
    }

    async fn on_deactivate(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(active) = self.set_active(None) else {
            debug!(plugin = %self.manifest.id, "deactivate called while inactive");
            return Ok(());
        };

        if let Err(e) = active.service.deactivate().await {
            warn!(plugin = %self.manifest.id, error = %e, "error during deactivation");
            return Err(e.into());
        }
        info!(plugin = %self.manifest.id, "plugin deactivated");
        Ok(())
    }

    async fn on_configuration_change(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let service = self.service().ok_or(Error::NotActive)?;
        let config = self
            .config_source
            .load()
            .context("failed to load configuration")?;
        service.reload_config(config).await?;
        Ok(())
    }

    async fn message_has_been_posted(&self, ctx: &EventContext, post: Post) {
        let Some(service) = self.service() else {
            warn!(
                request_id = %ctx.request_id,
                post_id = %post.id,
                "plugin inactive, dropping posted event"
            );
            return;
        };
        service.on_message_posted(ctx, post).await;
    }

    async fn message_has_been_updated(&self, ctx: &EventContext, old: Post, new: Post) {
        let Some(service) = self.service() else {
            warn!(
                request_id = %ctx.request_id,
                post_id = %new.id,
                "plugin inactive, dropping updated event"
            );
            return;
        };
        service.on_message_updated(ctx, &old, new).await;
    }

    async fn serve_http(&self, ctx: &EventContext, req: Request<Body>) -> Response {
        let Some(active) = self.active() else {
            return unavailable();
        };
        debug!(
            request_id = %ctx.request_id,
            method = %req.method(),
            path = %req.uri().path(),
            "serving plugin request"
        );
        active
            .api
            .clone()
            .oneshot(req)
            .await
            .unwrap_or_else(|never| match never {})
    }

    async fn serve_metrics(&self, ctx: &EventContext, req: Request<Body>) -> Response {
        let Some(active) = self.active() else {
            return unavailable();
        };
        debug!(
            request_id = %ctx.request_id,
            path = %req.uri().path(),
            "serving metrics request"
        );
        active
            .metrics
            .clone()
            .oneshot(req)
            .await
            .unwrap_or_else(|never| match never {})
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("manifest", &self.manifest)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "plugin is not active",
            "kind": "not_active",
        })),
    )
        .into_response()
}
