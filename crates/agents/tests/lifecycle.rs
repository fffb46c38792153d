#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use {
    common::{MockHost, config, harness, post, start_llm},
    parley_agents::{ActivationError, AgentsService, Dispatch, ServiceDeps, drop_reason},
    parley_common::{EventContext, HostApi},
    parley_config::ConfigStore,
    parley_httpservice::{ClientPool, DefaultHttpServiceFactory},
    parley_metrics::{InstanceInfo, Metrics},
};

#[tokio::test]
async fn deactivation_drains_every_in_flight_run() {
    let h = harness(|c| c.shutdown.grace_secs = 5).await;
    h.llm.set_delay(Duration::from_millis(300));

    for i in 0..5 {
        let dispatch = h
            .service
            .on_message_posted(
                &EventContext::detached(),
                post(&format!("p{i}"), "u1", "@ai long question"),
            )
            .await;
        assert!(matches!(dispatch, Dispatch::Scheduled { .. }));
    }
    assert_eq!(h.service.status().runs_in_flight, 5);

    h.service.deactivate().await.unwrap();

    let status = h.service.status();
    assert!(!status.accepting);
    assert_eq!(status.runs_in_flight, 0);
    assert_eq!(h.host.created().len(), 5);
    let snap = h.metrics.snapshot();
    assert_eq!(snap.categories.runs.finished, 5);
    assert_eq!(snap.categories.runs.by_outcome.get("success"), Some(&5));
}

#[tokio::test]
async fn deactivation_cuts_slow_calls_at_the_grace() {
    let h = harness(|c| c.shutdown.grace_secs = 1).await;
    h.llm.set_delay(Duration::from_secs(60));

    for i in 0..3 {
        h.service
            .on_message_posted(
                &EventContext::detached(),
                post(&format!("p{i}"), "u1", "@ai think very hard"),
            )
            .await;
    }
    let started = Instant::now();
    h.service.deactivate().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert_eq!(h.service.status().runs_in_flight, 0);
    assert!(h.host.created().is_empty());
    assert_eq!(
        h.metrics.snapshot().categories.runs.by_outcome.get("cancelled"),
        Some(&3)
    );
}

#[tokio::test]
async fn nothing_is_admitted_after_deactivation() {
    let h = harness(|_| {}).await;
    h.service.deactivate().await.unwrap();

    let dispatch = h
        .service
        .on_message_posted(&EventContext::detached(), post("p1", "u1", "@ai hello?"))
        .await;
    assert_eq!(dispatch, Dispatch::Dropped(drop_reason::NOT_ACCEPTING));
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn second_deactivation_is_a_no_op() {
    let h = harness(|_| {}).await;
    h.service.deactivate().await.unwrap();
    h.service.deactivate().await.unwrap();

    let snap = h.metrics.snapshot();
    let deactivations = snap
        .metrics
        .iter()
        .filter(|m| m.name == parley_metrics::lifecycle::DEACTIVATIONS_TOTAL)
        .map(|m| m.value)
        .sum::<f64>();
    assert!((deactivations - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn bot_provisioning_failure_aborts_initialization() {
    let (_llm, addr) = start_llm().await;
    let cfg = config(addr, "model-a");
    let host = Arc::new(MockHost::default());
    host.fail_ensure.store(true, Ordering::SeqCst);

    let err = AgentsService::initialize(ServiceDeps {
        pool: ClientPool::from_factory(&DefaultHttpServiceFactory::new(cfg.http.clone())).unwrap(),
        config: Arc::new(ConfigStore::new(cfg).unwrap()),
        metrics: Metrics::new(InstanceInfo::new("i", "v")).unwrap(),
        host: host as Arc<dyn HostApi>,
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ActivationError::Bot { ref bot, .. } if bot == "ai"), "{err}");
}
