//! Copy-on-write configuration store.
//!
//! Readers take an `Arc<Snapshot>` and keep it for as long as they need a
//! consistent view. Writers are serialized, validate before publishing and
//! swap the whole snapshot in one step, so a reader never observes a partially
//! applied document.

use std::{
    ops::Deref,
    sync::{Arc, Mutex, PoisonError},
};

use {
    tokio::sync::watch,
    tracing::{info, warn},
};

use crate::{
    error::{ConfigError, Result},
    schema::PluginConfig,
    validate::{Severity, validate_config},
};

/// An immutable, published configuration.
#[derive(Debug)]
pub struct Snapshot {
    revision: u64,
    config: PluginConfig,
}

impl Snapshot {
    /// Monotonic publication counter, starting at 1 for the initial document.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Deref for Snapshot {
    type Target = PluginConfig;

    fn deref(&self) -> &PluginConfig {
        &self.config
    }
}

pub struct ConfigStore {
    current: watch::Sender<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Validate and publish the initial document as revision 1.
    pub fn new(config: PluginConfig) -> Result<Self> {
        check(&config)?;
        let (current, _) = watch::channel(Arc::new(Snapshot {
            revision: 1,
            config,
        }));
        Ok(Self {
            current,
            writer: Mutex::new(()),
        })
    }

    /// The current snapshot. Never waits on writers longer than a pointer clone.
    #[must_use]
    pub fn get(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.borrow())
    }

    /// Validate `config` and publish it. On failure the previous snapshot
    /// stays active and the diagnostics are returned.
    pub fn set(&self, config: PluginConfig) -> Result<Arc<Snapshot>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.get();
        if let Err(e) = check(&config) {
            warn!(
                revision = previous.revision,
                error = %e,
                "configuration rejected, keeping previous snapshot"
            );
            return Err(e);
        }

        let next = Arc::new(Snapshot {
            revision: previous.revision + 1,
            config,
        });
        self.current.send_replace(Arc::clone(&next));
        info!(revision = next.revision, "configuration published");
        Ok(next)
    }

    /// Receiver notified on every publication.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.current.subscribe()
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("revision", &self.get().revision)
            .finish()
    }
}

fn check(config: &PluginConfig) -> Result<()> {
    let result = validate_config(config);
    if result.has_errors() {
        return Err(ConfigError::Invalid(result));
    }
    for d in result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
    {
        warn!(path = %d.path, category = d.category, "{}", d.message);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{BotConfig, EndpointConfig},
        std::{
            sync::atomic::{AtomicBool, Ordering},
            thread,
        },
    };

    fn config(tag: &str) -> PluginConfig {
        PluginConfig {
            endpoints: vec![EndpointConfig {
                name: format!("{tag}-endpoint"),
                url: format!("https://{tag}.example/v1"),
                model: format!("{tag}-model"),
                api_key: Some(secrecy::Secret::new("k".into())),
                ..Default::default()
            }],
            bots: vec![BotConfig {
                name: format!("{tag}-bot"),
                endpoint: format!("{tag}-endpoint"),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn initial_document_is_validated() {
        let err = ConfigStore::new(PluginConfig::default()).unwrap_err();
        assert!(err.validation().unwrap().has_errors());
    }

    #[test]
    fn set_publishes_new_revision() {
        let store = ConfigStore::new(config("a")).unwrap();
        assert_eq!(store.get().revision(), 1);

        let snap = store.set(config("b")).unwrap();
        assert_eq!(snap.revision(), 2);
        assert_eq!(store.get().endpoints[0].name, "b-endpoint");
    }

    #[test]
    fn rejected_set_keeps_previous_snapshot() {
        let store = ConfigStore::new(config("a")).unwrap();
        let mut bad = config("b");
        bad.bots[0].endpoint = "missing".into();

        let err = store.set(bad).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let snap = store.get();
        assert_eq!(snap.revision(), 1);
        assert_eq!(snap.bots[0].name, "a-bot");
    }

    #[test]
    fn held_snapshot_survives_reload() {
        let store = ConfigStore::new(config("a")).unwrap();
        let held = store.get();
        store.set(config("b")).unwrap();
        assert_eq!(held.endpoints[0].model, "a-model");
        assert_eq!(store.get().endpoints[0].model, "b-model");
    }

    #[tokio::test]
    async fn subscribers_see_publications() {
        let store = ConfigStore::new(config("a")).unwrap();
        let mut rx = store.subscribe();
        store.set(config("b")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().revision(), 2);
    }

    #[test]
    fn concurrent_readers_see_whole_documents() {
        let store = Arc::new(ConfigStore::new(config("a")).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut reads = 0u64;
                    loop {
                        let snap = store.get();
                        let tag = snap.endpoints[0]
                            .name
                            .strip_suffix("-endpoint")
                            .unwrap()
                            .to_string();
                        assert_eq!(snap.endpoints[0].model, format!("{tag}-model"));
                        assert_eq!(snap.bots[0].name, format!("{tag}-bot"));
                        assert_eq!(snap.bots[0].endpoint, snap.endpoints[0].name);
                        reads += 1;
                        if done.load(Ordering::Relaxed) {
                            break reads;
                        }
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let tag = if i % 2 == 0 { "b" } else { "a" };
            store.set(config(tag)).unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(store.get().revision(), 201);
    }
}
