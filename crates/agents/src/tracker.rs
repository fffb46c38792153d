//! Per-post run bookkeeping.
//!
//! Every answered post has one entry. Admitting a run for a post that already
//! has one cancels the previous run and bumps the generation; only the run
//! holding the current generation may publish. Admission is ordered by the
//! post's content version, so an event carrying older text than the entry
//! already saw is refused instead of taking over. Publication happens under the
//! entry's reply lock, so the check and the host write are one step and a
//! post never ends up with two replies.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tokio_util::sync::CancellationToken,
};

/// Finished entries kept around so edits and regenerations can reuse the reply.
pub const MAX_FINISHED_ENTRIES: usize = 1024;

/// Handle a run gets on admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub post_id: String,
    pub generation: u64,
    pub cancel: CancellationToken,
    /// Whether an earlier run for the same post was still in flight.
    pub superseded: bool,
}

/// Why a run was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The tracker is closed.
    Closed,
    /// A run for newer content of the same post was already admitted.
    Stale,
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub generation: u64,
    pub version: i64,
    pub requester: String,
    pub bot: String,
    pub running: bool,
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    version: i64,
    cancel: CancellationToken,
    requester: String,
    bot: String,
    running: bool,
    finished_at: Option<Instant>,
    reply: Arc<Mutex<Option<String>>>,
}

/// Exclusive right to publish for one generation. Holds the reply lock.
#[derive(Debug)]
pub struct PublishSlot {
    reply: OwnedMutexGuard<Option<String>>,
}

impl PublishSlot {
    /// The reply post created by an earlier generation, if any.
    #[must_use]
    pub fn reply_id(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    pub fn set_reply_id(&mut self, id: String) {
        *self.reply = Some(id);
    }
}

#[derive(Debug)]
pub struct ConversationTracker {
    entries: DashMap<String, Entry>,
    accepting: AtomicBool,
}

impl Default for ConversationTracker {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }
}

impl ConversationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop admitting runs. Existing runs are unaffected.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Register a run for `post_id` at content `version`, superseding any
    /// earlier one. Versions equal to the stored one are admitted so the same
    /// text can be answered again.
    pub fn admit(
        &self,
        post_id: &str,
        version: i64,
        requester: &str,
        bot: &str,
        parent: &CancellationToken,
    ) -> Result<Admission, Refusal> {
        if !self.is_accepting() {
            return Err(Refusal::Closed);
        }
        let mut entry = self.entries.entry(post_id.to_string()).or_insert_with(|| Entry {
            generation: 0,
            version,
            cancel: CancellationToken::new(),
            requester: requester.to_string(),
            bot: bot.to_string(),
            running: false,
            finished_at: None,
            reply: Arc::new(Mutex::new(None)),
        });
        if version < entry.version {
            return Err(Refusal::Stale);
        }

        let cancel = parent.child_token();
        let superseded = entry.running;
        entry.cancel.cancel();
        entry.generation += 1;
        entry.version = version;
        entry.cancel = cancel.clone();
        entry.requester = requester.to_string();
        entry.bot = bot.to_string();
        entry.running = true;
        entry.finished_at = None;

        Ok(Admission {
            post_id: post_id.to_string(),
            generation: entry.generation,
            cancel,
            superseded,
        })
    }

    #[must_use]
    pub fn is_current(&self, post_id: &str, generation: u64) -> bool {
        self.entries
            .get(post_id)
            .is_some_and(|e| e.generation == generation)
    }

    #[must_use]
    pub fn info(&self, post_id: &str) -> Option<EntryInfo> {
        self.entries.get(post_id).map(|e| EntryInfo {
            generation: e.generation,
            version: e.version,
            requester: e.requester.clone(),
            bot: e.bot.clone(),
            running: e.running,
        })
    }

    /// Take the reply lock for `generation`. `None` when a newer generation
    /// exists, checked after the lock is held.
    pub async fn publish_slot(&self, post_id: &str, generation: u64) -> Option<PublishSlot> {
        let reply = Arc::clone(&self.entries.get(post_id)?.reply);
        let guard = reply.lock_owned().await;
        self.is_current(post_id, generation)
            .then_some(PublishSlot { reply: guard })
    }

    /// Cancel the in-flight run for `post_id`. Returns false when nothing runs.
    pub fn cancel(&self, post_id: &str) -> bool {
        match self.entries.get(post_id) {
            Some(e) if e.running => {
                e.cancel.cancel();
                true
            },
            _ => false,
        }
    }

    /// Mark `generation` finished. Stale generations are ignored.
    pub fn finish(&self, post_id: &str, generation: u64) {
        if let Some(mut e) = self.entries.get_mut(post_id)
            && e.generation == generation
        {
            e.running = false;
            e.finished_at = Some(Instant::now());
        }
        self.prune();
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.entries.iter().filter(|e| e.running).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&self) {
        let mut finished: Vec<(Instant, String)> = self
            .entries
            .iter()
            .filter_map(|e| e.finished_at.map(|at| (at, e.key().clone())))
            .collect();
        if finished.len() <= MAX_FINISHED_ENTRIES {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - MAX_FINISHED_ENTRIES;
        for (_, post_id) in finished.into_iter().take(excess) {
            self.entries.remove_if(&post_id, |_, e| !e.running);
        }
    }
}
