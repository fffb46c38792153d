//! Chat data model shared between the host boundary and the orchestration core.

use std::collections::HashMap;

use {
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
};

/// A chat message as delivered by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    /// Id of the thread root, empty for top-level posts.
    pub root_id: String,
    pub user_id: String,
    pub message: String,
    /// Non-empty for system posts (joins, header changes, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation time, unix millis.
    pub create_at: i64,
    /// Last edit time, unix millis.
    pub update_at: i64,
    pub props: HashMap<String, serde_json::Value>,
}

impl Post {
    /// The id replies should be threaded under.
    #[must_use]
    pub fn thread_root(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        !self.kind.is_empty()
    }

    /// Ordering key for the text of this post: the last edit time, or the
    /// creation time for posts never edited.
    #[must_use]
    pub fn content_version(&self) -> i64 {
        if self.update_at > 0 {
            self.update_at
        } else {
            self.create_at
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Open,
    Private,
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub kind: ChannelKind,
    /// Member user ids; hosts only need to fill this for direct and group channels.
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl Channel {
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.kind == ChannelKind::Direct
    }
}

/// Per-invocation carrier supplied by the host with every callback.
///
/// The token only covers the synchronous part of the callback. Work that the
/// orchestration service spawns in the background has its own lifecycle.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub request_id: String,
    pub cancel: CancellationToken,
}

impl EventContext {
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context with a fresh random request id.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::detached()
    }
}

/// Chat events the host forwards to the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    MessagePosted { post: Post },
    MessageUpdated { old: Post, new: Post },
}

impl ChatEvent {
    /// Metric/log label for the event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessagePosted { .. } => "posted",
            Self::MessageUpdated { .. } => "updated",
        }
    }

    #[must_use]
    pub fn post_id(&self) -> &str {
        match self {
            Self::MessagePosted { post } => &post.id,
            Self::MessageUpdated { new, .. } => &new.id,
        }
    }
}
