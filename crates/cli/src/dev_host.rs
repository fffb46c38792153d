//! In-memory chat host for local development.
//!
//! Stores posts and channels in process memory and logs every write the
//! plugin makes, so a developer can watch bots answer without a real chat
//! server.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    parley_common::{Channel, ChannelKind, HostApi, NewPost, Post},
    tracing::info,
};

#[derive(Default)]
pub struct DevHost {
    posts: Mutex<HashMap<String, Post>>,
    channels: Mutex<HashMap<String, Channel>>,
    bots: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl DevHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a post injected through the hook endpoints, filling in the id
    /// and timestamps when the caller left them out.
    pub fn accept(&self, mut post: Post) -> Post {
        if post.id.is_empty() {
            post.id = self.next_id("dev-post-");
        }
        if post.create_at == 0 {
            post.create_at = now_millis();
        }
        if post.update_at == 0 {
            post.update_at = post.create_at;
        }
        self.remember(&post);
        post
    }

    pub fn remember(&self, post: &Post) {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(post.id.clone(), post.clone());
    }

    pub fn add_channel(&self, channel: Channel) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.id.clone(), channel);
    }

    #[must_use]
    pub fn post(&self, post_id: &str) -> Option<Post> {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(post_id)
            .cloned()
    }

    /// Posts in `channel_id`, oldest first.
    #[must_use]
    pub fn channel_posts(&self, channel_id: &str) -> Vec<Post> {
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.channel_id == channel_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.create_at.cmp(&b.create_at).then_with(|| a.id.cmp(&b.id)));
        posts
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}{n}")
    }
}

#[async_trait]
impl HostApi for DevHost {
    async fn ensure_bot(&self, username: &str, display_name: &str) -> Result<String> {
        let mut bots = self.bots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = bots.get(username) {
            return Ok(id.clone());
        }
        let id = format!("bot-{username}");
        bots.insert(username.to_string(), id.clone());
        info!(%username, %display_name, user_id = %id, "bot account created");
        Ok(id)
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(channels.get(channel_id).cloned().unwrap_or_else(|| Channel {
            id: channel_id.to_string(),
            kind: ChannelKind::Open,
            member_ids: Vec::new(),
        }))
    }

    async fn get_post(&self, post_id: &str) -> Result<Post> {
        match self.post(post_id) {
            Some(post) => Ok(post),
            None => bail!("post {post_id} not found"),
        }
    }

    async fn create_post(&self, post: NewPost) -> Result<String> {
        let id = self.next_id("dev-post-");
        let now = now_millis();
        info!(
            post_id = %id,
            channel_id = %post.channel_id,
            root_id = %post.root_id,
            user_id = %post.user_id,
            message = %post.message,
            "post created"
        );
        self.remember(&Post {
            id: id.clone(),
            channel_id: post.channel_id,
            root_id: post.root_id,
            user_id: post.user_id,
            message: post.message,
            create_at: now,
            update_at: now,
            ..Default::default()
        });
        Ok(id)
    }

    async fn update_post(&self, post_id: &str, message: &str) -> Result<()> {
        let mut posts = self.posts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(post) = posts.get_mut(post_id) else {
            bail!("post {post_id} not found");
        };
        post.message = message.to_string();
        post.update_at = now_millis();
        info!(%post_id, %message, "post updated");
        Ok(())
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
