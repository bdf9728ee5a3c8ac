//! # Domain Models
//!
//! These structs represent the core entities of thread-finder.
//! Identities are the chat platform's 64-bit snowflakes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A forum thread as written by the indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    /// The parent forum channel; tag identities are scoped to it.
    pub channel_id: i64,
    pub author_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub reaction_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    pub first_message_excerpt: Option<String>,
    #[serde(default)]
    pub thumbnail_urls: Vec<String>,
    /// Strikes recorded by the external auditor. Non-zero means soft-deleted.
    #[serde(default)]
    pub not_found_count: i64,
}

/// A named label. The same name may exist under several ids, one per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    /// Unique user name
    pub name: String,
    pub global_name: Option<String>,
    pub display_name: String,
}

/// The association between a thread and one of its tags, with the
/// denormalized vote counters read by the ranking engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadTagLink {
    pub thread_id: i64,
    pub tag_id: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

/// The two admissible vote values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    /// Stored representation: +1 or -1.
    pub fn as_i64(self) -> i64 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(VoteValue::Up),
            -1 => Some(VoteValue::Down),
            _ => None,
        }
    }
}

/// One user's evaluation of one tag on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: i64,
    pub thread_id: i64,
    pub tag_id: i64,
    pub value: VoteValue,
}

/// Per-tag vote statistics as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagVoteStats {
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
}

impl From<&ThreadTagLink> for TagVoteStats {
    fn from(link: &ThreadTagLink) -> Self {
        Self {
            upvotes: link.upvotes,
            downvotes: link.downvotes,
            score: link.upvotes - link.downvotes,
        }
    }
}

/// The minimal projection needed to score a candidate in comprehensive sort.
/// `upvotes`/`downvotes` are summed over the links to the requested tags only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankRow {
    pub thread_id: i64,
    pub last_active_at: DateTime<Utc>,
    pub reaction_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

/// A hydrated thread as returned by the store, before tag names are resolved.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub thread: Thread,
    pub author_display_name: Option<String>,
    pub tag_ids: Vec<i64>,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: i64,
    pub channel_id: i64,
    pub title: String,
    pub author_id: i64,
    pub author_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub reaction_count: i64,
    pub reply_count: i64,
    pub first_message_excerpt: Option<String>,
    pub thumbnail_urls: Vec<String>,
    pub tags: Vec<String>,
    /// Whether the requesting user has collected this thread.
    pub collected: bool,
    /// Composite score, present only for comprehensive sort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A page of results plus the total candidate count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub results: Vec<ThreadSummary>,
}

impl SearchPage {
    pub fn empty(total: i64, limit: i64, offset: i64) -> Self {
        Self {
            total,
            limit,
            offset,
            results: Vec::new(),
        }
    }
}
