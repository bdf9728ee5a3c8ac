//! # Core Traits (Ports)
//!
//! Any storage plugin must implement these traits to be used by the binary.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::filter::{CandidateFilter, PageOrder};
use crate::models::{RankRow, Tag, ThreadRecord, ThreadTagLink, Vote};
use crate::votes::VoteTransition;

/// Source of the full tag table, read on every cache rebuild.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn load_tags(&self) -> anyhow::Result<Vec<Tag>>;
}

/// Read access to indexed threads, driven by a compiled [`CandidateFilter`].
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Number of distinct threads matching every predicate.
    async fn count_candidates(&self, filter: &CandidateFilter) -> anyhow::Result<i64>;

    /// Scoring inputs for every candidate. Vote counters are summed over the
    /// thread's links to `include_tag_ids` only (zero when none match).
    async fn rank_candidates(
        &self,
        filter: &CandidateFilter,
        include_tag_ids: &[i64],
    ) -> anyhow::Result<Vec<RankRow>>;

    /// One page of candidates ordered by a plain column.
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        order: &PageOrder,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<ThreadRecord>>;

    /// Hydrates the given threads. Order of the result is unspecified.
    async fn fetch_threads(&self, ids: &[i64]) -> anyhow::Result<Vec<ThreadRecord>>;
}

/// Persistence for tag votes and their denormalized counters.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Applies `vote` and the matching counter changes in one transaction.
    /// Returns `None` without writing anything when the tag is not applied
    /// to the thread.
    async fn apply_vote(&self, vote: Vote) -> anyhow::Result<Option<VoteTransition>>;

    /// Every tag link of a thread with its current counters.
    async fn thread_links(&self, thread_id: i64) -> anyhow::Result<Vec<ThreadTagLink>>;
}

/// Which threads a user has collected; owned by the collection subsystem.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CollectionLookup: Send + Sync {
    async fn collected_among(&self, user_id: i64, thread_ids: &[i64]) -> anyhow::Result<HashSet<i64>>;
}
