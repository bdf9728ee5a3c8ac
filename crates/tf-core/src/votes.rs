//! # Vote Aggregator
//!
//! A user holds at most one vote per (thread, tag). Casting the same value
//! again retracts it, casting the other value switches it. Every transition
//! moves the link's denormalized counters by the matching deltas.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{TagVoteStats, Vote, VoteValue};
use crate::traits::VoteStore;

/// What casting a vote did to the user's existing vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    Created(VoteValue),
    Retracted(VoteValue),
    Switched { from: VoteValue, to: VoteValue },
}

impl VoteTransition {
    pub fn plan(existing: Option<VoteValue>, new: VoteValue) -> Self {
        match existing {
            None => VoteTransition::Created(new),
            Some(old) if old == new => VoteTransition::Retracted(old),
            Some(old) => VoteTransition::Switched { from: old, to: new },
        }
    }

    /// `(upvotes, downvotes)` counter deltas.
    pub fn deltas(self) -> (i64, i64) {
        fn unit(value: VoteValue) -> (i64, i64) {
            match value {
                VoteValue::Up => (1, 0),
                VoteValue::Down => (0, 1),
            }
        }
        match self {
            VoteTransition::Created(v) => unit(v),
            VoteTransition::Retracted(v) => {
                let (u, d) = unit(v);
                (-u, -d)
            }
            VoteTransition::Switched { from, to } => {
                let (fu, fd) = unit(from);
                let (tu, td) = unit(to);
                (tu - fu, td - fd)
            }
        }
    }
}

pub struct VoteAggregator {
    store: Arc<dyn VoteStore>,
}

impl VoteAggregator {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    /// Applies `vote` and returns the thread's per-tag stats afterwards.
    /// A vote on a tag the thread does not carry changes nothing.
    pub async fn record_vote(
        &self,
        vote: Vote,
        tag_names: &HashMap<i64, String>,
    ) -> Result<BTreeMap<String, TagVoteStats>> {
        let applied = self
            .store
            .apply_vote(vote)
            .await
            .map_err(|e| AppError::Internal(format!("{e:#}")))?;

        match applied {
            Some(transition) => log::debug!(
                "Vote by user {} on thread {} tag {}: {:?}",
                vote.user_id,
                vote.thread_id,
                vote.tag_id,
                transition
            ),
            None => log::warn!(
                "Ignoring vote by user {}: tag {} is not applied to thread {}",
                vote.user_id,
                vote.tag_id,
                vote.thread_id
            ),
        }

        self.get_stats(vote.thread_id, tag_names).await
    }

    /// Stats keyed by tag name. Links whose tag id is missing from
    /// `tag_names` are skipped; ids sharing a name are summed.
    pub async fn get_stats(
        &self,
        thread_id: i64,
        tag_names: &HashMap<i64, String>,
    ) -> Result<BTreeMap<String, TagVoteStats>> {
        let links = self
            .store
            .thread_links(thread_id)
            .await
            .map_err(|e| AppError::Internal(format!("{e:#}")))?;

        let mut stats: BTreeMap<String, TagVoteStats> = BTreeMap::new();
        for link in &links {
            let Some(name) = tag_names.get(&link.tag_id) else {
                continue;
            };
            let entry = stats.entry(name.clone()).or_insert(TagVoteStats {
                upvotes: 0,
                downvotes: 0,
                score: 0,
            });
            let add = TagVoteStats::from(link);
            entry.upvotes += add.upvotes;
            entry.downvotes += add.downvotes;
            entry.score += add.score;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreadTagLink;
    use crate::traits::MockVoteStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory store applying transitions the way the SQL store does.
    #[derive(Default)]
    struct FakeVoteStore {
        links: Mutex<Vec<ThreadTagLink>>,
        votes: Mutex<HashMap<(i64, i64, i64), VoteValue>>,
    }

    #[async_trait]
    impl VoteStore for FakeVoteStore {
        async fn apply_vote(&self, vote: Vote) -> anyhow::Result<Option<VoteTransition>> {
            let mut links = self.links.lock().unwrap();
            let Some(link) = links
                .iter_mut()
                .find(|l| l.thread_id == vote.thread_id && l.tag_id == vote.tag_id)
            else {
                return Ok(None);
            };

            let mut votes = self.votes.lock().unwrap();
            let key = (vote.user_id, vote.thread_id, vote.tag_id);
            let transition = VoteTransition::plan(votes.get(&key).copied(), vote.value);
            match transition {
                VoteTransition::Retracted(_) => {
                    votes.remove(&key);
                }
                _ => {
                    votes.insert(key, vote.value);
                }
            }
            let (du, dd) = transition.deltas();
            link.upvotes += du;
            link.downvotes += dd;
            Ok(Some(transition))
        }

        async fn thread_links(&self, thread_id: i64) -> anyhow::Result<Vec<ThreadTagLink>> {
            Ok(self
                .links
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.thread_id == thread_id)
                .copied()
                .collect())
        }
    }

    fn aggregator() -> VoteAggregator {
        let store = FakeVoteStore::default();
        store.links.lock().unwrap().push(ThreadTagLink {
            thread_id: 1,
            tag_id: 10,
            upvotes: 0,
            downvotes: 0,
        });
        VoteAggregator::new(Arc::new(store))
    }

    fn names() -> HashMap<i64, String> {
        HashMap::from([(10, "Fantasy".to_string())])
    }

    fn vote(user_id: i64, value: VoteValue) -> Vote {
        Vote { user_id, thread_id: 1, tag_id: 10, value }
    }

    #[test]
    fn test_transition_table() {
        use VoteValue::*;
        assert_eq!(VoteTransition::plan(None, Up).deltas(), (1, 0));
        assert_eq!(VoteTransition::plan(Some(Up), Up).deltas(), (-1, 0));
        assert_eq!(VoteTransition::plan(Some(Down), Down).deltas(), (0, -1));
        assert_eq!(VoteTransition::plan(Some(Up), Down).deltas(), (-1, 1));
        assert_eq!(VoteTransition::plan(Some(Down), Up).deltas(), (1, -1));
    }

    #[tokio::test]
    async fn test_vote_retract_and_switch() {
        let agg = aggregator();

        let stats = agg.record_vote(vote(7, VoteValue::Up), &names()).await.unwrap();
        assert_eq!(stats["Fantasy"], TagVoteStats { upvotes: 1, downvotes: 0, score: 1 });

        let stats = agg.record_vote(vote(7, VoteValue::Up), &names()).await.unwrap();
        assert_eq!(stats["Fantasy"], TagVoteStats { upvotes: 0, downvotes: 0, score: 0 });

        agg.record_vote(vote(7, VoteValue::Up), &names()).await.unwrap();
        let stats = agg.record_vote(vote(7, VoteValue::Down), &names()).await.unwrap();
        assert_eq!(stats["Fantasy"], TagVoteStats { upvotes: 0, downvotes: 1, score: -1 });

        let stats = agg.record_vote(vote(8, VoteValue::Up), &names()).await.unwrap();
        assert_eq!(stats["Fantasy"], TagVoteStats { upvotes: 1, downvotes: 1, score: 0 });
    }

    #[tokio::test]
    async fn test_vote_on_missing_link_is_a_noop() {
        let agg = aggregator();
        let stray = Vote { tag_id: 99, ..vote(7, VoteValue::Up) };
        let stats = agg.record_vote(stray, &names()).await.unwrap();
        assert_eq!(stats["Fantasy"], TagVoteStats { upvotes: 0, downvotes: 0, score: 0 });
    }

    #[tokio::test]
    async fn test_store_failure_is_internal() {
        let mut store = MockVoteStore::new();
        store
            .expect_apply_vote()
            .returning(|_| Err(anyhow::anyhow!("disk I/O error")));
        let agg = VoteAggregator::new(Arc::new(store));

        let err = agg.record_vote(vote(7, VoteValue::Up), &names()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(msg) if msg.contains("disk I/O")));
    }
}
