//! # Search Service
//!
//! Runs one search end to end: validate, compile against the current tag
//! snapshot, count, order, hydrate the page and assemble [`ThreadSummary`]s.
//!
//! Comprehensive sort scores the whole candidate projection in memory and
//! hydrates only the ids of the requested page. Column sorts let the store
//! order and paginate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::filter::{CompiledQuery, FilterCompiler, PageOrder};
use crate::models::{SearchPage, ThreadRecord, ThreadSummary};
use crate::query::{QueryModel, SearchQuery, SortColumn, SortMethod};
use crate::ranking::{ExposureBoost, NoExposureBoost, Ranker, RankingSettings};
use crate::tags::{TagResolver, TagSnapshot};
use crate::traits::{CollectionLookup, ThreadStore};

pub struct SearchService {
    store: Arc<dyn ThreadStore>,
    collections: Arc<dyn CollectionLookup>,
    tags: Arc<TagResolver>,
    ranking: Arc<RankingSettings>,
    boost: Box<dyn ExposureBoost>,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        collections: Arc<dyn CollectionLookup>,
        tags: Arc<TagResolver>,
        ranking: Arc<RankingSettings>,
    ) -> Self {
        Self {
            store,
            collections,
            tags,
            ranking,
            boost: Box::new(NoExposureBoost),
        }
    }

    pub fn with_exposure_boost(mut self, boost: Box<dyn ExposureBoost>) -> Self {
        self.boost = boost;
        self
    }

    pub async fn search(&self, model: &QueryModel) -> Result<SearchPage> {
        self.search_at(model, Utc::now()).await
    }

    /// [`Self::search`] with an explicit clock for relative times and decay.
    pub async fn search_at(&self, model: &QueryModel, now: DateTime<Utc>) -> Result<SearchPage> {
        let query = model.validate(now)?;
        let tags = self.tags.snapshot();
        let compiled = FilterCompiler::compile(&query, &tags);

        self.execute(&query, &compiled, &tags, now).await.map_err(|e| {
            log::error!("Search failed: {e:#}");
            AppError::SearchFailed
        })
    }

    async fn execute(
        &self,
        query: &SearchQuery,
        compiled: &CompiledQuery,
        tags: &TagSnapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SearchPage> {
        let total = self.store.count_candidates(&compiled.filter).await?;
        if total == 0 || query.offset >= total {
            return Ok(SearchPage::empty(total, query.limit, query.offset));
        }

        let page: Vec<(ThreadRecord, Option<f64>)> =
            if let SortMethod::Column(column) = query.sort_method.effective() {
                let order = PageOrder {
                    column: match (column, query.viewer_id) {
                        (SortColumn::CollectedAt, None) => SortColumn::LastActiveAt,
                        (c, _) => *c,
                    },
                    order: query.sort_order,
                    viewer_id: query.viewer_id,
                };
                self.store
                    .fetch_page(&compiled.filter, &order, query.offset, query.limit)
                    .await?
                    .into_iter()
                    .map(|record| (record, None))
                    .collect()
            } else {
                self.ranked_page(query, compiled, now).await?
            };

        let ids: Vec<i64> = page.iter().map(|(r, _)| r.thread.id).collect();
        let collected = match query.viewer_id {
            Some(viewer) if !ids.is_empty() => self.collections.collected_among(viewer, &ids).await?,
            _ => HashSet::new(),
        };

        let results = page
            .into_iter()
            .map(|(record, score)| summarize(record, score, tags, &collected))
            .collect();

        Ok(SearchPage {
            total,
            limit: query.limit,
            offset: query.offset,
            results,
        })
    }

    async fn ranked_page(
        &self,
        query: &SearchQuery,
        compiled: &CompiledQuery,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(ThreadRecord, Option<f64>)>> {
        let config = self.ranking.current();
        let rows = self
            .store
            .rank_candidates(&compiled.filter, &compiled.include_tag_ids)
            .await?;

        let ranker = Ranker::new(&config, !compiled.include_tag_ids.is_empty(), now);
        let window: Vec<(i64, f64)> = ranker
            .rank(rows, query.sort_order, self.boost.as_ref())
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(row, score)| (row.thread_id, score))
            .collect();

        let ids: Vec<i64> = window.iter().map(|(id, _)| *id).collect();
        let mut hydrated: HashMap<i64, ThreadRecord> = self
            .store
            .fetch_threads(&ids)
            .await?
            .into_iter()
            .map(|r| (r.thread.id, r))
            .collect();

        Ok(window
            .into_iter()
            .filter_map(|(id, score)| hydrated.remove(&id).map(|r| (r, Some(score))))
            .collect())
    }
}

fn summarize(
    record: ThreadRecord,
    score: Option<f64>,
    tags: &TagSnapshot,
    collected: &HashSet<i64>,
) -> ThreadSummary {
    let mut names: Vec<String> = record
        .tag_ids
        .iter()
        .filter_map(|id| tags.resolve_name(*id))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();

    let t = record.thread;
    ThreadSummary {
        thread_id: t.id,
        channel_id: t.channel_id,
        title: t.title,
        author_id: t.author_id,
        author_name: record.author_display_name,
        created_at: t.created_at,
        last_active_at: t.last_active_at,
        reaction_count: t.reaction_count,
        reply_count: t.reply_count,
        first_message_excerpt: t.first_message_excerpt,
        thumbnail_urls: t.thumbnail_urls,
        tags: names,
        collected: collected.contains(&t.id),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CandidateFilter;
    use crate::models::{RankRow, Tag, Thread};
    use crate::tags::TagSnapshot;
    use crate::traits::{MockCollectionLookup, MockThreadStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn thread(id: i64, age_days: i64, reactions: i64) -> ThreadRecord {
        ThreadRecord {
            thread: Thread {
                id,
                channel_id: 1,
                author_id: 100,
                title: format!("thread {id}"),
                created_at: now() - Duration::days(age_days),
                last_active_at: now() - Duration::days(age_days),
                reaction_count: reactions,
                reply_count: 0,
                first_message_excerpt: None,
                thumbnail_urls: vec![],
                not_found_count: 0,
            },
            author_display_name: Some("Alice".into()),
            tag_ids: vec![11, 10],
        }
    }

    /// Ignores the filter: every stored thread is a candidate.
    struct FakeThreadStore {
        threads: Vec<ThreadRecord>,
    }

    #[async_trait]
    impl ThreadStore for FakeThreadStore {
        async fn count_candidates(&self, _filter: &CandidateFilter) -> anyhow::Result<i64> {
            Ok(self.threads.len() as i64)
        }

        async fn rank_candidates(
            &self,
            _filter: &CandidateFilter,
            _include_tag_ids: &[i64],
        ) -> anyhow::Result<Vec<RankRow>> {
            Ok(self
                .threads
                .iter()
                .map(|r| RankRow {
                    thread_id: r.thread.id,
                    last_active_at: r.thread.last_active_at,
                    reaction_count: r.thread.reaction_count,
                    upvotes: 0,
                    downvotes: 0,
                })
                .collect())
        }

        async fn fetch_page(
            &self,
            _filter: &CandidateFilter,
            _order: &PageOrder,
            offset: i64,
            limit: i64,
        ) -> anyhow::Result<Vec<ThreadRecord>> {
            let mut sorted = self.threads.clone();
            sorted.sort_by_key(|r| std::cmp::Reverse(r.thread.reaction_count));
            Ok(sorted.into_iter().skip(offset as usize).take(limit as usize).collect())
        }

        async fn fetch_threads(&self, ids: &[i64]) -> anyhow::Result<Vec<ThreadRecord>> {
            // Reverse order to prove the service restores ranking order.
            Ok(self
                .threads
                .iter()
                .rev()
                .filter(|r| ids.contains(&r.thread.id))
                .cloned()
                .collect())
        }
    }

    fn no_collections() -> Arc<MockCollectionLookup> {
        let mut lookup = MockCollectionLookup::new();
        lookup.expect_collected_among().returning(|_, _| Ok(HashSet::new()));
        Arc::new(lookup)
    }

    fn resolver() -> Arc<TagResolver> {
        let resolver = TagResolver::new();
        resolver.replace(TagSnapshot::from_tags([
            Tag { id: 10, name: "Fantasy".into() },
            Tag { id: 11, name: "Fantasy".into() },
        ]));
        Arc::new(resolver)
    }

    fn service(store: Arc<dyn ThreadStore>, collections: Arc<dyn CollectionLookup>) -> SearchService {
        SearchService::new(store, collections, resolver(), Arc::new(RankingSettings::default()))
    }

    fn sample_store() -> Arc<FakeThreadStore> {
        Arc::new(FakeThreadStore {
            threads: vec![thread(1, 30, 0), thread(2, 0, 5), thread(3, 2, 50)],
        })
    }

    #[tokio::test]
    async fn test_offset_beyond_total_returns_empty_page() {
        let svc = service(sample_store(), no_collections());
        let model = QueryModel { offset: 10, ..Default::default() };

        let page = svc.search_at(&model, now()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.offset, 10);
        assert!(page.results.is_empty());
    }

    #[tokio::test]
    async fn test_comprehensive_sort_orders_by_score() {
        let svc = service(sample_store(), no_collections());
        let page = svc.search_at(&QueryModel::default(), now()).await.unwrap();

        let ids: Vec<i64> = page.results.iter().map(|r| r.thread_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(page.results.iter().all(|r| r.score.is_some()));
        assert_eq!(page.results[0].tags, vec!["Fantasy"]);
        assert_eq!(page.results[0].author_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_comprehensive_sort_paginates_after_ranking() {
        let svc = service(sample_store(), no_collections());
        let model = QueryModel { offset: 1, limit: 1, ..Default::default() };

        let page = svc.search_at(&model, now()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].thread_id, 2);
    }

    #[tokio::test]
    async fn test_column_sort_has_no_score() {
        let svc = service(sample_store(), no_collections());
        let model = QueryModel { sort_method: "reaction_count".into(), ..Default::default() };

        let page = svc.search_at(&model, now()).await.unwrap();
        assert_eq!(page.results[0].thread_id, 3);
        assert!(page.results.iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn test_collected_flag_for_viewer() {
        let mut lookup = MockCollectionLookup::new();
        lookup
            .expect_collected_among()
            .withf(|user, _| *user == 42)
            .returning(|_, _| Ok(HashSet::from([2])));
        let svc = service(sample_store(), Arc::new(lookup));
        let model = QueryModel { viewer_id: Some(42), ..Default::default() };

        let page = svc.search_at(&model, now()).await.unwrap();
        for summary in &page.results {
            assert_eq!(summary.collected, summary.thread_id == 2);
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_generically() {
        let mut store = MockThreadStore::new();
        store
            .expect_count_candidates()
            .returning(|_| Err(anyhow::anyhow!("no such table: threads")));
        let svc = service(Arc::new(store), no_collections());

        let err = svc.search_at(&QueryModel::default(), now()).await.unwrap_err();
        assert!(matches!(err, AppError::SearchFailed));
        assert_eq!(err.to_string(), "search failed");
    }

    #[tokio::test]
    async fn test_validation_error_runs_no_query() {
        let mut store = MockThreadStore::new();
        store.expect_count_candidates().never();
        let svc = service(Arc::new(store), no_collections());
        let model = QueryModel { limit: 0, ..Default::default() };

        let err = svc.search_at(&model, now()).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
