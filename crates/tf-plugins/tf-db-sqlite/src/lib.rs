//! # tf-db-sqlite Implementation
//!
//! This module implements the tf-core ports on top of SQLite. Candidate
//! predicates are translated into one `WHERE` clause over `threads t`;
//! full-text predicates run against an FTS5 table holding the segmented
//! title and excerpt of each thread (rowid = thread id).
//!
//! Timestamps are stored as unix seconds.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tf_core::filter::{CandidateFilter, CountColumn, PageOrder, Predicate, TimeColumn};
use tf_core::fts;
use tf_core::models::{Author, RankRow, Tag, Thread, ThreadRecord, ThreadTagLink, Vote, VoteValue};
use tf_core::query::{SortColumn, SortOrder};
use tf_core::traits::{CollectionLookup, TagSource, ThreadStore, VoteStore};
use tf_core::votes::VoteTransition;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        global_name TEXT,
        display_name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        id INTEGER PRIMARY KEY,
        channel_id INTEGER NOT NULL,
        author_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_active_at INTEGER NOT NULL,
        reaction_count INTEGER NOT NULL DEFAULT 0,
        reply_count INTEGER NOT NULL DEFAULT 0,
        first_message_excerpt TEXT,
        thumbnail_urls TEXT NOT NULL DEFAULT '[]',
        not_found_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_threads_channel ON threads (channel_id)",
    "CREATE INDEX IF NOT EXISTS idx_threads_last_active ON threads (last_active_at)",
    "CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS thread_tags (
        thread_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        upvotes INTEGER NOT NULL DEFAULT 0,
        downvotes INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (thread_id, tag_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_thread_tags_tag ON thread_tags (tag_id)",
    "CREATE TABLE IF NOT EXISTS tag_votes (
        user_id INTEGER NOT NULL,
        thread_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        vote INTEGER NOT NULL,
        PRIMARY KEY (user_id, thread_id, tag_id)
    )",
    "CREATE TABLE IF NOT EXISTS user_collections (
        user_id INTEGER NOT NULL,
        thread_id INTEGER NOT NULL,
        collected_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, thread_id)
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS thread_fts USING fts5(content, tokenize = 'unicode61')",
];

const THREAD_COLUMNS: &str = "SELECT t.id, t.channel_id, t.author_id, t.title, t.created_at, \
     t.last_active_at, t.reaction_count, t.reply_count, t.first_message_excerpt, \
     t.thumbnail_urls, t.not_found_count, \
     COALESCE(NULLIF(a.display_name, ''), a.global_name, a.name) AS author_display_name \
     FROM threads t LEFT JOIN authors a ON a.id = t.author_id";

pub struct SqliteThreadStore {
    pool: SqlitePool,
}

// Helpers for timestamp conversion
fn to_unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_contains(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_id_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, ids: &[i64], negate: bool) {
    qb.push(column);
    qb.push(if negate { " NOT IN (" } else { " IN (" });
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

fn push_predicate<'a>(qb: &mut QueryBuilder<'a, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::NotSoftDeleted => {
            qb.push("t.not_found_count = 0");
        }
        Predicate::ChannelIn(ids) => push_id_list(qb, "t.channel_id", ids, false),
        Predicate::ThreadNotIn(ids) => push_id_list(qb, "t.id", ids, true),
        Predicate::AuthorIn(ids) => push_id_list(qb, "t.author_id", ids, false),
        Predicate::AuthorNotIn(ids) => push_id_list(qb, "t.author_id", ids, true),
        Predicate::AuthorNameMatches(name) => {
            let pattern = like_contains(name);
            qb.push("t.author_id IN (SELECT id FROM authors WHERE lower(name) = lower(")
                .push_bind(name.clone())
                .push(") OR global_name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR display_name LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        Predicate::TimeRange { column, after, before } => {
            let column = match column {
                TimeColumn::CreatedAt => "t.created_at",
                TimeColumn::LastActiveAt => "t.last_active_at",
            };
            qb.push("1 = 1");
            if let Some(after) = after {
                qb.push(" AND ").push(column).push(" >= ").push_bind(to_unix(*after));
            }
            if let Some(before) = before {
                qb.push(" AND ").push(column).push(" <= ").push_bind(to_unix(*before));
            }
        }
        Predicate::CountRange { column, range } => {
            let column = match column {
                CountColumn::ReactionCount => "t.reaction_count",
                CountColumn::ReplyCount => "t.reply_count",
            };
            qb.push(column)
                .push(if range.min_inclusive { " >= " } else { " > " })
                .push_bind(range.min)
                .push(" AND ")
                .push(column)
                .push(if range.max_inclusive { " <= " } else { " < " })
                .push_bind(range.max);
        }
        Predicate::HasAnyTag(ids) => {
            qb.push("EXISTS (SELECT 1 FROM thread_tags tt WHERE tt.thread_id = t.id AND ");
            push_id_list(qb, "tt.tag_id", ids, false);
            qb.push(")");
        }
        Predicate::HasNoTag(ids) => {
            qb.push("NOT EXISTS (SELECT 1 FROM thread_tags tt WHERE tt.thread_id = t.id AND ");
            push_id_list(qb, "tt.tag_id", ids, false);
            qb.push(")");
        }
        Predicate::TextMatches(expr) => {
            qb.push("t.id IN (SELECT rowid FROM thread_fts WHERE thread_fts MATCH ")
                .push_bind(expr.clone())
                .push(")");
        }
        Predicate::TextExcludes(expr) => {
            qb.push("t.id NOT IN (SELECT rowid FROM thread_fts WHERE thread_fts MATCH ")
                .push_bind(expr.clone())
                .push(")");
        }
        Predicate::CollectedBy(user_id) => {
            qb.push("EXISTS (SELECT 1 FROM user_collections uc WHERE uc.thread_id = t.id AND uc.user_id = ")
                .push_bind(*user_id)
                .push(")");
        }
    }
}

fn push_where<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &CandidateFilter) {
    qb.push(" WHERE 1 = 1");
    for predicate in &filter.predicates {
        qb.push(" AND (");
        push_predicate(qb, predicate);
        qb.push(")");
    }
}

fn record_from_row(row: &SqliteRow) -> ThreadRecord {
    ThreadRecord {
        thread: Thread {
            id: row.get("id"),
            channel_id: row.get("channel_id"),
            author_id: row.get("author_id"),
            title: row.get("title"),
            created_at: from_unix(row.get("created_at")),
            last_active_at: from_unix(row.get("last_active_at")),
            reaction_count: row.get("reaction_count"),
            reply_count: row.get("reply_count"),
            first_message_excerpt: row.get("first_message_excerpt"),
            thumbnail_urls: serde_json::from_str(&row.get::<String, _>("thumbnail_urls")).unwrap_or_default(),
            not_found_count: row.get("not_found_count"),
        },
        author_display_name: row.get("author_display_name"),
        tag_ids: Vec::new(),
    }
}

impl SqliteThreadStore {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists. In-memory databases get a single connection so every
    /// query sees the same data.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        log::info!("Opened SQLite store at {url}");
        Ok(Self { pool })
    }

    pub async fn upsert_author(&self, author: &Author) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO authors (id, name, global_name, display_name) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                 global_name = excluded.global_name, display_name = excluded.display_name",
        )
        .bind(author.id)
        .bind(&author.name)
        .bind(&author.global_name)
        .bind(&author.display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_tag(&self, tag: &Tag) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO tags (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name")
            .bind(tag.id)
            .bind(&tag.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes a thread, its full-text row and its tag set in one transaction.
    /// Links kept across calls keep their vote counters.
    pub async fn upsert_thread(&self, thread: &Thread, tag_ids: &[i64]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO threads (id, channel_id, author_id, title, created_at, last_active_at,
                 reaction_count, reply_count, first_message_excerpt, thumbnail_urls, not_found_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET channel_id = excluded.channel_id,
                 author_id = excluded.author_id, title = excluded.title,
                 created_at = excluded.created_at, last_active_at = excluded.last_active_at,
                 reaction_count = excluded.reaction_count, reply_count = excluded.reply_count,
                 first_message_excerpt = excluded.first_message_excerpt,
                 thumbnail_urls = excluded.thumbnail_urls, not_found_count = excluded.not_found_count",
        )
        .bind(thread.id)
        .bind(thread.channel_id)
        .bind(thread.author_id)
        .bind(&thread.title)
        .bind(to_unix(thread.created_at))
        .bind(to_unix(thread.last_active_at))
        .bind(thread.reaction_count)
        .bind(thread.reply_count)
        .bind(&thread.first_message_excerpt)
        .bind(serde_json::to_string(&thread.thumbnail_urls)?)
        .bind(thread.not_found_count)
        .execute(&mut *tx)
        .await?;

        let text = format!(
            "{} {}",
            thread.title,
            thread.first_message_excerpt.as_deref().unwrap_or_default()
        );
        sqlx::query("DELETE FROM thread_fts WHERE rowid = ?")
            .bind(thread.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO thread_fts (rowid, content) VALUES (?, ?)")
            .bind(thread.id)
            .bind(fts::segment(&text))
            .execute(&mut *tx)
            .await?;

        let mut stale = QueryBuilder::<Sqlite>::new("DELETE FROM thread_tags WHERE thread_id = ");
        stale.push_bind(thread.id).push(" AND ");
        push_id_list(&mut stale, "tag_id", tag_ids, true);
        stale.build().execute(&mut *tx).await?;

        for tag_id in tag_ids {
            sqlx::query("INSERT OR IGNORE INTO thread_tags (thread_id, tag_id) VALUES (?, ?)")
                .bind(thread.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Adds a thread to a user's collection.
    pub async fn collect(&self, user_id: i64, thread_id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO user_collections (user_id, thread_id, collected_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id, thread_id) DO UPDATE SET collected_at = excluded.collected_at",
        )
        .bind(user_id)
        .bind(thread_id)
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fills `tag_ids` of every record with one query.
    async fn attach_tags(&self, records: &mut [ThreadRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = records.iter().map(|r| r.thread.id).collect();
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT thread_id, tag_id FROM thread_tags WHERE ");
        push_id_list(&mut qb, "thread_id", &ids, false);
        qb.push(" ORDER BY tag_id");

        let mut by_thread: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in qb.build().fetch_all(&self.pool).await? {
            by_thread
                .entry(row.get("thread_id"))
                .or_default()
                .push(row.get("tag_id"));
        }
        for record in records.iter_mut() {
            record.tag_ids = by_thread.remove(&record.thread.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn count_candidates(&self, filter: &CandidateFilter) -> anyhow::Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM threads t");
        push_where(&mut qb, filter);
        Ok(qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?)
    }

    async fn rank_candidates(
        &self,
        filter: &CandidateFilter,
        include_tag_ids: &[i64],
    ) -> anyhow::Result<Vec<RankRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT t.id, t.last_active_at, t.reaction_count, ");
        if include_tag_ids.is_empty() {
            qb.push("0 AS upvotes, 0 AS downvotes");
        } else {
            for (i, column) in ["upvotes", "downvotes"].into_iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("COALESCE((SELECT SUM(tt.{column}) FROM thread_tags tt WHERE tt.thread_id = t.id AND "));
                push_id_list(&mut qb, "tt.tag_id", include_tag_ids, false);
                qb.push(format!("), 0) AS {column}"));
            }
        }
        qb.push(" FROM threads t");
        push_where(&mut qb, filter);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| RankRow {
                thread_id: row.get("id"),
                last_active_at: from_unix(row.get("last_active_at")),
                reaction_count: row.get("reaction_count"),
                upvotes: row.get("upvotes"),
                downvotes: row.get("downvotes"),
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        order: &PageOrder,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<ThreadRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(THREAD_COLUMNS);

        let column = match (order.column, order.viewer_id) {
            (SortColumn::CollectedAt, Some(viewer)) => {
                qb.push(" LEFT JOIN user_collections c ON c.thread_id = t.id AND c.user_id = ")
                    .push_bind(viewer);
                "c.collected_at"
            }
            (SortColumn::CreatedAt, _) => "t.created_at",
            (SortColumn::ReactionCount, _) => "t.reaction_count",
            (SortColumn::ReplyCount, _) => "t.reply_count",
            (SortColumn::LastActiveAt, _) | (SortColumn::CollectedAt, None) => "t.last_active_at",
        };
        push_where(&mut qb, filter);

        let direction = match order.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        qb.push(format!(" ORDER BY {column} {direction}, t.id ASC LIMIT "))
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut records: Vec<ThreadRecord> = rows.iter().map(record_from_row).collect();
        self.attach_tags(&mut records).await?;
        Ok(records)
    }

    async fn fetch_threads(&self, ids: &[i64]) -> anyhow::Result<Vec<ThreadRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(THREAD_COLUMNS);
        qb.push(" WHERE ");
        push_id_list(&mut qb, "t.id", ids, false);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut records: Vec<ThreadRecord> = rows.iter().map(record_from_row).collect();
        self.attach_tags(&mut records).await?;
        Ok(records)
    }
}

#[async_trait]
impl TagSource for SqliteThreadStore {
    async fn load_tags(&self) -> anyhow::Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, name FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Tag {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}

#[async_trait]
impl VoteStore for SqliteThreadStore {
    /// Counter changes are relative (`col = col + ?`) so concurrent votes on
    /// the same link never overwrite each other.
    async fn apply_vote(&self, vote: Vote) -> anyhow::Result<Option<VoteTransition>> {
        let mut tx = self.pool.begin().await?;

        let linked = sqlx::query("SELECT 1 FROM thread_tags WHERE thread_id = ? AND tag_id = ?")
            .bind(vote.thread_id)
            .bind(vote.tag_id)
            .fetch_optional(&mut *tx)
            .await?;
        if linked.is_none() {
            return Ok(None);
        }

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT vote FROM tag_votes WHERE user_id = ? AND thread_id = ? AND tag_id = ?")
                .bind(vote.user_id)
                .bind(vote.thread_id)
                .bind(vote.tag_id)
                .fetch_optional(&mut *tx)
                .await?;
        let transition = VoteTransition::plan(existing.and_then(VoteValue::from_i64), vote.value);

        match transition {
            VoteTransition::Retracted(_) => {
                sqlx::query("DELETE FROM tag_votes WHERE user_id = ? AND thread_id = ? AND tag_id = ?")
                    .bind(vote.user_id)
                    .bind(vote.thread_id)
                    .bind(vote.tag_id)
                    .execute(&mut *tx)
                    .await?;
            }
            VoteTransition::Created(_) | VoteTransition::Switched { .. } => {
                sqlx::query(
                    "INSERT INTO tag_votes (user_id, thread_id, tag_id, vote) VALUES (?, ?, ?, ?)
                     ON CONFLICT(user_id, thread_id, tag_id) DO UPDATE SET vote = excluded.vote",
                )
                .bind(vote.user_id)
                .bind(vote.thread_id)
                .bind(vote.tag_id)
                .bind(vote.value.as_i64())
                .execute(&mut *tx)
                .await?;
            }
        }

        let (up, down) = transition.deltas();
        sqlx::query(
            "UPDATE thread_tags SET upvotes = upvotes + ?, downvotes = downvotes + ?
             WHERE thread_id = ? AND tag_id = ?",
        )
        .bind(up)
        .bind(down)
        .bind(vote.thread_id)
        .bind(vote.tag_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(transition))
    }

    async fn thread_links(&self, thread_id: i64) -> anyhow::Result<Vec<ThreadTagLink>> {
        let rows = sqlx::query(
            "SELECT thread_id, tag_id, upvotes, downvotes FROM thread_tags WHERE thread_id = ? ORDER BY tag_id",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ThreadTagLink {
                thread_id: row.get("thread_id"),
                tag_id: row.get("tag_id"),
                upvotes: row.get("upvotes"),
                downvotes: row.get("downvotes"),
            })
            .collect())
    }
}

#[async_trait]
impl CollectionLookup for SqliteThreadStore {
    async fn collected_among(&self, user_id: i64, thread_ids: &[i64]) -> anyhow::Result<HashSet<i64>> {
        if thread_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT thread_id FROM user_collections WHERE user_id = ");
        qb.push_bind(user_id).push(" AND ");
        push_id_list(&mut qb, "thread_id", thread_ids, false);

        let ids: Vec<i64> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tf_core::filter::FilterCompiler;
    use tf_core::query::{QueryModel, TagLogic};
    use tf_core::ranking::RankingSettings;
    use tf_core::search::SearchService;
    use tf_core::tags::TagResolver;
    use tf_core::votes::VoteAggregator;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn thread(id: i64, title: &str, excerpt: &str) -> Thread {
        Thread {
            id,
            channel_id: 1,
            author_id: 100,
            title: title.to_string(),
            created_at: now() - Duration::days(id),
            last_active_at: now() - Duration::days(id),
            reaction_count: id * 10,
            reply_count: id,
            first_message_excerpt: Some(excerpt.to_string()),
            thumbnail_urls: vec![format!("https://cdn.example/{id}.png")],
            not_found_count: 0,
        }
    }

    async fn seeded() -> SqliteThreadStore {
        let store = SqliteThreadStore::new("sqlite::memory:").await.unwrap();
        store
            .upsert_author(&Author {
                id: 100,
                name: "alice".into(),
                global_name: Some("Alice Liddell".into()),
                display_name: "Wonder".into(),
            })
            .await
            .unwrap();
        for (id, name) in [(10, "A"), (11, "A"), (20, "B")] {
            store.upsert_tag(&Tag { id, name: name.into() }).await.unwrap();
        }
        store
            .upsert_thread(&thread(1, "Dragon tales", "a story about a red dragon"), &[10, 20])
            .await
            .unwrap();
        store
            .upsert_thread(&thread(2, "Only A", "nothing to see"), &[11])
            .await
            .unwrap();
        store
            .upsert_thread(&thread(3, "Untagged", "plain text"), &[])
            .await
            .unwrap();
        store
    }

    async fn candidates(store: &SqliteThreadStore, model: QueryModel) -> Vec<i64> {
        let resolver = TagResolver::new();
        resolver.rebuild(store).await.unwrap();
        let query = model.validate(now()).unwrap();
        let compiled = FilterCompiler::compile(&query, &resolver.snapshot());

        let order = PageOrder {
            column: SortColumn::CreatedAt,
            order: SortOrder::Desc,
            viewer_id: None,
        };
        let records = store.fetch_page(&compiled.filter, &order, 0, 100).await.unwrap();
        assert_eq!(
            store.count_candidates(&compiled.filter).await.unwrap(),
            records.len() as i64
        );
        records.into_iter().map(|r| r.thread.id).collect()
    }

    #[tokio::test]
    async fn test_tag_and_or_logic() {
        let store = seeded().await;
        let both = QueryModel {
            include_tags: vec!["A".into(), "B".into()],
            ..Default::default()
        };
        assert_eq!(candidates(&store, both.clone()).await, vec![1]);

        let either = QueryModel { tag_logic: TagLogic::Or, ..both };
        assert_eq!(candidates(&store, either).await, vec![1, 2]);

        let excluded = QueryModel {
            exclude_tags: vec!["B".into()],
            ..Default::default()
        };
        assert_eq!(candidates(&store, excluded).await, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_exemption_marker_keeps_thread() {
        let store = seeded().await;
        store
            .upsert_thread(&thread(4, "禁止 ads 这里", "rules"), &[])
            .await
            .unwrap();
        store
            .upsert_thread(&thread(5, "buy ads now", "cheap"), &[])
            .await
            .unwrap();
        store
            .upsert_thread(
                &thread(6, "ads", "one two three four five six seven eight nine ten 禁"),
                &[],
            )
            .await
            .unwrap();

        let model = QueryModel {
            exclude_keywords: Some("ads".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, model).await, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_keyword_prefix_and_phrase() {
        let store = seeded().await;
        let prefix = QueryModel {
            keywords: Some("drag".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, prefix).await, vec![1]);

        let phrase = QueryModel {
            query: Some(r#""red dragon""#.into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, phrase).await, vec![1]);

        let miss = QueryModel {
            query: Some(r#""dragon red""#.into()),
            ..Default::default()
        };
        assert!(candidates(&store, miss).await.is_empty());
    }

    #[tokio::test]
    async fn test_unquoted_words_match_anywhere_quoted_words_must_be_adjacent() {
        let store = seeded().await;
        let loose = QueryModel {
            keywords: Some("dragon story".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, loose).await, vec![1]);

        let free_text = QueryModel {
            query: Some("story drag".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, free_text).await, vec![1]);

        let quoted = QueryModel {
            query: Some(r#""dragon story""#.into()),
            ..Default::default()
        };
        assert!(candidates(&store, quoted).await.is_empty());

        let quoted_keyword = QueryModel {
            keywords: Some(r#""dragon story""#.into()),
            ..Default::default()
        };
        assert!(candidates(&store, quoted_keyword).await.is_empty());
    }

    #[tokio::test]
    async fn test_exemption_window_counts_cjk_characters() {
        let store = seeded().await;
        store
            .upsert_thread(&thread(4, "禁止发布广告", "rules"), &[])
            .await
            .unwrap();
        store
            .upsert_thread(&thread(5, "禁止在本帖中发布任何广告", "rules"), &[])
            .await
            .unwrap();

        let model = QueryModel {
            exclude_keywords: Some("广告".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, model).await, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_scalar_filters() {
        let store = seeded().await;
        let mut gone = thread(7, "Deleted", "gone");
        gone.not_found_count = 2;
        store.upsert_thread(&gone, &[]).await.unwrap();

        assert_eq!(candidates(&store, QueryModel::default()).await, vec![1, 2, 3]);

        let reactions = QueryModel {
            reaction_count_range: Some("[20, 30)".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, reactions).await, vec![2]);

        let by_name = QueryModel {
            author_name: Some("liddell".into()),
            exclude_thread_ids: vec![1],
            ..Default::default()
        };
        assert_eq!(candidates(&store, by_name).await, vec![2, 3]);

        let recent = QueryModel {
            created_after: Some("2d".into()),
            ..Default::default()
        };
        assert_eq!(candidates(&store, recent).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_vote_transitions_move_counters() {
        let store = Arc::new(seeded().await);
        let names: HashMap<i64, String> = HashMap::from([(10, "A".into()), (20, "B".into())]);
        let agg = VoteAggregator::new(store.clone());
        let up = Vote { user_id: 7, thread_id: 1, tag_id: 10, value: VoteValue::Up };

        let stats = agg.record_vote(up, &names).await.unwrap();
        assert_eq!((stats["A"].upvotes, stats["A"].downvotes), (1, 0));

        let stats = agg.record_vote(up, &names).await.unwrap();
        assert_eq!((stats["A"].upvotes, stats["A"].downvotes), (0, 0));

        agg.record_vote(up, &names).await.unwrap();
        let down = Vote { value: VoteValue::Down, ..up };
        let stats = agg.record_vote(down, &names).await.unwrap();
        assert_eq!((stats["A"].upvotes, stats["A"].downvotes, stats["A"].score), (0, 1, -1));

        let stray = Vote { thread_id: 3, ..up };
        assert_eq!(store.apply_vote(stray).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rank_rows_sum_only_requested_tags() {
        let store = seeded().await;
        for user_id in 1..=3 {
            let vote = Vote { user_id, thread_id: 1, tag_id: 20, value: VoteValue::Down };
            store.apply_vote(vote).await.unwrap();
        }
        store
            .apply_vote(Vote { user_id: 1, thread_id: 1, tag_id: 10, value: VoteValue::Up })
            .await
            .unwrap();

        let filter = CandidateFilter { predicates: vec![Predicate::ThreadNotIn(vec![2, 3])] };
        let rows = store.rank_candidates(&filter, &[10, 11]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].upvotes, rows[0].downvotes), (1, 0));

        let rows = store.rank_candidates(&filter, &[]).await.unwrap();
        assert_eq!((rows[0].upvotes, rows[0].downvotes), (0, 0));
    }

    #[tokio::test]
    async fn test_collection_search_and_sort() {
        let store = Arc::new(seeded().await);
        store.collect(42, 3, now() - Duration::hours(1)).await.unwrap();
        store.collect(42, 1, now()).await.unwrap();

        let svc = SearchService::new(
            store.clone(),
            store.clone(),
            Arc::new(TagResolver::new()),
            Arc::new(RankingSettings::default()),
        );
        let model = QueryModel {
            viewer_id: Some(42),
            collected_only: true,
            sort_method: "collected_at".into(),
            ..Default::default()
        };
        let page = svc.search_at(&model, now()).await.unwrap();
        let ids: Vec<i64> = page.results.iter().map(|r| r.thread_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(page.results.iter().all(|r| r.collected));
    }

    #[tokio::test]
    async fn test_end_to_end_search() {
        let store = Arc::new(seeded().await);
        let tags = Arc::new(TagResolver::new());
        tags.rebuild(store.as_ref()).await.unwrap();
        let svc = SearchService::new(store.clone(), store.clone(), tags, Arc::new(RankingSettings::default()));

        let page = svc
            .search_at(&QueryModel { include_tags: vec!["A".into()], ..Default::default() }, now())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.results[0].thread_id, 1);
        assert_eq!(page.results[0].tags, vec!["A", "B"]);
        assert_eq!(page.results[0].author_name.as_deref(), Some("Wonder"));
        assert_eq!(page.results[0].thumbnail_urls, vec!["https://cdn.example/1.png"]);

        let beyond = QueryModel { offset: 5, ..Default::default() };
        let page = svc.search_at(&beyond, now()).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.results.is_empty());
    }
}
