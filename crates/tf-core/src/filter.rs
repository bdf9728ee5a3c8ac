//! # Filter Compiler
//!
//! Turns a validated [`SearchQuery`] into a storage-agnostic conjunction of
//! [`Predicate`]s. Storage plugins translate each predicate into their own
//! query language; every predicate must hold for a thread to be a candidate.
//!
//! Tag names are resolved against one [`TagSnapshot`]. Names with no ids are
//! dropped: an unknown tag never fails the query.

use chrono::{DateTime, Utc};

use crate::fts::{self, EXEMPTION_WINDOW};
use crate::query::{SearchQuery, SortColumn, SortOrder, TagLogic};
use crate::ranges::NumericRange;
use crate::tags::TagSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeColumn {
    CreatedAt,
    LastActiveAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountColumn {
    ReactionCount,
    ReplyCount,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// The auditor has not flagged the thread as gone.
    NotSoftDeleted,
    ChannelIn(Vec<i64>),
    ThreadNotIn(Vec<i64>),
    AuthorIn(Vec<i64>),
    AuthorNotIn(Vec<i64>),
    /// Exact (case-insensitive) user name, or substring of global/display name.
    AuthorNameMatches(String),
    TimeRange {
        column: TimeColumn,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
    CountRange {
        column: CountColumn,
        range: NumericRange,
    },
    /// The thread carries at least one of these tag ids.
    HasAnyTag(Vec<i64>),
    /// The thread carries none of these tag ids.
    HasNoTag(Vec<i64>),
    /// Full-text MATCH expression the thread must satisfy.
    TextMatches(String),
    /// Full-text MATCH expression the thread must not satisfy.
    TextExcludes(String),
    CollectedBy(i64),
}

/// ANDed predicates describing the candidate projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFilter {
    pub predicates: Vec<Predicate>,
}

/// Plain-column ordering for non-comprehensive sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOrder {
    pub column: SortColumn,
    pub order: SortOrder,
    /// Needed by [`SortColumn::CollectedAt`].
    pub viewer_id: Option<i64>,
}

/// Output of [`FilterCompiler::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub filter: CandidateFilter,
    /// Union of the ids of every included tag name; drives the tag signal of
    /// the ranking engine.
    pub include_tag_ids: Vec<i64>,
}

pub struct FilterCompiler;

impl FilterCompiler {
    pub fn compile(query: &SearchQuery, tags: &TagSnapshot) -> CompiledQuery {
        let mut predicates = vec![Predicate::NotSoftDeleted];

        if let Some(user_id) = query.viewer_id.filter(|_| query.collected_only) {
            predicates.push(Predicate::CollectedBy(user_id));
        }
        if !query.channel_ids.is_empty() {
            predicates.push(Predicate::ChannelIn(query.channel_ids.clone()));
        }
        if !query.exclude_thread_ids.is_empty() {
            predicates.push(Predicate::ThreadNotIn(query.exclude_thread_ids.clone()));
        }
        if !query.include_authors.is_empty() {
            predicates.push(Predicate::AuthorIn(query.include_authors.clone()));
        }
        if let Some(name) = &query.author_name {
            predicates.push(Predicate::AuthorNameMatches(name.clone()));
        }
        if !query.exclude_authors.is_empty() {
            predicates.push(Predicate::AuthorNotIn(query.exclude_authors.clone()));
        }

        if let Some(range) = query.reaction_count {
            predicates.push(Predicate::CountRange {
                column: CountColumn::ReactionCount,
                range,
            });
        }
        if let Some(range) = query.reply_count {
            predicates.push(Predicate::CountRange {
                column: CountColumn::ReplyCount,
                range,
            });
        }
        if query.created_after.is_some() || query.created_before.is_some() {
            predicates.push(Predicate::TimeRange {
                column: TimeColumn::CreatedAt,
                after: query.created_after,
                before: query.created_before,
            });
        }
        if query.active_after.is_some() || query.active_before.is_some() {
            predicates.push(Predicate::TimeRange {
                column: TimeColumn::LastActiveAt,
                after: query.active_after,
                before: query.active_before,
            });
        }

        let include_tag_ids = tags.resolve_all(&query.include_tags);
        if !include_tag_ids.is_empty() {
            match query.tag_logic {
                // AND across names, OR across the ids sharing one name.
                TagLogic::And => predicates.extend(
                    query
                        .include_tags
                        .iter()
                        .map(|name| tags.resolve_ids(name))
                        .filter(|ids| !ids.is_empty())
                        .map(|ids| Predicate::HasAnyTag(ids.to_vec())),
                ),
                TagLogic::Or => predicates.push(Predicate::HasAnyTag(include_tag_ids.clone())),
            }
        }
        let exclude_tag_ids = tags.resolve_all(&query.exclude_tags);
        if !exclude_tag_ids.is_empty() {
            predicates.push(Predicate::HasNoTag(exclude_tag_ids));
        }

        predicates.extend(
            query
                .keyword_groups
                .iter()
                .filter_map(fts::group_expression)
                .map(Predicate::TextMatches),
        );

        let exclusions: Vec<String> = query
            .exclude_keywords
            .iter()
            .filter_map(|kw| fts::exclusion_expression(kw, &query.exemption_markers, EXEMPTION_WINDOW))
            .collect();
        if !exclusions.is_empty() {
            predicates.push(Predicate::TextExcludes(exclusions.join(" OR ")));
        }

        CompiledQuery {
            filter: CandidateFilter { predicates },
            include_tag_ids,
        }
    }
}
