//! # Query Model
//!
//! [`QueryModel`] is the inbound, loosely-typed request (everything a caller
//! can send). [`QueryModel::validate`] turns it into a [`SearchQuery`] with
//! every time string, range expression, enum and pagination bound checked,
//! and the advanced syntax of the free-form `query` merged into the
//! structured fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::keywords::{self, KeywordGroup, KeywordParser, KeywordTerm};
use crate::ranges::{self, NumericRange};

pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_LIMIT: i64 = 10;

pub fn default_exemption_markers() -> Vec<String> {
    vec!["禁".to_string(), "🈲".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagLogic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Columns a non-comprehensive sort can order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    CreatedAt,
    LastActiveAt,
    ReactionCount,
    ReplyCount,
    /// When the viewer collected the thread; needs a viewer.
    CollectedAt,
}

/// The closed set of orderings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortMethod {
    /// Composite relevance score, see [`crate::ranking`].
    #[default]
    Comprehensive,
    Column(SortColumn),
    /// User-tuned search ordered by its base strategy.
    Custom { base: Box<SortMethod> },
}

impl SortMethod {
    /// Maps a request name to a strategy. Unknown names fall back to
    /// `last_active_at`; `custom` wraps `custom_base` (itself defaulting to
    /// comprehensive, and never nesting another `custom`).
    pub fn from_names(name: &str, custom_base: Option<&str>) -> Self {
        match name.trim() {
            "custom" => {
                let base = match custom_base.map(str::trim) {
                    None | Some("") | Some("custom") => SortMethod::Comprehensive,
                    Some(other) => SortMethod::from_names(other, None),
                };
                SortMethod::Custom { base: Box::new(base) }
            }
            other => Self::base_from_name(other),
        }
    }

    fn base_from_name(name: &str) -> Self {
        match name {
            "comprehensive" => SortMethod::Comprehensive,
            "created_at" => SortMethod::Column(SortColumn::CreatedAt),
            "reaction_count" => SortMethod::Column(SortColumn::ReactionCount),
            "reply_count" => SortMethod::Column(SortColumn::ReplyCount),
            "collected_at" => SortMethod::Column(SortColumn::CollectedAt),
            _ => SortMethod::Column(SortColumn::LastActiveAt),
        }
    }

    /// The strategy that actually orders results.
    pub fn effective(&self) -> &SortMethod {
        match self {
            SortMethod::Custom { base } => base.effective(),
            other => other,
        }
    }
}

fn default_sort_method() -> String {
    "comprehensive".to_string()
}

/// Everything a search request may carry. Tags are names, not ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryModel {
    /// Free-form text using the `author:`, `"phrase"` and `-term` syntax.
    pub query: Option<String>,
    pub channel_ids: Vec<i64>,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub tag_logic: TagLogic,
    pub keywords: Option<String>,
    pub exclude_keywords: Option<String>,
    /// `None` means the default markers; an empty list disables exemption.
    pub exclude_keyword_exemption_markers: Option<Vec<String>>,
    pub include_authors: Vec<i64>,
    pub exclude_authors: Vec<i64>,
    pub author_name: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub active_after: Option<String>,
    pub active_before: Option<String>,
    pub reaction_count_range: Option<String>,
    pub reply_count_range: Option<String>,
    pub sort_method: String,
    pub custom_base_sort: Option<String>,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
    pub exclude_thread_ids: Vec<i64>,
    /// The requesting user, for the `collected` flag and collection search.
    pub viewer_id: Option<i64>,
    /// Restrict results to threads the viewer has collected.
    pub collected_only: bool,
}

impl Default for QueryModel {
    fn default() -> Self {
        Self {
            query: None,
            channel_ids: Vec::new(),
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            tag_logic: TagLogic::default(),
            keywords: None,
            exclude_keywords: None,
            exclude_keyword_exemption_markers: None,
            include_authors: Vec::new(),
            exclude_authors: Vec::new(),
            author_name: None,
            created_after: None,
            created_before: None,
            active_after: None,
            active_before: None,
            reaction_count_range: None,
            reply_count_range: None,
            sort_method: default_sort_method(),
            custom_base_sort: None,
            sort_order: SortOrder::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            exclude_thread_ids: Vec::new(),
            viewer_id: None,
            collected_only: false,
        }
    }
}

/// A validated request. Built only through [`QueryModel::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub channel_ids: Vec<i64>,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub tag_logic: TagLogic,
    pub keyword_groups: Vec<KeywordGroup>,
    pub exclude_keywords: Vec<String>,
    pub exemption_markers: Vec<String>,
    pub include_authors: Vec<i64>,
    pub exclude_authors: Vec<i64>,
    pub author_name: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub active_after: Option<DateTime<Utc>>,
    pub active_before: Option<DateTime<Utc>>,
    pub reaction_count: Option<NumericRange>,
    pub reply_count: Option<NumericRange>,
    pub sort_method: SortMethod,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
    pub exclude_thread_ids: Vec<i64>,
    pub viewer_id: Option<i64>,
    pub collected_only: bool,
}

impl QueryModel {
    /// Checks and normalizes every field. Fails on the first malformed
    /// filter so no partially-applied query can run.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<SearchQuery> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(AppError::ValidationError(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.offset < 0 {
            return Err(AppError::ValidationError(format!(
                "offset must not be negative, got {}",
                self.offset
            )));
        }
        if self.collected_only && self.viewer_id.is_none() {
            return Err(AppError::ValidationError(
                "collection search requires a viewer".to_string(),
            ));
        }

        let created_after = ranges::parse_time(self.created_after.as_deref(), now)?;
        let created_before = ranges::parse_time(self.created_before.as_deref(), now)?;
        let active_after = ranges::parse_time(self.active_after.as_deref(), now)?;
        let active_before = ranges::parse_time(self.active_before.as_deref(), now)?;
        let reaction_count = NumericRange::parse_filter(self.reaction_count_range.as_deref())?;
        let reply_count = NumericRange::parse_filter(self.reply_count_range.as_deref())?;

        let mut keyword_groups = self
            .keywords
            .as_deref()
            .map(keywords::parse_keyword_groups)
            .unwrap_or_default();
        let mut exclude_keywords = self
            .exclude_keywords
            .as_deref()
            .map(keywords::split_exclude_keywords)
            .unwrap_or_default();
        let mut author_name = self
            .author_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if let Some(raw) = self.query.as_deref() {
            let parsed = KeywordParser::parse(&KeywordParser::sanitize(raw));
            if author_name.is_none() {
                author_name = parsed.author_name;
            }
            keyword_groups.extend(
                parsed
                    .include_phrases
                    .into_iter()
                    .map(|p| KeywordGroup(vec![KeywordTerm::Exact(p)])),
            );
            keyword_groups.extend(keywords::parse_keyword_groups(&parsed.remaining_text));
            exclude_keywords.extend(parsed.exclude_terms);
        }

        Ok(SearchQuery {
            channel_ids: self.channel_ids.clone(),
            include_tags: dedup(&self.include_tags),
            exclude_tags: dedup(&self.exclude_tags),
            tag_logic: self.tag_logic,
            keyword_groups,
            exclude_keywords,
            exemption_markers: self
                .exclude_keyword_exemption_markers
                .clone()
                .unwrap_or_else(default_exemption_markers),
            include_authors: self.include_authors.clone(),
            exclude_authors: self.exclude_authors.clone(),
            author_name,
            created_after,
            created_before,
            active_after,
            active_before,
            reaction_count,
            reply_count,
            sort_method: SortMethod::from_names(&self.sort_method, self.custom_base_sort.as_deref()),
            sort_order: self.sort_order,
            limit: self.limit,
            offset: self.offset,
            exclude_thread_ids: self.exclude_thread_ids.clone(),
            viewer_id: self.viewer_id,
            collected_only: self.collected_only,
        })
    }
}

/// Trims, drops blanks and repeats, keeps first-seen order.
fn dedup(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.iter().any(|seen| seen == name) {
            out.push(name.to_string());
        }
    }
    out
}
