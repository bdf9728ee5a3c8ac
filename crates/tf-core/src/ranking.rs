//! # Ranking Engine
//!
//! Composite relevance score used by the "comprehensive" sort:
//!
//! ```text
//! time     = exp(-decay_rate * age_days)
//! tag      = wilson_lower_bound(up, down, z)   or default_tag_score
//! reaction = min(max_reaction_score, ln(reactions + 1) / ln(log_base + 1))
//! base     = tf * time + gf * tag + rf * reaction      (factors sum to 1)
//! final    = base * penalty(tag, up + down)
//! ```
//!
//! Scoring is pure arithmetic over rows already fetched from the store.
//! A request captures one [`RankingConfig`] up front and scores every row
//! with it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::RankRow;
use crate::query::SortOrder;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Every tunable of the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub time_weight_factor: f64,
    pub tag_weight_factor: f64,
    pub reaction_weight_factor: f64,

    /// 0.1 is roughly a one-week half-life.
    pub time_decay_rate: f64,

    /// z of the Wilson interval; 1.96 is 95% confidence.
    pub wilson_confidence_level: f64,
    /// Tag signal when there are no votes or no requested tags.
    pub default_tag_score: f64,

    pub reaction_log_base: f64,
    pub max_reaction_score: f64,

    pub severe_penalty_threshold: f64,
    pub severe_penalty_min_votes: i64,
    pub severe_penalty_factor: f64,

    pub mild_penalty_threshold: f64,
    pub mild_penalty_min_votes: i64,
    pub mild_penalty_factor: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            time_weight_factor: 0.5,
            tag_weight_factor: 0.3,
            reaction_weight_factor: 0.2,
            time_decay_rate: 0.1,
            wilson_confidence_level: 1.96,
            default_tag_score: 0.5,
            reaction_log_base: 50.0,
            max_reaction_score: 1.0,
            severe_penalty_threshold: 0.2,
            severe_penalty_min_votes: 5,
            severe_penalty_factor: 0.1,
            mild_penalty_threshold: 0.35,
            mild_penalty_min_votes: 10,
            mild_penalty_factor: 0.5,
        }
    }
}

/// Named starting points for admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingPreset {
    Balanced,
    TimeFocused,
    QualityFocused,
    PopularityFocused,
    StrictQuality,
}

impl RankingPreset {
    pub fn config(self) -> RankingConfig {
        let base = RankingConfig::default();
        match self {
            RankingPreset::Balanced => base,
            RankingPreset::TimeFocused => RankingConfig {
                time_weight_factor: 0.6,
                tag_weight_factor: 0.2,
                reaction_weight_factor: 0.2,
                time_decay_rate: 0.05,
                ..base
            },
            RankingPreset::QualityFocused => RankingConfig {
                time_weight_factor: 0.3,
                tag_weight_factor: 0.5,
                reaction_weight_factor: 0.2,
                time_decay_rate: 0.15,
                ..base
            },
            RankingPreset::PopularityFocused => RankingConfig {
                time_weight_factor: 0.3,
                tag_weight_factor: 0.2,
                reaction_weight_factor: 0.5,
                reaction_log_base: 30.0,
                ..base
            },
            RankingPreset::StrictQuality => RankingConfig {
                time_weight_factor: 0.4,
                tag_weight_factor: 0.4,
                reaction_weight_factor: 0.2,
                severe_penalty_threshold: 0.3,
                mild_penalty_threshold: 0.5,
                severe_penalty_factor: 0.05,
                ..base
            },
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AppError::ValidationError(format!("ranking config: {msg}")));
        let factors = [
            self.time_weight_factor,
            self.tag_weight_factor,
            self.reaction_weight_factor,
        ];

        let all = [
            self.time_decay_rate,
            self.wilson_confidence_level,
            self.default_tag_score,
            self.reaction_log_base,
            self.max_reaction_score,
            self.severe_penalty_threshold,
            self.severe_penalty_factor,
            self.mild_penalty_threshold,
            self.mild_penalty_factor,
        ];

        if all.iter().chain(&factors).any(|v| !v.is_finite()) {
            return fail("every value must be a finite number");
        }
        if factors.iter().any(|f| *f < 0.0) {
            return fail("weight factors must be non-negative");
        }
        if factors.iter().sum::<f64>() <= 0.0 {
            return fail("at least one weight factor must be positive");
        }
        if self.time_decay_rate <= 0.0 {
            return fail("time_decay_rate must be positive");
        }
        if self.wilson_confidence_level <= 0.0 {
            return fail("wilson_confidence_level must be positive");
        }
        if self.reaction_log_base <= 0.0 {
            return fail("reaction_log_base must be positive");
        }
        if self.max_reaction_score < 0.0 {
            return fail("max_reaction_score must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.default_tag_score) {
            return fail("default_tag_score must be within [0, 1]");
        }
        for threshold in [self.severe_penalty_threshold, self.mild_penalty_threshold] {
            if !(0.0..=1.0).contains(&threshold) {
                return fail("penalty thresholds must be within [0, 1]");
            }
        }
        if self.severe_penalty_threshold >= self.mild_penalty_threshold {
            return fail("severe_penalty_threshold must be below mild_penalty_threshold");
        }
        for factor in [self.severe_penalty_factor, self.mild_penalty_factor] {
            if !(0.0..=1.0).contains(&factor) {
                return fail("penalty factors must be within [0, 1]");
            }
        }
        if self.severe_penalty_min_votes < 0 || self.mild_penalty_min_votes < 0 {
            return fail("penalty vote minimums must be non-negative");
        }
        Ok(())
    }

    /// `(time, tag, reaction)` factors scaled to sum to 1. An all-zero
    /// triple falls back to equal thirds.
    pub fn effective_factors(&self) -> (f64, f64, f64) {
        let (t, g, r) = (
            self.time_weight_factor.max(0.0),
            self.tag_weight_factor.max(0.0),
            self.reaction_weight_factor.max(0.0),
        );
        let sum = t + g + r;
        if !(sum > 0.0) || !sum.is_finite() {
            return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        (t / sum, g / sum, r / sum)
    }
}

/// Lower bound of the Wilson score interval for `up` successes out of
/// `up + down` trials. Zero trials yield 0.
pub fn wilson_lower_bound(up: i64, down: i64, z: f64) -> f64 {
    let n = (up + down) as f64;
    if n <= 0.0 {
        return 0.0;
    }
    let p_hat = up as f64 / n;
    let z2 = z * z;
    let centre = p_hat + z2 / (2.0 * n);
    let margin = z * ((p_hat * (1.0 - p_hat) + z2 / (4.0 * n)) / n).sqrt();
    (centre - margin) / (1.0 + z2 / n)
}

/// The breakdown of one thread's score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub time_weight: f64,
    pub tag_weight: f64,
    pub reaction_weight: f64,
    pub base: f64,
    pub penalty: f64,
    pub value: f64,
}

/// Hook for a future exposure-fairness term that would lift threads shown
/// rarely in results. No formula is defined for it yet, so the default
/// implementation returns the score unchanged.
pub trait ExposureBoost: Send + Sync {
    fn adjust(&self, row: &RankRow, score: f64) -> f64;
}

pub struct NoExposureBoost;

impl ExposureBoost for NoExposureBoost {
    fn adjust(&self, _row: &RankRow, score: f64) -> f64 {
        score
    }
}

/// Scores rows with one immutable configuration.
pub struct Ranker<'a> {
    config: &'a RankingConfig,
    factors: (f64, f64, f64),
    has_include_tags: bool,
    now: DateTime<Utc>,
}

impl<'a> Ranker<'a> {
    pub fn new(config: &'a RankingConfig, has_include_tags: bool, now: DateTime<Utc>) -> Self {
        Self {
            config,
            factors: config.effective_factors(),
            has_include_tags,
            now,
        }
    }

    pub fn score(&self, row: &RankRow) -> Score {
        let c = self.config;

        let age_days = ((self.now - row.last_active_at).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
        let time_weight = (-c.time_decay_rate * age_days).exp();

        let total_votes = if self.has_include_tags {
            row.upvotes + row.downvotes
        } else {
            0
        };
        let tag_weight = if total_votes > 0 {
            wilson_lower_bound(row.upvotes, row.downvotes, c.wilson_confidence_level)
        } else {
            c.default_tag_score
        };

        let reactions = row.reaction_count.max(0) as f64;
        let reaction_weight =
            ((reactions + 1.0).ln() / (c.reaction_log_base + 1.0).ln()).min(c.max_reaction_score);

        let (tf, gf, rf) = self.factors;
        let base = tf * time_weight + gf * tag_weight + rf * reaction_weight;

        let penalty = if tag_weight < c.severe_penalty_threshold
            && total_votes >= c.severe_penalty_min_votes
        {
            c.severe_penalty_factor
        } else if tag_weight < c.mild_penalty_threshold && total_votes >= c.mild_penalty_min_votes {
            c.mild_penalty_factor
        } else {
            1.0
        };

        Score {
            time_weight,
            tag_weight,
            reaction_weight,
            base,
            penalty,
            value: base * penalty,
        }
    }

    /// Scores and orders `rows`. Equal scores fall back to thread id
    /// ascending in both directions. A NaN score counts as the lowest
    /// possible score.
    pub fn rank(&self, rows: Vec<RankRow>, order: SortOrder, boost: &dyn ExposureBoost) -> Vec<(RankRow, f64)> {
        let mut scored: Vec<(RankRow, f64)> = rows
            .into_iter()
            .map(|row| {
                let value = boost.adjust(&row, self.score(&row).value);
                if value.is_nan() {
                    log::warn!("NaN score for thread {}, ranking it lowest", row.thread_id);
                    return (row, f64::NEG_INFINITY);
                }
                (row, value)
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            let by_score = match order {
                SortOrder::Desc => sb.total_cmp(sa),
                SortOrder::Asc => sa.total_cmp(sb),
            };
            by_score.then(a.thread_id.cmp(&b.thread_id))
        });
        scored
    }
}

/// Admin-adjustable ranking configuration. Requests call
/// [`RankingSettings::current`] once and keep that snapshot, so a concurrent
/// [`RankingSettings::update`] never mixes two configurations in one ranking.
pub struct RankingSettings {
    current: ArcSwap<RankingConfig>,
}

impl RankingSettings {
    /// Rejects a configuration that [`RankingConfig::validate`] refuses.
    pub fn new(config: RankingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
        })
    }

    pub fn current(&self) -> Arc<RankingConfig> {
        self.current.load_full()
    }

    /// Validates and publishes a new configuration.
    pub fn update(&self, config: RankingConfig) -> Result<()> {
        config.validate()?;
        self.current.store(Arc::new(config));
        Ok(())
    }
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(RankingConfig::default()),
        }
    }
}
