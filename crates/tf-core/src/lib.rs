//! thread-finder/crates/tf-core/src/lib.rs
//!
//! Query model, filter compilation, ranking and vote aggregation for
//! thread-finder. Storage lives behind the ports in [`traits`].

pub mod error;
pub mod filter;
pub mod fts;
pub mod keywords;
pub mod models;
pub mod query;
pub mod ranges;
pub mod ranking;
pub mod search;
pub mod tags;
pub mod traits;
pub mod votes;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
pub use query::{QueryModel, SortColumn, SortMethod, SortOrder, TagLogic};
pub use ranking::{RankingConfig, RankingPreset, RankingSettings};
pub use search::SearchService;
pub use tags::TagResolver;
pub use votes::{VoteAggregator, VoteTransition};
