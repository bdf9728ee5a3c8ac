//! # thread-finder Binary
//!
//! Assembles the search service over the storage plugin chosen at compile
//! time and exposes it as a small CLI.

mod settings;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tf_core::{
    Author, QueryModel, RankingSettings, SearchService, Tag, TagResolver, Thread, Vote, VoteAggregator,
    VoteValue,
};

#[cfg(feature = "db-sqlite")]
use tf_db_sqlite::SqliteThreadStore;

#[cfg(not(feature = "db-sqlite"))]
compile_error!("thread-finder needs a storage plugin; enable the `db-sqlite` feature");

use settings::Settings;

#[derive(Parser)]
#[command(name = "thread-finder", version, about = "Tag- and keyword-driven search over forum threads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a search described by a JSON query model (`-` reads stdin)
    Search { query: PathBuf },
    /// Cast, switch or retract a tag vote and print the thread's tag stats
    Vote {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        thread: i64,
        #[arg(long)]
        tag: i64,
        #[arg(long, value_enum)]
        value: VoteArg,
    },
    /// List the unique tag names
    Tags,
    /// Load authors, tags, threads and collections from a JSON dump
    Import { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum VoteArg {
    Up,
    Down,
}

impl From<VoteArg> for VoteValue {
    fn from(arg: VoteArg) -> Self {
        match arg {
            VoteArg::Up => VoteValue::Up,
            VoteArg::Down => VoteValue::Down,
        }
    }
}

#[derive(Deserialize)]
struct ImportFile {
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    threads: Vec<ImportedThread>,
    #[serde(default)]
    collections: Vec<ImportedCollection>,
}

#[derive(Deserialize)]
struct ImportedThread {
    #[serde(flatten)]
    thread: Thread,
    #[serde(default)]
    tag_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct ImportedCollection {
    user_id: i64,
    thread_id: i64,
    collected_at: chrono::DateTime<chrono::Utc>,
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let settings = Settings::load()?;

    // 1. Initialize Database Implementation
    #[cfg(feature = "db-sqlite")]
    let store = Arc::new(SqliteThreadStore::new(&settings.database_url).await?);

    // 2. Warm the tag cache
    let tags = Arc::new(TagResolver::new());
    tags.rebuild(store.as_ref()).await?;

    match cli.command {
        Command::Search { query } => {
            let model: QueryModel = serde_json::from_str(&read_input(&query)?)?;
            let service = SearchService::new(
                store.clone(),
                store.clone(),
                tags,
                Arc::new(RankingSettings::new(settings.ranking)?),
            );
            let page = service.search(&model).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Vote { user, thread, tag, value } => {
            let aggregator = VoteAggregator::new(store.clone());
            let vote = Vote {
                user_id: user,
                thread_id: thread,
                tag_id: tag,
                value: value.into(),
            };
            let stats = aggregator.record_vote(vote, tags.snapshot().name_map()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Tags => {
            for name in tags.snapshot().unique_names() {
                println!("{name}");
            }
        }
        Command::Import { file } => {
            let dump: ImportFile = serde_json::from_str(&read_input(&file)?)?;
            for author in &dump.authors {
                store.upsert_author(author).await?;
            }
            for tag in &dump.tags {
                store.upsert_tag(tag).await?;
            }
            for entry in &dump.threads {
                store.upsert_thread(&entry.thread, &entry.tag_ids).await?;
            }
            for c in &dump.collections {
                store.collect(c.user_id, c.thread_id, c.collected_at).await?;
            }
            log::info!(
                "Imported {} authors, {} tags, {} threads, {} collection entries",
                dump.authors.len(),
                dump.tags.len(),
                dump.threads.len(),
                dump.collections.len()
            );
        }
    }

    Ok(())
}
