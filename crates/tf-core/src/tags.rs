//! # Tag Resolver
//!
//! Read-mostly cache of the tag table. Tag ids are scoped to a channel, so
//! one display name can map to several ids; lookups by name always return
//! the full id set.
//!
//! Rebuilds load everything into a fresh [`TagSnapshot`] and publish it with
//! a single atomic pointer swap. Readers hold an `Arc` to whichever snapshot
//! was current when they asked and never see a half-built one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::models::Tag;
use crate::traits::TagSource;

/// One immutable generation of the tag cache.
#[derive(Debug, Default)]
pub struct TagSnapshot {
    id_to_name: HashMap<i64, String>,
    name_to_ids: HashMap<String, Vec<i64>>,
    unique_names: Vec<String>,
}

impl TagSnapshot {
    pub fn from_tags<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        let mut id_to_name = HashMap::new();
        let mut name_to_ids: HashMap<String, Vec<i64>> = HashMap::new();

        for tag in tags {
            let ids = name_to_ids.entry(tag.name.clone()).or_default();
            if !ids.contains(&tag.id) {
                ids.push(tag.id);
            }
            id_to_name.insert(tag.id, tag.name);
        }

        let mut unique_names: Vec<String> = name_to_ids.keys().cloned().collect();
        unique_names.sort();

        Self {
            id_to_name,
            name_to_ids,
            unique_names,
        }
    }

    /// Every id carrying `name`; empty when the name is unknown.
    pub fn resolve_ids(&self, name: &str) -> &[i64] {
        self.name_to_ids.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Union of the ids of all `names`, without duplicates.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Vec<i64> {
        let mut ids: Vec<i64> = names
            .iter()
            .flat_map(|n| self.resolve_ids(n.as_ref()).iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn resolve_name(&self, id: i64) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    /// Sorted, de-duplicated display names.
    pub fn unique_names(&self) -> &[String] {
        &self.unique_names
    }

    /// The id → name map handed to the vote aggregator.
    pub fn name_map(&self) -> &HashMap<i64, String> {
        &self.id_to_name
    }

    pub fn len(&self) -> usize {
        self.id_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_name.is_empty()
    }
}

/// Shared handle to the current [`TagSnapshot`].
pub struct TagResolver {
    current: ArcSwap<TagSnapshot>,
}

impl Default for TagResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TagResolver {
    /// An empty cache; every name resolves to nothing until the first rebuild.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TagSnapshot::default()),
        }
    }

    /// The snapshot to use for the rest of a request.
    pub fn snapshot(&self) -> Arc<TagSnapshot> {
        self.current.load_full()
    }

    pub fn resolve_ids(&self, name: &str) -> Vec<i64> {
        self.current.load().resolve_ids(name).to_vec()
    }

    pub fn resolve_name(&self, id: i64) -> Option<String> {
        self.current.load().resolve_name(id).map(str::to_string)
    }

    /// Publishes a prepared snapshot.
    pub fn replace(&self, snapshot: TagSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Reloads every tag from `source` and swaps the result in. On error the
    /// previous snapshot stays current. Returns the number of tags loaded.
    pub async fn rebuild(&self, source: &dyn TagSource) -> anyhow::Result<usize> {
        log::debug!("Building tag cache...");
        let tags = source.load_tags().await?;
        let snapshot = TagSnapshot::from_tags(tags);
        let (count, names) = (snapshot.len(), snapshot.unique_names().len());
        self.replace(snapshot);
        log::info!("Tag cache built. Found {count} tags, {names} unique names.");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockTagSource;

    fn tag(id: i64, name: &str) -> Tag {
        Tag { id, name: name.to_string() }
    }

    #[test]
    fn test_same_name_maps_to_many_ids() {
        let snapshot = TagSnapshot::from_tags([tag(1, "Fantasy"), tag(2, "Fantasy"), tag(3, "Sci-Fi")]);
        assert_eq!(snapshot.resolve_ids("Fantasy"), &[1, 2]);
        assert_eq!(snapshot.resolve_name(2), Some("Fantasy"));
        assert_eq!(snapshot.unique_names(), &["Fantasy".to_string(), "Sci-Fi".to_string()]);
        assert_eq!(snapshot.resolve_all(&["Sci-Fi", "Fantasy", "Fantasy"]), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_name_resolves_to_nothing() {
        let resolver = TagResolver::new();
        assert!(resolver.resolve_ids("missing").is_empty());
        assert_eq!(resolver.resolve_name(42), None);
    }

    #[tokio::test]
    async fn test_rebuild_swaps_snapshot() {
        let resolver = TagResolver::new();
        let before = resolver.snapshot();

        let mut source = MockTagSource::new();
        source
            .expect_load_tags()
            .returning(|| Ok(vec![tag(7, "Horror"), tag(8, "Horror")]));

        assert_eq!(resolver.rebuild(&source).await.unwrap(), 2);
        assert_eq!(resolver.resolve_ids("Horror"), vec![7, 8]);
        // A reader holding the old generation keeps a consistent view.
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let resolver = TagResolver::new();
        resolver.replace(TagSnapshot::from_tags([tag(1, "Drama")]));

        let mut source = MockTagSource::new();
        source
            .expect_load_tags()
            .returning(|| Err(anyhow::anyhow!("database is locked")));

        assert!(resolver.rebuild(&source).await.is_err());
        assert_eq!(resolver.resolve_ids("Drama"), vec![1]);
    }
}
