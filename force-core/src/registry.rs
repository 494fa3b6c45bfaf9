//! Registry (spec.md §4.5): the in-memory authoritative `kind -> id ->
//! component` map. Readers observe an immutable snapshot; a `reload`
//! builds a new snapshot off to the side and swaps it in atomically via
//! `arc_swap`, so no caller ever sees a half-swapped registry (spec.md §5).

use crate::model::{Component, Kind};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Why a component was quarantined, and where it came from on disk.
#[derive(Debug, Clone)]
pub struct QuarantineRecord {
    pub path: Option<PathBuf>,
    pub errors: Vec<String>,
}

type KindMap<V> = HashMap<String, V>;

#[derive(Debug, Default)]
struct Snapshot {
    admitted: HashMap<Kind, KindMap<Component>>,
    quarantined: HashMap<Kind, KindMap<QuarantineRecord>>,
}

/// Optional filters for `list` (spec.md §4.5): category, tags, complexity,
/// and a case-insensitive substring match against name/description.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub complexity: Option<String>,
    pub name_contains: Option<String>,
}

impl ListFilter {
    fn matches(&self, component: &Component) -> bool {
        if let Some(category) = &self.category
            && component.category() != Some(category.as_str())
        {
            return false;
        }
        if let Some(complexity) = &self.complexity
            && component.complexity() != Some(complexity.as_str())
        {
            return false;
        }
        if !self.tags.is_empty() {
            let component_tags = component.tags();
            if !self.tags.iter().all(|tag| component_tags.iter().any(|t| t == tag)) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            let needle = needle.to_lowercase();
            let haystack = format!(
                "{} {}",
                component.name(),
                component.description().unwrap_or_default()
            )
            .to_lowercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub admitted: usize,
    pub quarantined: usize,
}

/// The authoritative component store.
pub struct Registry {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(Snapshot::default())),
        }
    }

    /// `get(kind, id)` (spec.md §4.5). Only admitted, schema-valid
    /// components are ever returned (Testable Property 3).
    pub fn get(&self, kind: Kind, id: &str) -> Option<Component> {
        self.snapshot.load().admitted.get(&kind)?.get(id).cloned()
    }

    /// `list(kind, filter?)` (spec.md §4.5).
    pub fn list(&self, kind: Kind, filter: &ListFilter) -> Vec<Component> {
        let snapshot = self.snapshot.load();
        snapshot
            .admitted
            .get(&kind)
            .into_iter()
            .flat_map(|map| map.values())
            .filter(|component| filter.matches(component))
            .cloned()
            .collect()
    }

    /// All admitted ids for a kind, used for post-load reference checks.
    pub fn known_ids(&self) -> HashMap<Kind, HashSet<String>> {
        let snapshot = self.snapshot.load();
        snapshot
            .admitted
            .iter()
            .map(|(kind, map)| (*kind, map.keys().cloned().collect()))
            .collect()
    }

    pub fn quarantine_record(&self, kind: Kind, id: &str) -> Option<QuarantineRecord> {
        self.snapshot.load().quarantined.get(&kind)?.get(id).cloned()
    }

    pub fn stats(&self, kind: Kind) -> RegistryStats {
        let snapshot = self.snapshot.load();
        RegistryStats {
            admitted: snapshot.admitted.get(&kind).map_or(0, HashMap::len),
            quarantined: snapshot.quarantined.get(&kind).map_or(0, HashMap::len),
        }
    }

    /// Atomically replace the entire registry contents. Readers mid-flight
    /// against the prior snapshot are unaffected (spec.md §5 reload
    /// atomicity, Testable Property 4).
    pub fn swap(
        &self,
        admitted: HashMap<Kind, KindMap<Component>>,
        quarantined: HashMap<Kind, KindMap<QuarantineRecord>>,
    ) {
        self.snapshot.store(Arc::new(Snapshot {
            admitted,
            quarantined,
        }));
    }
}

impl QuarantineRecord {
    pub fn new(path: Option<PathBuf>, errors: Vec<String>) -> Self {
        Self { path, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Execution, Metadata, Parameters, Tool};

    fn tool(id: &str, category: &str) -> Component {
        Component::Tool(Tool {
            id: id.to_string(),
            name: format!("Tool {id}"),
            description: Some("does things".to_string()),
            category: Some(category.to_string()),
            parameters: Parameters::default(),
            execution: Execution {
                strategy: Some("sequential".to_string()),
                commands: vec![],
                validation: Default::default(),
            },
            metadata: Metadata::default(),
        })
    }

    #[test]
    fn get_returns_none_for_quarantined_or_missing() {
        let registry = Registry::new();
        assert!(registry.get(Kind::Tool, "missing").is_none());

        let mut admitted = HashMap::new();
        admitted.insert(Kind::Tool, HashMap::from([("t1".to_string(), tool("t1", "git"))]));
        let mut quarantined = HashMap::new();
        quarantined.insert(
            Kind::Tool,
            HashMap::from([("bad".to_string(), QuarantineRecord::new(None, vec!["err".into()]))]),
        );
        registry.swap(admitted, quarantined);

        assert!(registry.get(Kind::Tool, "t1").is_some());
        assert!(registry.get(Kind::Tool, "bad").is_none());
    }

    #[test]
    fn list_filters_by_category() {
        let registry = Registry::new();
        let mut admitted = HashMap::new();
        admitted.insert(
            Kind::Tool,
            HashMap::from([
                ("t1".to_string(), tool("t1", "git")),
                ("t2".to_string(), tool("t2", "docs")),
            ]),
        );
        registry.swap(admitted, HashMap::new());

        let filter = ListFilter {
            category: Some("git".to_string()),
            ..Default::default()
        };
        let results = registry.list(Kind::Tool, &filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "t1");
    }

    #[test]
    fn stats_reports_admitted_and_quarantined_counts() {
        let registry = Registry::new();
        let mut admitted = HashMap::new();
        admitted.insert(Kind::Tool, HashMap::from([("t1".to_string(), tool("t1", "git"))]));
        let mut quarantined = HashMap::new();
        quarantined.insert(
            Kind::Tool,
            HashMap::from([("bad".to_string(), QuarantineRecord::new(None, vec![]))]),
        );
        registry.swap(admitted, quarantined);

        let stats = registry.stats(Kind::Tool);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.quarantined, 1);
    }
}
