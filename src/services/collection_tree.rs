//! Collection tree builder.
//!
//! Turns the flat root/child collection listings and the user's groups into
//! the ordered tree that gets materialized as local folders. Collections are
//! indexed once by id and the recursion only walks that index, with a global
//! emitted set, so every collection lands in exactly one place even when the
//! remote data contains duplicates or parent cycles.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::types::collection::{
    Collection, CollectionNode, Group, NodeKey, OTHER_GROUP_TITLE, TRASH_COLLECTION_ID,
    UNSORTED_COLLECTION_ID,
};
use crate::types::settings::EngineSettings;

/// Group handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Emit groups whose collection list resolves to nothing.
    pub include_empty_groups: bool,
    /// Emit hidden groups. When off, their collections fall into "Other".
    pub include_hidden_groups: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            include_empty_groups: true,
            include_hidden_groups: true,
        }
    }
}

impl From<&EngineSettings> for TreeOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            include_empty_groups: settings.include_empty_groups,
            include_hidden_groups: settings.include_hidden_groups,
        }
    }
}

struct Index<'a> {
    by_id: HashMap<i64, &'a Collection>,
    children: HashMap<i64, Vec<&'a Collection>>,
    emitted: HashSet<i64>,
    path: Vec<i64>,
}

impl<'a> Index<'a> {
    fn attach(&mut self, id: i64) -> Option<CollectionNode> {
        if !self.emitted.insert(id) {
            return None;
        }
        let collection = *self.by_id.get(&id)?;
        self.path.push(id);

        let child_ids: Vec<i64> = self
            .children
            .get(&id)
            .map(|list| list.iter().map(|c| c.id).collect())
            .unwrap_or_default();
        let mut children = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            if self.path.contains(&child_id) {
                warn!(collection = id, child = child_id, "collection cycle detected, not descending");
                continue;
            }
            if let Some(node) = self.attach(child_id) {
                children.push(node);
            }
        }

        self.path.pop();
        Some(CollectionNode {
            key: NodeKey::Collection(id),
            title: collection.title.clone(),
            sort_key: collection.sort_key,
            is_group: false,
            children,
        })
    }

    /// Collections never reached from a top-level entry (parent cycles without a root).
    fn leftovers(&self) -> Vec<&'a Collection> {
        let mut rest: Vec<&Collection> = self
            .by_id
            .values()
            .filter(|c| !self.emitted.contains(&c.id))
            .copied()
            .collect();
        rest.sort_by_key(|c| (c.sort_key, c.id));
        rest
    }
}

fn group_node(key: NodeKey, title: &str, sort_key: i64, children: Vec<CollectionNode>) -> CollectionNode {
    CollectionNode {
        key,
        title: title.to_string(),
        sort_key,
        is_group: true,
        children,
    }
}

/// Builds the collection tree. The first node is always the unsorted node.
pub fn build_tree(
    roots: &[Collection],
    children: &[Collection],
    groups: &[Group],
    options: &TreeOptions,
) -> Vec<CollectionNode> {
    let root_ids: HashSet<i64> = roots.iter().map(|c| c.id).collect();

    let mut by_id: HashMap<i64, &Collection> = HashMap::new();
    for collection in roots.iter().chain(children) {
        if collection.id == UNSORTED_COLLECTION_ID || collection.id == TRASH_COLLECTION_ID {
            continue;
        }
        match by_id.entry(collection.id) {
            Entry::Occupied(_) => {
                debug!(collection = collection.id, "duplicate collection in listing, keeping first")
            }
            Entry::Vacant(slot) => {
                slot.insert(collection);
            }
        }
    }

    // Roots first in sort order, then children whose parent is unknown.
    let mut tops: Vec<&Collection> = Vec::new();
    let mut orphans: Vec<&Collection> = Vec::new();
    let mut child_index: HashMap<i64, Vec<&Collection>> = HashMap::new();
    for &collection in by_id.values() {
        if root_ids.contains(&collection.id) {
            tops.push(collection);
            continue;
        }
        match collection.parent_id {
            Some(parent) if parent != collection.id && by_id.contains_key(&parent) => {
                child_index.entry(parent).or_default().push(collection);
            }
            _ => {
                warn!(collection = collection.id, parent = ?collection.parent_id, "orphan collection promoted to top level");
                orphans.push(collection);
            }
        }
    }
    tops.sort_by_key(|c| (c.sort_key, c.id));
    orphans.sort_by_key(|c| (c.sort_key, c.id));
    tops.extend(orphans);
    for siblings in child_index.values_mut() {
        siblings.sort_by_key(|c| (c.sort_key, c.id));
    }

    let mut index = Index {
        by_id,
        children: child_index,
        emitted: HashSet::new(),
        path: Vec::new(),
    };
    let top_ids: HashSet<i64> = tops.iter().map(|c| c.id).collect();

    let mut tree = vec![CollectionNode::unsorted()];

    if groups.is_empty() {
        for top in &tops {
            tree.extend(index.attach(top.id));
        }
        for stray in index.leftovers() {
            warn!(collection = stray.id, "collection unreachable from any root, promoted to top level");
            tree.extend(index.attach(stray.id));
        }
        return tree;
    }

    let mut ordered: Vec<&Group> = groups.iter().collect();
    ordered.sort_by_key(|g| g.sort_key);

    let mut seen_titles: HashMap<&str, usize> = HashMap::new();
    for group in ordered {
        if group.hidden && !options.include_hidden_groups {
            debug!(group = %group.title, "skipping hidden group");
            continue;
        }

        let mut members = Vec::new();
        for &id in &group.collection_ids {
            if !index.by_id.contains_key(&id) {
                warn!(group = %group.title, collection = id, "group references unknown collection, dropped");
                continue;
            }
            if !top_ids.contains(&id) {
                debug!(group = %group.title, collection = id, "non-root collection listed in group, ignored");
                continue;
            }
            match index.attach(id) {
                Some(node) => members.push(node),
                None => debug!(group = %group.title, collection = id, "collection already placed by an earlier group"),
            }
        }

        if members.is_empty() && !options.include_empty_groups {
            continue;
        }

        let occurrence = seen_titles.entry(group.title.as_str()).or_insert(0);
        *occurrence += 1;
        let key = if *occurrence == 1 {
            NodeKey::Group(group.title.clone())
        } else {
            NodeKey::Group(format!("{}#{}", group.title, occurrence))
        };
        tree.push(group_node(key, &group.title, group.sort_key, members));
    }

    let mut other = Vec::new();
    for top in &tops {
        if !index.emitted.contains(&top.id) {
            other.extend(index.attach(top.id));
        }
    }
    for stray in index.leftovers() {
        warn!(collection = stray.id, "collection unreachable from any root, placed in Other");
        other.extend(index.attach(stray.id));
    }
    if !other.is_empty() {
        tree.push(group_node(NodeKey::Other, OTHER_GROUP_TITLE, i64::MAX, other));
    }

    tree
}
