use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote id of the built-in "Unsorted" pseudo-collection.
pub const UNSORTED_COLLECTION_ID: i64 = -1;
/// Remote id of the trash pseudo-collection holding deleted items.
pub const TRASH_COLLECTION_ID: i64 = -99;
/// Remote id addressing every collection except the trash.
pub const ALL_COLLECTIONS_ID: i64 = 0;

/// Mapping key of the unsorted folder.
pub const UNSORTED_KEY: &str = "unsorted";
/// Title of the synthetic group that collects ungrouped root collections.
pub const OTHER_GROUP_TITLE: &str = "Other";
const OTHER_GROUP_KEY: &str = "__other__";

/// A remote collection, flattened from the API shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub title: String,
    pub parent_id: Option<i64>,
    pub sort_key: i64,
}

/// A named ordering of root collections from the user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub title: String,
    pub hidden: bool,
    pub sort_key: i64,
    pub collection_ids: Vec<i64>,
}

/// Identity of a node in the built collection tree.
///
/// Also the key under which the node's local folder is recorded in the
/// collection mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Unsorted,
    Collection(i64),
    Group(String),
    Other,
}

impl NodeKey {
    /// Parses a mapping key back into a node key.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == UNSORTED_KEY {
            return Some(NodeKey::Unsorted);
        }
        if let Some(title) = raw.strip_prefix("group:") {
            if title == OTHER_GROUP_KEY {
                return Some(NodeKey::Other);
            }
            return Some(NodeKey::Group(title.to_string()));
        }
        raw.parse::<i64>().ok().map(NodeKey::Collection)
    }

    /// Mapping key for the folder an item of `collection_id` belongs in.
    pub fn for_item_collection(collection_id: i64) -> Self {
        if collection_id == UNSORTED_COLLECTION_ID {
            NodeKey::Unsorted
        } else {
            NodeKey::Collection(collection_id)
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Unsorted => write!(f, "{}", UNSORTED_KEY),
            NodeKey::Collection(id) => write!(f, "{}", id),
            NodeKey::Group(title) => write!(f, "group:{}", title),
            NodeKey::Other => write!(f, "group:{}", OTHER_GROUP_KEY),
        }
    }
}

/// A node of the collection tree. Built fresh on every sync, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionNode {
    pub key: NodeKey,
    pub title: String,
    pub sort_key: i64,
    pub is_group: bool,
    pub children: Vec<CollectionNode>,
}

impl CollectionNode {
    /// The always-first unsorted node.
    pub fn unsorted() -> Self {
        Self {
            key: NodeKey::Unsorted,
            title: "Unsorted".to_string(),
            sort_key: i64::MIN,
            is_group: false,
            children: Vec::new(),
        }
    }

    /// Visits this node and every descendant in depth-first pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a CollectionNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collection ids contained in this subtree.
    pub fn collection_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        self.walk(&mut |node| {
            if let NodeKey::Collection(id) = node.key {
                ids.push(id);
            }
        });
        ids
    }
}
