use serde::{Deserialize, Serialize};

use super::collection::ALL_COLLECTIONS_ID;

/// A saved bookmark on the remote service ("raindrop").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    pub collection_id: i64,
    /// Epoch milliseconds.
    pub last_update: i64,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
}

/// An item to be created remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub collection_id: Option<i64>,
}

/// An item the server accepted, with its newly assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedItem {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub collection_id: i64,
}

/// Parameters of a paginated item listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub collection_id: i64,
    pub search: Option<String>,
    pub sort: String,
    pub nested: bool,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            collection_id: ALL_COLLECTIONS_ID,
            search: None,
            sort: "-created".to_string(),
            nested: true,
        }
    }
}

/// Totals of a paginated fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub total_fetched: usize,
    pub total_pages: u32,
}

/// What a page handler wants the pagination loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Continue,
    Stop,
}

/// The authenticated account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaindropUser {
    pub id: i64,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl RaindropUser {
    /// Name shown to the user after a successful connection test.
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.email.as_deref())
            .unwrap_or("unknown user")
            .to_string()
    }
}
