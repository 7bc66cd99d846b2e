//! Raindrop.io REST client.
//!
//! `RemoteCatalog` is the narrow interface the sync engine reads the remote
//! side through; `RaindropClient` implements it over `reqwest` with a bearer
//! token. `fetch_items_paginated` drives the page loop on top of any catalog.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::collection::{
    Collection, Group, ALL_COLLECTIONS_ID, TRASH_COLLECTION_ID, UNSORTED_COLLECTION_ID,
};
use crate::types::errors::RemoteError;
use crate::types::raindrop::{
    CreatedItem, FetchSummary, Item, ItemQuery, NewItem, PageControl, RaindropUser,
};
use crate::types::settings::ApiSettings;

/// Largest page the API serves.
pub const MAX_PAGE_SIZE: u32 = 50;
/// Hard cap on pages per paginated fetch.
pub const MAX_PAGES: u32 = 1000;

/// Read access to the remote catalog, plus batch item creation.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    async fn get_root_collections(&self) -> Result<Vec<Collection>, RemoteError>;
    async fn get_child_collections(&self) -> Result<Vec<Collection>, RemoteError>;
    async fn get_user_groups(&self) -> Result<Vec<Group>, RemoteError>;
    async fn get_user(&self) -> Result<RaindropUser, RemoteError>;
    /// One page of items, `page` counted from 0.
    async fn get_items_page(&self, query: &ItemQuery, page: u32, per_page: u32) -> Result<Vec<Item>, RemoteError>;
    /// Creates items in one batch. Only the accepted items are returned.
    async fn create_items(&self, items: &[NewItem]) -> Result<Vec<CreatedItem>, RemoteError>;

    /// Replaces the credential used for subsequent requests.
    fn set_token(&self, _token: Option<&str>) {}

    /// Latest `lastUpdate` across live and trashed items, `None` when the account has no items at all.
    async fn get_latest_change_timestamp(&self) -> Result<Option<i64>, RemoteError> {
        let mut latest = None;
        for collection_id in [ALL_COLLECTIONS_ID, TRASH_COLLECTION_ID] {
            let query = ItemQuery {
                collection_id,
                search: None,
                sort: "-lastUpdate".to_string(),
                nested: true,
            };
            let newest = self.get_items_page(&query, 0, 1).await?;
            latest = latest.max(newest.first().map(|item| item.last_update));
        }
        Ok(latest)
    }
}

/// Consumer of a paginated fetch.
#[async_trait]
pub trait PageHandler: Send {
    async fn handle_page(&mut self, items: Vec<Item>, page_index: u32, total_so_far: usize) -> PageControl;
}

/// Fetches pages strictly one after another, handing each non-empty page to
/// `handler` and awaiting it before the next request.
///
/// Stops on the first short page, when the handler asks to, or after
/// [`MAX_PAGES`] pages.
pub async fn fetch_items_paginated(
    remote: &dyn RemoteCatalog,
    query: &ItemQuery,
    per_page: u32,
    handler: &mut dyn PageHandler,
) -> Result<FetchSummary, RemoteError> {
    let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
    let mut summary = FetchSummary::default();

    for page in 0..MAX_PAGES {
        let items = remote.get_items_page(query, page, per_page).await?;
        let count = items.len();
        if count == 0 {
            break;
        }
        summary.total_fetched += count;
        summary.total_pages += 1;

        let control = handler.handle_page(items, page, summary.total_fetched).await;
        if control == PageControl::Stop || count < per_page as usize {
            break;
        }
        if page + 1 == MAX_PAGES {
            warn!(pages = MAX_PAGES, "page cap reached, stopping item fetch");
        }
    }

    Ok(summary)
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct ApiToken(String);

/// HTTP implementation of [`RemoteCatalog`].
pub struct RaindropClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<ApiToken>>,
}

impl RaindropClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, RemoteError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse_with_params(&raw, params).map_err(|e| RemoteError::Unavailable(format!("{}: {}", raw, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let guard = self.token.read().unwrap_or_else(PoisonError::into_inner);
        let token = guard.as_ref().ok_or(RemoteError::InvalidToken)?;
        Ok(request.bearer_auth(&token.0))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let request = self.authorize(request)?;
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        check_status(status, &body)?;
        decode(&body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, RemoteError> {
        let url = self.url(path, params)?;
        debug!(%url, "GET");
        self.send(self.http.get(url)).await
    }
}

#[async_trait]
impl RemoteCatalog for RaindropClient {
    /// Replaces the bearer token. Blank tokens clear it.
    fn set_token(&self, token: Option<&str>) {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| ApiToken(t.to_string()));
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    #[instrument(skip(self))]
    async fn get_root_collections(&self) -> Result<Vec<Collection>, RemoteError> {
        let body: ItemsBody<WireCollection> = self.get("collections", &[]).await?;
        Ok(body.items.into_iter().map(Collection::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_child_collections(&self) -> Result<Vec<Collection>, RemoteError> {
        let body: ItemsBody<WireCollection> = self.get("collections/childrens", &[]).await?;
        Ok(body.items.into_iter().map(Collection::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_user_groups(&self) -> Result<Vec<Group>, RemoteError> {
        let body: UserBody = self.get("user", &[]).await?;
        Ok(body.user.groups.into_iter().map(Group::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_user(&self) -> Result<RaindropUser, RemoteError> {
        let body: UserBody = self.get("user", &[]).await?;
        Ok(RaindropUser {
            id: body.user.id,
            full_name: body.user.full_name,
            email: body.user.email,
        })
    }

    #[instrument(skip(self, query), fields(collection = query.collection_id))]
    async fn get_items_page(&self, query: &ItemQuery, page: u32, per_page: u32) -> Result<Vec<Item>, RemoteError> {
        let path = format!("raindrops/{}", query.collection_id);
        let body: ItemsBody<WireItem> = self.get(&path, &item_params(query, page, per_page)).await?;
        Ok(body.items.into_iter().map(Item::from).collect())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn create_items(&self, items: &[NewItem]) -> Result<Vec<CreatedItem>, RemoteError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url("raindrops", &[])?;
        let request = self.http.post(url).json(&create_body(items));
        let body: ItemsBody<WireItem> = self.send(request).await?;
        Ok(body
            .items
            .into_iter()
            .map(|wire| {
                let item = Item::from(wire);
                CreatedItem {
                    id: item.id,
                    url: item.url.unwrap_or_default(),
                    title: item.title,
                    collection_id: item.collection_id,
                }
            })
            .collect())
    }
}

// ─── Wire format ───

fn item_params(query: &ItemQuery, page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("sort", query.sort.clone()),
        ("perpage", per_page.to_string()),
        ("page", page.to_string()),
        ("nested", query.nested.to_string()),
    ];
    if let Some(search) = query.search.as_ref().filter(|s| !s.is_empty()) {
        params.push(("search", search.clone()));
    }
    params
}

fn create_body(items: &[NewItem]) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut entry = json!({ "link": item.url });
            if let Some(title) = &item.title {
                entry["title"] = json!(title);
            }
            if let Some(collection_id) = item.collection_id {
                entry["collection"] = json!({ "$id": collection_id });
            }
            entry
        })
        .collect();
    json!({ "items": items })
}

/// Maps an HTTP status to the client's error taxonomy.
fn check_status(status: u16, body: &str) -> Result<(), RemoteError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(RemoteError::InvalidToken),
        _ => {
            let snippet: String = body.chars().take(200).collect();
            Err(RemoteError::Unavailable(format!("HTTP {}: {}", status, snippet)))
        }
    }
}

/// Decodes a response body, turning `result: false` into [`RemoteError::Api`].
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    let value: Value = serde_json::from_str(body).map_err(|e| RemoteError::Parse(e.to_string()))?;
    if value.get("result").and_then(Value::as_bool) != Some(true) {
        let message = value
            .get("errorMessage")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("request rejected");
        return Err(RemoteError::Api(message.to_string()));
    }
    serde_json::from_value(value).map_err(|e| RemoteError::Parse(e.to_string()))
}

fn parse_timestamp(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
}

#[derive(Deserialize)]
struct ItemsBody<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct UserBody {
    user: WireUser,
}

#[derive(Deserialize)]
struct WireRef {
    #[serde(rename = "$id")]
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    #[serde(rename = "_id")]
    id: i64,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    groups: Vec<WireGroup>,
}

#[derive(Deserialize)]
struct WireGroup {
    #[serde(default)]
    title: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    sort: i64,
    #[serde(default)]
    collections: Vec<i64>,
}

impl From<WireGroup> for Group {
    fn from(wire: WireGroup) -> Self {
        Group {
            title: wire.title,
            hidden: wire.hidden,
            sort_key: wire.sort,
            collection_ids: wire.collections,
        }
    }
}

#[derive(Deserialize)]
struct WireCollection {
    #[serde(rename = "_id")]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    parent: Option<WireRef>,
    #[serde(default)]
    sort: i64,
}

impl From<WireCollection> for Collection {
    fn from(wire: WireCollection) -> Self {
        Collection {
            id: wire.id,
            title: wire.title,
            parent_id: wire.parent.map(|p| p.id),
            sort_key: wire.sort,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    #[serde(rename = "_id")]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    collection: Option<WireRef>,
    #[serde(default)]
    collection_id: Option<i64>,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

impl From<WireItem> for Item {
    fn from(wire: WireItem) -> Self {
        let created_at = parse_timestamp(wire.created.as_deref());
        let last_update = parse_timestamp(wire.last_update.as_deref())
            .or(created_at)
            .unwrap_or(0);
        Item {
            id: wire.id,
            title: wire.title,
            url: wire.link.filter(|l| !l.is_empty()),
            collection_id: wire
                .collection
                .map(|c| c.id)
                .or(wire.collection_id)
                .unwrap_or(UNSORTED_COLLECTION_ID),
            last_update,
            created_at,
        }
    }
}
