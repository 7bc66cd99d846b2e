use serde::{Deserialize, Serialize};

/// Top-level configuration container persisted as `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncSettings {
    pub api: ApiSettings,
    pub sync: EngineSettings,
}

/// Remote API access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.raindrop.io/rest/v1".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// How local folders are produced for the collection tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaterializationPolicy {
    /// Remove the previous sync root and recreate every folder.
    Destructive,
    /// Reuse previously mapped folders, renaming or moving them as needed.
    Stable,
}

/// Reconciler behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    pub root_folder_title: String,
    pub per_page: u32,
    pub sort: String,
    pub materialization: MaterializationPolicy,
    pub include_empty_groups: bool,
    pub include_hidden_groups: bool,
    pub route_unresolved_to_unsorted: bool,
    pub timeout_minutes: u64,
    #[serde(default = "default_true")]
    pub delete_removed_items: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            root_folder_title: "Raindrop".to_string(),
            per_page: 50,
            sort: "-created".to_string(),
            materialization: MaterializationPolicy::Stable,
            include_empty_groups: true,
            include_hidden_groups: true,
            route_unresolved_to_unsorted: false,
            timeout_minutes: 30,
            delete_removed_items: true,
        }
    }
}

/// Periodic sync frequency chosen by the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AutoSyncFrequency {
    #[serde(rename = "10min")]
    TenMinutes,
    #[serde(rename = "hourly")]
    Hourly,
    #[default]
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
}

impl AutoSyncFrequency {
    /// Parses the stored preference, falling back to daily for unknown values.
    pub fn from_preference(value: &str) -> Self {
        match value {
            "10min" => AutoSyncFrequency::TenMinutes,
            "hourly" => AutoSyncFrequency::Hourly,
            "weekly" => AutoSyncFrequency::Weekly,
            _ => AutoSyncFrequency::Daily,
        }
    }

    pub fn as_preference(self) -> &'static str {
        match self {
            AutoSyncFrequency::TenMinutes => "10min",
            AutoSyncFrequency::Hourly => "hourly",
            AutoSyncFrequency::Daily => "daily",
            AutoSyncFrequency::Weekly => "weekly",
        }
    }

    /// Period between fires, in minutes.
    pub fn period_minutes(self) -> u64 {
        match self {
            AutoSyncFrequency::TenMinutes => 10,
            AutoSyncFrequency::Hourly => 60,
            AutoSyncFrequency::Daily => 24 * 60,
            AutoSyncFrequency::Weekly => 7 * 24 * 60,
        }
    }

    /// `(delay, period)` in minutes for a fresh schedule.
    pub fn schedule(self) -> (u64, u64) {
        (self.period_minutes(), self.period_minutes())
    }
}
