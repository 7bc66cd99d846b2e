use serde::{Deserialize, Serialize};

/// A node of the native bookmark tree. Folders carry no URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub position: i32,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }
}

/// Changes applied to an existing folder. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderChanges {
    pub title: Option<String>,
    pub parent_id: Option<String>,
    /// Target index among the (new) parent's children, clamped to the end.
    pub index: Option<usize>,
}

impl FolderChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.parent_id.is_none() && self.index.is_none()
    }
}

/// Changes applied to an existing bookmark. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookmarkChanges {
    pub title: Option<String>,
    pub url: Option<String>,
    pub parent_id: Option<String>,
}

impl BookmarkChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.url.is_none() && self.parent_id.is_none()
    }
}
