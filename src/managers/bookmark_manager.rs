//! Bookmark Manager for Raindrop Sync.
//!
//! Defines `BookmarkStore`, the narrow interface the sync engine uses to touch
//! the native bookmark tree, and `SqliteBookmarkStore`, an implementation
//! backed by SQLite via `rusqlite`.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::connection::Database;
use crate::database::migrations::{BOOKMARKS_BAR_ID, ROOT_NODE_ID};
use crate::types::bookmark::{BookmarkChanges, BookmarkNode, FolderChanges};
use crate::types::errors::StoreError;

/// Operations on the native bookmark tree.
///
/// A child listing is in position order and reflects every change previously
/// issued and awaited through the same store.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn create_folder(&self, parent_id: &str, title: &str) -> Result<BookmarkNode, StoreError>;
    async fn update_folder(&self, id: &str, changes: FolderChanges) -> Result<BookmarkNode, StoreError>;
    async fn delete_folder_recursive(&self, id: &str) -> Result<(), StoreError>;
    async fn create_bookmark(&self, parent_id: &str, title: &str, url: &str) -> Result<BookmarkNode, StoreError>;
    async fn update_bookmark(&self, id: &str, changes: BookmarkChanges) -> Result<BookmarkNode, StoreError>;
    async fn delete_bookmark(&self, id: &str) -> Result<(), StoreError>;
    async fn get_node(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError>;
    async fn list_children(&self, parent_id: &str) -> Result<Vec<BookmarkNode>, StoreError>;
    /// Folders directly under the bookmarks bar whose title matches exactly.
    async fn find_top_level_folders_by_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError>;
    fn bookmarks_bar_id(&self) -> String;

    async fn find_top_level_folder_by_title(&self, title: &str) -> Result<Option<BookmarkNode>, StoreError> {
        Ok(self.find_top_level_folders_by_title(title).await?.into_iter().next())
    }
}

/// Bookmark tree stored in the `bookmark_nodes` table.
pub struct SqliteBookmarkStore {
    db: Arc<Database>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

impl SqliteBookmarkStore {
    /// Creates a new `SqliteBookmarkStore` over the shared database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Computes the next position value for a child of `parent_id`.
    fn next_position(conn: &Connection, parent_id: &str) -> Result<i32, StoreError> {
        conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM bookmark_nodes WHERE parent_id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    /// Reads a single node row into a struct.
    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<BookmarkNode> {
        Ok(BookmarkNode {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            position: row.get(4)?,
        })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<BookmarkNode>, StoreError> {
        conn.query_row(
            "SELECT id, parent_id, title, url, position FROM bookmark_nodes WHERE id = ?1",
            params![id],
            Self::row_to_node,
        )
        .optional()
        .map_err(db_err)
    }

    fn require_folder(conn: &Connection, id: &str) -> Result<BookmarkNode, StoreError> {
        match Self::load(conn, id)? {
            Some(node) if node.is_folder() => Ok(node),
            Some(_) => Err(StoreError::NotAFolder(id.to_string())),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn insert(conn: &Connection, parent_id: &str, title: &str, url: Option<&str>) -> Result<BookmarkNode, StoreError> {
        Self::require_folder(conn, parent_id)?;

        let id = Uuid::new_v4().to_string();
        let now = Self::now();
        let position = Self::next_position(conn, parent_id)?;

        conn.execute(
            "INSERT INTO bookmark_nodes (id, parent_id, title, url, position, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, parent_id, title, url, position, now, now],
        )
        .map_err(db_err)?;

        Ok(BookmarkNode {
            id,
            parent_id: Some(parent_id.to_string()),
            title: title.to_string(),
            url: url.map(str::to_string),
            position,
        })
    }

    /// Re-parents `id` under `parent_id`, appending it as the last child.
    ///
    /// Refuses to move a folder into its own subtree.
    fn move_node(conn: &Connection, id: &str, parent_id: &str, now: i64) -> Result<(), StoreError> {
        Self::require_folder(conn, parent_id)?;

        let mut cursor = Some(parent_id.to_string());
        while let Some(current) = cursor {
            if current == id {
                return Err(StoreError::DatabaseError(format!(
                    "cannot move {} into its own subtree",
                    id
                )));
            }
            cursor = Self::load(conn, &current)?.and_then(|n| n.parent_id);
        }

        let position = Self::next_position(conn, parent_id)?;
        conn.execute(
            "UPDATE bookmark_nodes SET parent_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4",
            params![parent_id, position, now, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Moves `id` to `index` among its siblings and renumbers them from 0.
    fn reposition(conn: &Connection, id: &str, index: usize) -> Result<(), StoreError> {
        let node = Self::load(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let Some(parent_id) = node.parent_id.filter(|p| p != ROOT_NODE_ID) else {
            return Err(StoreError::DatabaseError(format!("cannot reorder fixed folder {}", id)));
        };

        let mut stmt = conn
            .prepare("SELECT id FROM bookmark_nodes WHERE parent_id = ?1 AND id != ?2 ORDER BY position")
            .map_err(db_err)?;
        let mut siblings = stmt
            .query_map(params![parent_id, id], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        siblings.insert(index.min(siblings.len()), id.to_string());

        let mut update = conn
            .prepare("UPDATE bookmark_nodes SET position = ?1 WHERE id = ?2")
            .map_err(db_err)?;
        for (position, sibling) in siblings.iter().enumerate() {
            update.execute(params![position as i32, sibling]).map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BookmarkStore for SqliteBookmarkStore {
    async fn create_folder(&self, parent_id: &str, title: &str) -> Result<BookmarkNode, StoreError> {
        let conn = self.db.connection();
        Self::insert(&conn, parent_id, title, None)
    }

    async fn update_folder(&self, id: &str, changes: FolderChanges) -> Result<BookmarkNode, StoreError> {
        let conn = self.db.connection();
        Self::require_folder(&conn, id)?;
        let now = Self::now();

        if let Some(title) = &changes.title {
            conn.execute(
                "UPDATE bookmark_nodes SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, id],
            )
            .map_err(db_err)?;
        }
        if let Some(parent_id) = &changes.parent_id {
            Self::move_node(&conn, id, parent_id, now)?;
        }
        if let Some(index) = changes.index {
            Self::reposition(&conn, id, index)?;
        }

        Self::load(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Deletes a folder and, through the cascading foreign key, its whole subtree.
    async fn delete_folder_recursive(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.db.connection();
        let node = Self::require_folder(&conn, id)?;
        if node.parent_id.is_none() || id == BOOKMARKS_BAR_ID {
            return Err(StoreError::DatabaseError(format!("refusing to delete fixed folder {}", id)));
        }

        conn.execute("DELETE FROM bookmark_nodes WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_bookmark(&self, parent_id: &str, title: &str, url: &str) -> Result<BookmarkNode, StoreError> {
        let conn = self.db.connection();
        Self::insert(&conn, parent_id, title, Some(url))
    }

    async fn update_bookmark(&self, id: &str, changes: BookmarkChanges) -> Result<BookmarkNode, StoreError> {
        let conn = self.db.connection();
        let node = Self::load(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if node.is_folder() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let now = Self::now();

        // Build dynamic update from whichever fields are present
        match (&changes.title, &changes.url) {
            (Some(t), Some(u)) => conn.execute(
                "UPDATE bookmark_nodes SET title = ?1, url = ?2, updated_at = ?3 WHERE id = ?4",
                params![t, u, now, id],
            ),
            (Some(t), None) => conn.execute(
                "UPDATE bookmark_nodes SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![t, now, id],
            ),
            (None, Some(u)) => conn.execute(
                "UPDATE bookmark_nodes SET url = ?1, updated_at = ?2 WHERE id = ?3",
                params![u, now, id],
            ),
            (None, None) => Ok(0),
        }
        .map_err(db_err)?;

        if let Some(parent_id) = &changes.parent_id {
            Self::move_node(&conn, id, parent_id, now)?;
        }

        Self::load(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_bookmark(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.db.connection();
        let affected = conn
            .execute(
                "DELETE FROM bookmark_nodes WHERE id = ?1 AND url IS NOT NULL",
                params![id],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError> {
        let conn = self.db.connection();
        Self::load(&conn, id)
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, parent_id, title, url, position FROM bookmark_nodes \
                 WHERE parent_id = ?1 ORDER BY position",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![parent_id], Self::row_to_node)
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }

    async fn find_top_level_folders_by_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, parent_id, title, url, position FROM bookmark_nodes \
                 WHERE parent_id = ?1 AND title = ?2 AND url IS NULL ORDER BY position",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![BOOKMARKS_BAR_ID, title], Self::row_to_node)
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }

    fn bookmarks_bar_id(&self) -> String {
        BOOKMARKS_BAR_ID.to_string()
    }
}
