use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::models::{Message, MessageEdge, MessagePage, PageInfo};
use crate::error::{Error, Result};

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "GqlChat")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

// Last confirmed page, so the list can render before the network answers
pub struct MessageCache {
    conn: Connection,
}

impl MessageCache {
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| Error::Config("no data dir".into()))?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS page_info (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                has_next_page INTEGER NOT NULL,
                has_previous_page INTEGER NOT NULL,
                start_cursor TEXT,
                end_cursor TEXT,
                cached_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Replace the cached page. Placeholders are never written.
    pub fn save_page(&mut self, page: &MessagePage) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        let confirmed = page.messages().filter(|m| !m.is_temporary());
        for (position, message) in confirmed.enumerate() {
            tx.execute(
                "INSERT INTO messages (id, position, text, raw_json) VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.id,
                    position as i64,
                    message.text,
                    serde_json::to_string(message)?
                ],
            )?;
        }
        // A trailing placeholder may hold the end cursor; fall back to the last confirmed id.
        let end_cursor = page
            .page_info
            .end_cursor
            .as_deref()
            .filter(|c| !crate::api::models::is_temporary_id(c))
            .map(str::to_string)
            .or_else(|| {
                page.messages()
                    .filter(|m| !m.is_temporary())
                    .last()
                    .map(|m| m.id.clone())
            });
        let info = &page.page_info;
        tx.execute(
            r#"
            INSERT INTO page_info
                (slot, has_next_page, has_previous_page, start_cursor, end_cursor, cached_at)
            VALUES (0, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(slot) DO UPDATE SET
                has_next_page=excluded.has_next_page,
                has_previous_page=excluded.has_previous_page,
                start_cursor=excluded.start_cursor,
                end_cursor=excluded.end_cursor,
                cached_at=excluded.cached_at
            "#,
            params![
                info.has_next_page,
                info.has_previous_page,
                info.start_cursor,
                end_cursor,
                Utc::now()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_page(&self) -> Result<Option<MessagePage>> {
        let info = self
            .conn
            .query_row(
                "SELECT has_next_page, has_previous_page, start_cursor, end_cursor
                 FROM page_info WHERE slot = 0",
                [],
                |row| {
                    Ok(PageInfo {
                        has_next_page: row.get(0)?,
                        has_previous_page: row.get(1)?,
                        start_cursor: row.get(2)?,
                        end_cursor: row.get(3)?,
                    })
                },
            )
            .optional()?;
        let Some(page_info) = info else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT raw_json FROM messages ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut edges = Vec::new();
        for raw in rows {
            let message: Message = serde_json::from_str(&raw?)?;
            edges.push(MessageEdge::for_message(message));
        }
        Ok(Some(MessagePage { edges, page_info }))
    }

    pub fn cached_at(&self) -> Result<Option<DateTime<Utc>>> {
        let ts = self
            .conn
            .query_row("SELECT cached_at FROM page_info WHERE slot = 0", [], |row| row.get(0))
            .optional()?;
        Ok(ts)
    }
}
