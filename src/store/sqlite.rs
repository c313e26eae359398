//! SQLite-backed store.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::sync::Mutex;

use super::{ActionKind, ChannelHistory, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open store database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bot_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS account_sessions (
                account    TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS channel_actions (
                handle     TEXT PRIMARY KEY,
                comments   INTEGER NOT NULL DEFAULT 0,
                reactions  INTEGER NOT NULL DEFAULT 0,
                last_link  TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .context("failed to create store tables")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_state(&self, key: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bot_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, json],
        )?;
        Ok(())
    }

    async fn load_state(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row("SELECT value FROM bot_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_session(&self, account: &str, data: &Value) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO account_sessions (account, data, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(account) DO UPDATE
             SET data = excluded.data, updated_at = excluded.updated_at",
            params![account, json],
        )?;
        Ok(())
    }

    async fn load_session(&self, account: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM account_sessions WHERE account = ?1",
                [account],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn record_channel_action(
        &self,
        handle: &str,
        kind: ActionKind,
        link: Option<&str>,
    ) -> Result<()> {
        let (comment_inc, reaction_inc) = match kind {
            ActionKind::Comment => (1, 0),
            ActionKind::Reaction => (0, 1),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO channel_actions (handle, comments, reactions, last_link, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(handle) DO UPDATE SET
                comments   = comments + ?2,
                reactions  = reactions + ?3,
                last_link  = COALESCE(?4, last_link),
                updated_at = datetime('now')",
            params![handle, comment_inc, reaction_inc, link],
        )?;
        Ok(())
    }

    async fn channel_history(&self, handle: &str) -> Result<Option<ChannelHistory>> {
        let conn = self.conn.lock().unwrap();
        let history = conn
            .query_row(
                "SELECT comments, reactions, last_link FROM channel_actions WHERE handle = ?1",
                [handle],
                |row| {
                    Ok(ChannelHistory {
                        comments: row.get::<_, i64>(0)? as u64,
                        reactions: row.get::<_, i64>(1)? as u64,
                        last_link: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(history)
    }
}
