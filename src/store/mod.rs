//! Local key-value storage.
//!
//! Holds what a browser client would keep in localStorage/sessionStorage:
//! wizard form snapshots, the one-shot prefill payload and the per-generation
//! progress cache. Values are JSON text in a single SQLite table.

pub mod artifacts;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::wire::PromptSet;

/// How long a saved progress snapshot stays restorable.
pub const PROGRESS_TTL_HOURS: i64 = 24;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening store {}", path.display()))?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let v = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(v)
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(s) => {
                let v = serde_json::from_str(&s).with_context(|| format!("corrupt value under key {key}"))?;
                Ok(Some(v))
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put_raw(key, &serde_json::to_string(value)?)
    }

    /// Read and delete in one step; used for one-shot payloads.
    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let v = self.get_json(key)?;
        if v.is_some() {
            self.delete(key)?;
        }
        Ok(v)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn save_progress(&self, generation_id: &str, prompts: &PromptSet) -> Result<()> {
        self.save_progress_at(generation_id, prompts, Utc::now())
    }

    pub fn save_progress_at(&self, generation_id: &str, prompts: &PromptSet, saved_at: DateTime<Utc>) -> Result<()> {
        let snap = ProgressSnapshot { generation_id: generation_id.to_string(), saved_at, prompts: prompts.clone() };
        self.put_json(&progress_key(generation_id), &snap)
    }

    /// Saved prompts for a generation, if saved within the last 24 hours.
    pub fn restore_progress(&self, generation_id: &str, now: DateTime<Utc>) -> Result<Option<PromptSet>> {
        let snap: Option<ProgressSnapshot> = self.get_json(&progress_key(generation_id))?;
        Ok(snap.and_then(|s| {
            if now - s.saved_at < Duration::hours(PROGRESS_TTL_HOURS) {
                Some(s.prompts)
            } else {
                tracing::debug!(generation_id, saved_at = %s.saved_at, "progress cache expired");
                None
            }
        }))
    }

    /// Drop progress snapshots past the freshness window. Returns how many
    /// were removed.
    pub fn prune_progress(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys_with_prefix("progress:")? {
            let snap: Option<ProgressSnapshot> = self.get_json(&key).unwrap_or(None);
            let stale = snap.map(|s| now - s.saved_at >= Duration::hours(PROGRESS_TTL_HOURS)).unwrap_or(true);
            if stale && self.delete(&key)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned stale progress snapshots");
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressSnapshot {
    generation_id: String,
    saved_at: DateTime<Utc>,
    prompts: PromptSet,
}

pub fn progress_key(generation_id: &str) -> String {
    format!("progress:{generation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{PromptCategory, PromptItem};

    fn sample_prompts() -> PromptSet {
        let mut p = PromptSet::default();
        p.push(PromptCategory::Frontend, PromptItem { title: "Home Screen".into(), prompt: "Build it".into() });
        p
    }

    #[test]
    fn test_put_get_delete() {
        let store = Store::in_memory().unwrap();
        store.put_json("form:main", &vec!["a", "b"]).unwrap();
        let v: Option<Vec<String>> = store.get_json("form:main").unwrap();
        assert_eq!(v, Some(vec!["a".to_string(), "b".to_string()]));

        store.put_json("form:main", &vec!["c"]).unwrap();
        let v: Option<Vec<String>> = store.get_json("form:main").unwrap();
        assert_eq!(v, Some(vec!["c".to_string()]));

        assert!(store.delete("form:main").unwrap());
        assert!(!store.delete("form:main").unwrap());
    }

    #[test]
    fn test_take_is_one_shot() {
        let store = Store::in_memory().unwrap();
        store.put_json("prefill", &"hello").unwrap();
        assert_eq!(store.take_json::<String>("prefill").unwrap(), Some("hello".into()));
        assert_eq!(store.take_json::<String>("prefill").unwrap(), None);
    }

    #[test]
    fn test_fresh_progress_restores() {
        let store = Store::in_memory().unwrap();
        let now = Utc::now();
        store.save_progress_at("g1", &sample_prompts(), now - Duration::hours(23)).unwrap();
        let restored = store.restore_progress("g1", now).unwrap();
        assert_eq!(restored, Some(sample_prompts()));
    }

    #[test]
    fn test_stale_progress_is_ignored() {
        let store = Store::in_memory().unwrap();
        let now = Utc::now();
        store.save_progress_at("g1", &sample_prompts(), now - Duration::hours(25)).unwrap();
        assert_eq!(store.restore_progress("g1", now).unwrap(), None);
        assert_eq!(store.restore_progress("missing", now).unwrap(), None);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        {
            let store = Store::open(&path).unwrap();
            store.put_raw("k", "v").unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_raw("k").unwrap(), Some("v".into()));
        assert_eq!(store.keys_with_prefix("k").unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_prune_keeps_fresh_snapshots() {
        let store = Store::in_memory().unwrap();
        let now = Utc::now();
        store.save_progress_at("old", &sample_prompts(), now - Duration::hours(25)).unwrap();
        store.save_progress_at("new", &sample_prompts(), now - Duration::hours(1)).unwrap();
        store.put_raw("prefill", "{}").unwrap();

        assert_eq!(store.prune_progress(now).unwrap(), 1);
        assert_eq!(store.keys_with_prefix("progress:").unwrap(), vec![progress_key("new")]);
        assert!(store.get_raw("prefill").unwrap().is_some());
    }
}
