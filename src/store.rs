//! Key-value storage behind the Merkle accumulator.
//!
//! Two backends are provided: [`MemoryStore`] for ephemeral trees and
//! [`DiskStore`], an SQLite database holding one key range per namespace.
//! Neither does any locking; a tree has a single writer.
//!
//! Higher-level operations run inside a [`Session`], which opens the store on
//! creation and closes it when dropped, so a failing `import` still releases
//! the store before the error reaches the caller.

use crate::error::StoreError;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lazy sequence of `(key, value)` pairs, in key order.
pub type StoreIter<'a> = Box<dyn Iterator<Item = (String, Vec<u8>)> + 'a>;

/// Minimal storage contract used by the accumulator.
pub trait KeyValueStore {
    fn open(&mut self) -> StoreResult<()>;

    fn close(&mut self) -> StoreResult<()>;

    fn is_open(&self) -> bool;

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn set(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.set_batch(vec![(key.to_string(), value)])
    }

    /// Writes every entry or none of them.
    fn set_batch(&mut self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()>;

    fn iter(&self) -> StoreResult<StoreIter<'_>>;
}

/// In-memory store for demo and test trees.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
    open: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn open(&mut self) -> StoreResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        Ok(self.entries.get(key).cloned())
    }

    fn set_batch(&mut self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        self.entries.extend(entries);
        Ok(())
    }

    fn iter(&self) -> StoreResult<StoreIter<'_>> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        Ok(Box::new(
            self.entries.iter().map(|(k, v)| (k.clone(), v.clone())),
        ))
    }
}

/// File name of the SQLite database shared by every namespace in a data dir.
pub const DATABASE_FILE: &str = "store.sqlite3";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (namespace, key)
)";

/// Durable store backed by SQLite at `<dir>/store.sqlite3`.
///
/// Every namespace is a key range of one `entries` table, so several trees
/// can share a data directory. `set_batch` runs in a single transaction.
#[derive(Debug)]
pub struct DiskStore {
    path: PathBuf,
    namespace: String,
    conn: Option<Connection>,
}

impl DiskStore {
    pub fn new<P: AsRef<Path>>(dir: P, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(DATABASE_FILE),
            namespace: namespace.to_string(),
            conn: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn conn(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }
}

impl KeyValueStore for DiskStore {
    fn open(&mut self) -> StoreResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute(SCHEMA, [])?;
        debug!(
            "Opened store '{}' at {}",
            self.namespace,
            self.path.display()
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Database(e))?;
            debug!("Closed store '{}'", self.namespace);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_batch(&mut self, batch: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in &batch {
                stmt.execute(params![self.namespace, key, value])?;
            }
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit()?;
        Ok(())
    }

    fn iter(&self) -> StoreResult<StoreIter<'_>> {
        let mut stmt = self
            .conn()?
            .prepare("SELECT key, value FROM entries WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![self.namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, Vec<u8>)>>>()?;
        Ok(Box::new(rows.into_iter()))
    }
}

/// Scoped handle that keeps a store open for the duration of one operation.
pub struct Session<'a, S: KeyValueStore> {
    store: &'a mut S,
    closed: bool,
}

impl<'a, S: KeyValueStore> Session<'a, S> {
    pub fn open(store: &'a mut S) -> StoreResult<Self> {
        store.open()?;
        Ok(Self {
            store,
            closed: false,
        })
    }

    /// Closes the store and reports any failure, instead of logging it on drop.
    pub fn close(mut self) -> StoreResult<()> {
        self.closed = true;
        self.store.close()
    }
}

impl<S: KeyValueStore> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.store.close() {
                warn!("Failed to close store session: {e}");
            }
        }
    }
}

impl<S: KeyValueStore> KeyValueStore for Session<'_, S> {
    fn open(&mut self) -> StoreResult<()> {
        self.store.open()
    }

    fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
        self.store.close()
    }

    fn is_open(&self) -> bool {
        self.store.is_open()
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.store.get(key)
    }

    fn set_batch(&mut self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        self.store.set_batch(entries)
    }

    fn iter(&self) -> StoreResult<StoreIter<'_>> {
        self.store.iter()
    }
}
