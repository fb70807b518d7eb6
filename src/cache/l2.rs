//! L2 Cache - On-Disk Durable Tier
//!
//! SQLite-backed store that survives process restarts.
//!
//! # Design
//!
//! - One database file (`cache.db`) per cache directory, WAL journal
//! - A single connection behind a mutex; the store serializes writers
//! - Size limit enforced on write: expired rows first, then least
//!   recently accessed rows
//!
//! # Schema versioning
//!
//! [`check_schema`] inspects an existing database before it is used. A
//! database that is missing required columns, carries another schema
//! version, or cannot be read at all is discarded together with its WAL
//! artifacts and recreated empty. Losing cached data is preferred over a
//! cache that cannot be used. This runs once, inside [`DiskStore::open`],
//! under a process-wide lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::entry::{expiry_from_ttl, now_millis};
use super::tier::{CacheTier, StoredValue, TierStats, TierStore};
use crate::config::DEFAULT_SIZE_LIMIT_MB;
use crate::error::{Error, Result};

/// Current on-disk schema version (stored in `PRAGMA user_version`)
pub const SCHEMA_VERSION: i32 = 2;

/// Database file name inside the cache directory
pub const DB_FILE_NAME: &str = "cache.db";

/// Columns the current code reads and writes
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "key",
    "value",
    "tag",
    "created_at",
    "expires_at",
    "last_access",
    "size",
];

/// Rows removed per round while culling down to the size limit
const CULL_BATCH: i64 = 64;

/// Serializes validate → migrate → open across threads of this process
static OPEN_LOCK: Mutex<()> = parking_lot::const_mutex(());

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key         TEXT PRIMARY KEY NOT NULL,
        value       BLOB NOT NULL,
        tag         TEXT,
        created_at  INTEGER NOT NULL,
        expires_at  INTEGER,
        last_access INTEGER NOT NULL,
        size        INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_tag ON cache_entries(tag);
    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
";

/// Outcome of inspecting an existing database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    /// No cache tables yet; the schema will be created
    Fresh,
    /// Schema matches the current version
    Valid,
    /// Schema cannot be used; the database must be discarded
    Incompatible { reason: String },
}

impl SchemaCheck {
    /// Whether the database can be opened as-is
    pub fn is_usable(&self) -> bool {
        !matches!(self, SchemaCheck::Incompatible { .. })
    }
}

/// Inspect a connection's schema against [`REQUIRED_COLUMNS`] and
/// [`SCHEMA_VERSION`].
pub fn check_schema(conn: &Connection) -> Result<SchemaCheck> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    if !tables.iter().any(|t| t == "cache_entries") {
        if tables.is_empty() {
            return Ok(SchemaCheck::Fresh);
        }
        return Ok(SchemaCheck::Incompatible {
            reason: format!("unexpected tables: {}", tables.join(", ")),
        });
    }

    let mut stmt = conn.prepare("PRAGMA table_info(cache_entries)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(1))?
        .collect::<std::result::Result<_, _>>()?;

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|existing| existing == c))
        .collect();
    if !missing.is_empty() {
        return Ok(SchemaCheck::Incompatible {
            reason: format!("missing columns: {}", missing.join(", ")),
        });
    }

    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        return Ok(SchemaCheck::Incompatible {
            reason: format!("schema version {} (expected {})", version, SCHEMA_VERSION),
        });
    }

    Ok(SchemaCheck::Valid)
}

/// Delete a database file and its journal artifacts
fn remove_database_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let file = PathBuf::from(file);

        match std::fs::remove_file(&file) {
            Ok(()) => debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::SchemaMigration {
                    path: file,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// L2 Cache configuration
#[derive(Debug, Clone)]
pub struct L2Config {
    /// Cache directory path
    pub cache_dir: PathBuf,
    /// Maximum bytes of stored values
    pub size_limit_bytes: u64,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache/europmc"),
            size_limit_bytes: DEFAULT_SIZE_LIMIT_MB * 1024 * 1024,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// L2 Cache - SQLite-backed durable tier
pub struct DiskStore {
    /// Connection (None after close)
    conn: Mutex<Option<Connection>>,
    /// Database path
    path: PathBuf,
    /// Configuration
    config: L2Config,
    /// Entry count
    entries: AtomicU64,
    /// Bytes of stored values
    size_bytes: AtomicU64,
    /// Capacity eviction count
    evictions: AtomicU64,
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("path", &self.path)
            .field("entries", &self.entries.load(Ordering::Relaxed))
            .finish()
    }
}

impl DiskStore {
    /// Open (or create) the store, migrating an incompatible database
    pub fn open(config: L2Config) -> Result<Self> {
        let _barrier = OPEN_LOCK.lock();

        std::fs::create_dir_all(&config.cache_dir)?;
        let path = config.cache_dir.join(DB_FILE_NAME);

        if path.exists() {
            let check = Self::probe(&path).unwrap_or_else(|e| SchemaCheck::Incompatible {
                reason: format!("unreadable database: {}", e),
            });

            if let SchemaCheck::Incompatible { reason } = check {
                warn!(
                    "Discarding incompatible cache database {}: {}",
                    path.display(),
                    reason
                );
                remove_database_files(&path)?;
                info!("Cache database migrated to schema version {}", SCHEMA_VERSION);
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(CREATE_SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
            path,
            config,
            entries: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        store.with_conn(|conn| store.refresh_totals(conn))?;

        info!(
            "Opened L2 cache at {} ({} entries)",
            store.path.display(),
            store.entries.load(Ordering::Relaxed)
        );
        Ok(store)
    }

    /// Validate an existing database file without modifying it
    pub fn probe(path: &Path) -> Result<SchemaCheck> {
        let conn = Connection::open(path)?;
        let check = check_schema(&conn);
        drop(conn);
        check
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration
    pub fn config(&self) -> &L2Config {
        &self.config
    }

    /// Bytes used and the configured limit
    pub fn disk_usage(&self) -> (u64, u64) {
        (
            self.size_bytes.load(Ordering::Relaxed),
            self.config.size_limit_bytes,
        )
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::StoreClosed(CacheTier::L2.to_string()))?;
        f(conn)
    }

    /// Recount entries and bytes after a bulk delete
    fn refresh_totals(&self, conn: &Connection) -> Result<()> {
        let (entries, size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        self.entries.store(entries.max(0) as u64, Ordering::Relaxed);
        self.size_bytes.store(size.max(0) as u64, Ordering::Relaxed);
        Ok(())
    }

    fn existing_size(conn: &Connection, key: &str) -> Result<Option<u64>> {
        let size: Option<i64> = conn
            .query_row(
                "SELECT size FROM cache_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(size.map(|s| s.max(0) as u64))
    }

    /// Bring the store back under its size limit
    fn cull(&self, conn: &Connection, keep: &str) -> Result<()> {
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        self.refresh_totals(conn)?;
        if removed > 0 {
            debug!("Culled {} expired L2 entries", removed);
        }

        while self.size_bytes.load(Ordering::Relaxed) > self.config.size_limit_bytes {
            let mut stmt = conn.prepare_cached(
                "SELECT key, size FROM cache_entries WHERE key != ?1
                 ORDER BY last_access ASC LIMIT ?2",
            )?;
            let victims: Vec<(String, i64)> = stmt
                .query_map(params![keep, CULL_BATCH], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;

            if victims.is_empty() {
                break;
            }

            for (key, size) in victims {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                self.entries.fetch_sub(1, Ordering::Relaxed);
                self.size_bytes.fetch_sub(size.max(0) as u64, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);

                if self.size_bytes.load(Ordering::Relaxed) <= self.config.size_limit_bytes {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl TierStore for DiskStore {
    fn tier(&self) -> CacheTier {
        CacheTier::L2
    }

    fn lookup(&self, key: &str) -> Result<Option<StoredValue>> {
        self.with_conn(|conn| {
            let row: Option<(Vec<u8>, Option<i64>, Option<String>)> = conn
                .query_row(
                    "SELECT value, expires_at, tag FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((value, expires_at, tag)) = row else {
                return Ok(None);
            };

            let now = now_millis();
            if matches!(expires_at, Some(expires_at) if now >= expires_at) {
                let size = Self::existing_size(conn, key)?;
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                if let Some(size) = size {
                    self.entries.fetch_sub(1, Ordering::Relaxed);
                    self.size_bytes.fetch_sub(size, Ordering::Relaxed);
                }
                return Ok(None);
            }

            conn.execute(
                "UPDATE cache_entries SET last_access = ?1 WHERE key = ?2",
                params![now, key],
            )?;
            Ok(Some(StoredValue {
                value: Bytes::from(value),
                ttl: expires_at.map(|at| Duration::from_millis((at - now).max(0) as u64)),
                tag,
            }))
        })
    }

    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> Result<bool> {
        let size = value.len() as u64;
        if size > self.config.size_limit_bytes {
            warn!(
                "Value for {} ({} bytes) exceeds L2 size limit, not stored",
                key, size
            );
            return Ok(false);
        }

        let now = now_millis();
        let expires_at = expiry_from_ttl(ttl);

        self.with_conn(|conn| {
            let previous = Self::existing_size(conn, key)?;
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (key, value, tag, created_at, expires_at, last_access, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![key, value.as_ref(), tag, now, expires_at, now, size as i64],
            )?;

            match previous {
                Some(old) => {
                    self.size_bytes.fetch_sub(old, Ordering::Relaxed);
                }
                None => {
                    self.entries.fetch_add(1, Ordering::Relaxed);
                }
            }
            self.size_bytes.fetch_add(size, Ordering::Relaxed);

            if self.size_bytes.load(Ordering::Relaxed) > self.config.size_limit_bytes {
                self.cull(conn, key)?;
            }
            Ok(true)
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let Some(size) = Self::existing_size(conn, key)? else {
                return Ok(false);
            };
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            self.entries.fetch_sub(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(size, Ordering::Relaxed);
            Ok(true)
        })
    }

    fn clear(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            self.entries.store(0, Ordering::Relaxed);
            self.size_bytes.store(0, Ordering::Relaxed);
            Ok(true)
        })
    }

    fn evict(&self, tag: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM cache_entries WHERE tag = ?1", params![tag])?;
            self.refresh_totals(conn)?;
            Ok(removed)
        })
    }

    fn purge_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )?;
            self.refresh_totals(conn)?;
            Ok(removed)
        })
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        // Fold the WAL back into the main file so the directory is self-contained
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()?;
        conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
        info!("Closed L2 cache at {}", self.path.display());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
