// Durable token storage

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::PersistedToken;

/// Key under which the token blob is stored
pub const TOKEN_KEY: &str = "sb1:oauth:token";

/// Key-value backing for the persisted token blob.
///
/// Each call is all-or-nothing: `save` replaces the whole blob, `load` reads
/// the whole blob or reports an error.
pub trait TokenStore: Send + Sync {
    /// Read the stored blob, `None` if nothing has been saved yet
    fn load(&self) -> Result<Option<PersistedToken>>;

    /// Replace the stored blob
    fn save(&self, token: &PersistedToken) -> Result<()>;
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteTokenStore {
    path: PathBuf,
}

impl SqliteTokenStore {
    /// Open (and create if needed) the store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };

        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create token store directory: {}", parent.display())
                })?;
            }
        }

        let conn = store.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<rusqlite::Connection> {
        rusqlite::Connection::open(&self.path)
            .with_context(|| format!("Failed to open SQLite database: {}", self.path.display()))
    }
}

impl TokenStore for SqliteTokenStore {
    fn load(&self) -> Result<Option<PersistedToken>> {
        use rusqlite::OptionalExtension;

        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load token data from SQLite")?;

        value
            .map(|json| {
                serde_json::from_str(&json).context("Failed to parse token data from SQLite")
            })
            .transpose()
    }

    fn save(&self, token: &PersistedToken) -> Result<()> {
        let json = serde_json::to_string(token).context("Failed to serialize token data")?;

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [TOKEN_KEY, json.as_str()],
        )
        .context("Failed to write token data to SQLite")?;

        Ok(())
    }
}

/// Process-local store, used when no database is configured and in tests
#[derive(Default)]
pub struct MemoryTokenStore {
    blob: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a token blob
    pub fn with_token(token: &PersistedToken) -> Result<Self> {
        let store = Self::new();
        store.save(token)?;
        Ok(store)
    }

    /// Store holding arbitrary raw contents (lets tests plant corrupt data)
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(raw.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<PersistedToken>> {
        let blob = self
            .blob
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))?;

        blob.as_deref()
            .map(|json| serde_json::from_str(json).context("Failed to parse stored token data"))
            .transpose()
    }

    fn save(&self, token: &PersistedToken) -> Result<()> {
        let json = serde_json::to_string(token).context("Failed to serialize token data")?;
        let mut blob = self
            .blob
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))?;
        *blob = Some(json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(access: Option<&str>, refresh: &str) -> PersistedToken {
        PersistedToken {
            access_token: access.map(str::to_string),
            refresh_token: refresh.to_string(),
            expires_at: 1_700_003_600_000,
            saved_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_sqlite_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("tokens.db")).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_sqlite_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("tokens.db")).unwrap();

        let token = blob(Some("AT1"), "RT1");
        store.save(&token).unwrap();
        assert_eq!(store.load().unwrap(), Some(token));
    }

    #[test]
    fn test_sqlite_save_replaces_whole_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("tokens.db")).unwrap();

        store.save(&blob(Some("AT1"), "RT1")).unwrap();
        store.save(&blob(None, "RT2")).unwrap();

        assert_eq!(store.load().unwrap(), Some(blob(None, "RT2")));
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.db");

        SqliteTokenStore::new(&path)
            .unwrap()
            .save(&blob(Some("AT1"), "RT1"))
            .unwrap();

        let reopened = SqliteTokenStore::new(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(blob(Some("AT1"), "RT1")));
    }

    #[test]
    fn test_sqlite_corrupt_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("tokens.db")).unwrap();

        let conn = rusqlite::Connection::open(store.path()).unwrap();
        conn.execute(
            "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)",
            [TOKEN_KEY, "{not json"],
        )
        .unwrap();

        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save(&blob(Some("AT1"), "RT1")).unwrap();
        assert_eq!(store.load().unwrap(), Some(blob(Some("AT1"), "RT1")));

        let corrupt = MemoryTokenStore::with_raw("garbage");
        assert!(corrupt.load().is_err());
    }
}
