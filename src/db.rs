use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cache::CacheBackend;
use crate::errors::{AppError, AppResult};

pub const GEO_CACHE_STORAGE_KEY: &str = "itinerary-geo-cache";

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub struct DatabaseBootstrap {
    pub context: DatabaseContext,
    pub recovered: bool,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseBootstrap> {
    let data_dir = data_dir.as_ref();
    if database_file.trim().is_empty() {
        return Err(AppError::Path(format!(
            "empty database file name under {}",
            data_dir.display()
        )));
    }
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    match establish_context(&db_path) {
        Ok(context) => {
            info!(
                target: "database_bootstrap",
                path = %db_path.display(),
                "storage context established"
            );
            Ok(DatabaseBootstrap {
                context,
                recovered: false,
            })
        }
        Err(AppError::Database(err)) if should_attempt_recovery(&err, &db_path) => {
            warn!(
                target: "database_bootstrap",
                path = %db_path.display(),
                error = %err,
                "database failed to open, recreating an empty store"
            );
            recover_store(&db_path)?;
            let context = establish_context(&db_path)?;
            Ok(DatabaseBootstrap {
                context,
                recovered: true,
            })
        }
        Err(err) => Err(err),
    }
}

fn establish_context(db_path: &Path) -> AppResult<DatabaseContext> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    configure(&connection)?;
    run_migrations(&connection)?;

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn configure(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );
        "#,
    )?;
    Ok(())
}

fn should_attempt_recovery(err: &SqliteError, db_path: &Path) -> bool {
    if !db_path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(
                code.code,
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt
            ) || message
                .as_deref()
                .map(|msg| msg.contains("database disk image is malformed"))
                .unwrap_or(false)
        }
        _ => false,
    }
}

fn recover_store(db_path: &Path) -> AppResult<()> {
    remove_if_exists(db_path)?;
    remove_if_exists(&side_file(db_path, "wal"))?;
    remove_if_exists(&side_file(db_path, "shm"))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn side_file(db_path: &Path, suffix: &str) -> PathBuf {
    let file_name = db_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    db_path.with_file_name(format!("{file_name}-{suffix}"))
}

/// Stores the serialized geo cache as one row of `kv_store`.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
    key: String,
}

impl SqliteBackend {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self::with_key(db, GEO_CACHE_STORAGE_KEY)
    }

    pub fn with_key(db: Arc<Mutex<Connection>>, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }
}

impl CacheBackend for SqliteBackend {
    fn load(&self) -> AppResult<Option<String>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            [self.key.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(AppError::from)
    }

    fn save(&self, blob: &str) -> AppResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, DATETIME('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = DATETIME('now')",
            (self.key.as_str(), blob),
        )?;
        Ok(())
    }
}
