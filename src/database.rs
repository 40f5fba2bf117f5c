use rusqlite::Error::InvalidParameterName;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use chrono::Utc;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation — caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check app data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check app data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Локальное durable-хранилище для состояния таймера
/// Контракт: отсутствие ключа и недоступность store не фатальны,
/// вызывающий код деградирует до in-memory состояния
pub trait LocalStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    fn save(&self, key: &str, value: &[u8]) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// Менеджер базы данных (SQLite-реализация LocalStore)
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    /// PRODUCTION: Обрабатывает случай, когда mutex был poisoned (panic в другом потоке)
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock. \
                 Please restart the application to recover.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup — detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        // GUARD: Включаем WAL mode для лучшей производительности и безопасности
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();

        // PERFORMANCE: Reduce disk I/O during tick-driven persistence (safe with WAL)
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        // Temp tables in RAM
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory SQLite (тесты и запуск без файловой системы)
    pub fn new_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    fn save_value(&self, key: &str, value: &[u8]) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();

        // GUARD: Транзакция для атомарности (защита от partial writes)
        // BEGIN IMMEDIATE гарантирует, что транзакция начнется немедленно
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(|e| {
                log_io_error_if_any("save_value begin", &e);
                error!("[DB] Failed to begin transaction: {}", e);
                e
            })?;

        let result = conn.execute(
            "INSERT INTO app_state (key, value, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET
        value = ?2,
        updated_at = ?3",
            params![key, value, now],
        );

        match result {
            Ok(_) => {
                conn.execute("COMMIT", []).map_err(|e| {
                    log_io_error_if_any("save_value commit", &e);
                    error!("[DB] Failed to commit transaction: {}", e);
                    let _ = conn.execute("ROLLBACK", []);
                    e
                })?;
                Ok(())
            }
            Err(e) => {
                log_io_error_if_any("save_value", &e);
                error!("[DB] Failed to save '{}': {}. Rolling back transaction.", key, e);
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    fn load_value(&self, key: &str) -> SqliteResult<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM app_state WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn remove_value(&self, key: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM app_state WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl LocalStore for Database {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        self.load_value(key)
            .map_err(|e| format!("Failed to load '{}': {}", key, e))
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), String> {
        self.save_value(key, value)
            .map_err(|e| format!("Failed to save '{}': {}", key, e))
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        self.remove_value(key)
            .map_err(|e| format!("Failed to remove '{}': {}", key, e))
    }
}

/// HashMap-хранилище для тестов и деплоев без персистентности
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        let values = self
            .values
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        values.remove(key);
        Ok(())
    }
}
