use crate::duration::EncodedDuration;
use crate::models::{SessionRecord, TaskStatus};
use async_trait::async_trait;
use std::fmt;

/// Ошибки репозиториев (для разбора и логирования)
#[derive(Debug)]
pub enum RepoError {
    Auth(String),
    Network(String),
    Http { status: u16, message: String },
    Parse(String),
    /// Желаемое состояние уже достигнуто на сервере (например, повторная финализация)
    Conflict(String),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::Auth(s) => write!(f, "Auth: {}", s),
            RepoError::Network(s) => write!(f, "Network: {}", s),
            RepoError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            RepoError::Parse(s) => write!(f, "Parse: {}", s),
            RepoError::Conflict(s) => write!(f, "Conflict: {}", s),
        }
    }
}

impl std::error::Error for RepoError {}

/// Хранилище записей сессий (backing store, например hosted database table)
/// Engine - единственный локальный писатель для сессий, которые он открыл
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Создать открытую сессию (без end_time)
    async fn create_open_session(
        &self,
        task_id: &str,
        user_id: &str,
        start_time_ms: i64,
    ) -> Result<SessionRecord, RepoError>;

    /// Активная сессия пользователя, если есть (end_time отсутствует)
    async fn get_active_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionRecord>, RepoError>;

    /// Финализировать сессию: установить end_time и закодированную длительность
    async fn finalize_session(
        &self,
        id: &str,
        end_time_ms: i64,
        duration: &EncodedDuration,
    ) -> Result<(), RepoError>;

    /// Все финализированные сессии задачи (ledger для actual_time)
    async fn list_finalized_sessions(
        &self,
        task_id: &str,
    ) -> Result<Vec<SessionRecord>, RepoError>;
}

/// Статус и накопленное время задачи
#[async_trait]
pub trait TaskStatusRepository: Send + Sync {
    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), RepoError>;

    async fn set_actual_time(
        &self,
        task_id: &str,
        actual_time: &EncodedDuration,
    ) -> Result<(), RepoError>;
}
