use crate::duration::{self, EncodedDuration};
use crate::models::SessionRecord;
use crate::repo::{RepoError, SessionRepository, TaskStatusRepository};
use std::sync::Arc;
use tracing::{info, warn};

/// Session Recorder - remote side effects переходов таймера
/// Создает запись сессии на start, финализирует на pause/stop
/// и пересчитывает накопленное время задачи по ledger
pub struct SessionRecorder {
    pub(crate) sessions: Arc<dyn SessionRepository>,
    pub(crate) tasks: Arc<dyn TaskStatusRepository>,
}

impl SessionRecorder {
    pub fn new(sessions: Arc<dyn SessionRepository>, tasks: Arc<dyn TaskStatusRepository>) -> Self {
        Self { sessions, tasks }
    }

    /// Открыть новую сессию
    /// Ошибка пропагируется: start не должен переводить состояние в Running
    pub async fn create_session(
        &self,
        task_id: &str,
        user_id: &str,
        start_time_ms: i64,
    ) -> Result<SessionRecord, RepoError> {
        let record = self
            .sessions
            .create_open_session(task_id, user_id, start_time_ms)
            .await?;
        info!(
            "[SESSION] Opened session {} for task {} (start={})",
            record.id, task_id, start_time_ms
        );
        Ok(record)
    }

    /// Финализировать сессию: end_time + закодированная длительность
    /// Вызывается ровно один раз на сессию; Conflict от сервера означает,
    /// что сессия уже финализирована - не двойной учет, трактуем как успех
    pub async fn finalize_session(
        &self,
        session_id: &str,
        end_time_ms: i64,
        duration_ms: u64,
    ) -> Result<(), RepoError> {
        let encoded = duration::encode(duration_ms);
        match self
            .sessions
            .finalize_session(session_id, end_time_ms, &encoded)
            .await
        {
            Ok(()) => {
                info!(
                    "[SESSION] Finalized session {} (duration={})",
                    session_id, encoded
                );
                Ok(())
            }
            Err(RepoError::Conflict(msg)) => {
                info!(
                    "[SESSION] Session {} already finalized, treating as success: {}",
                    session_id, msg
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Пересчитать actual_time задачи суммой всех финализированных сессий
    /// Источник истины - ledger сессий, не инкрементальный счетчик
    /// (инкремент дрейфует при partial failures)
    pub async fn recompute_task_actual_time(
        &self,
        task_id: &str,
    ) -> Result<EncodedDuration, RepoError> {
        let records = self.sessions.list_finalized_sessions(task_id).await?;

        let mut total_ms: u64 = 0;
        for record in &records {
            match &record.duration {
                Some(encoded) => match duration::decode(encoded) {
                    Ok(ms) => total_ms = total_ms.saturating_add(ms),
                    Err(e) => {
                        // Битая строка в ledger не должна ронять пересчет
                        warn!(
                            "[SESSION] Skipping malformed duration on session {}: {}",
                            record.id, e
                        );
                    }
                },
                None => {
                    warn!(
                        "[SESSION] Finalized session {} without duration, skipping",
                        record.id
                    );
                }
            }
        }

        let encoded_total = duration::encode(total_ms);
        self.tasks.set_actual_time(task_id, &encoded_total).await?;
        info!(
            "[SESSION] Recomputed actual time for task {}: {} over {} sessions",
            task_id,
            encoded_total,
            records.len()
        );
        Ok(encoded_total)
    }
}
