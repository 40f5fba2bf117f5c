use crate::duration::{self, format_compact, format_hms};
use crate::engine::{now_ms, TimerEngine, TimerError, TimerState, TimerStatePatch, TimerStatus};
use crate::models::{Task, TaskStatus};
use tracing::{info, warn};

/// Placeholder для отсутствующей/битой длительности в хранилище
const UNKNOWN_DISPLAY: &str = "--:--:--";

const MAX_TASK_ID_LEN: usize = 64;

impl TimerEngine {
    /// Валидация идентификатора задачи на границе engine
    /// Отклоняется до любых мутаций и I/O - кривой id не открывает сессию
    fn validate_task_id(task_id: &str) -> Result<(), TimerError> {
        if task_id.is_empty() || task_id.len() > MAX_TASK_ID_LEN {
            return Err(TimerError::Validation(format!(
                "Task id must be 1..={} characters, got {}",
                MAX_TASK_ID_LEN,
                task_id.len()
            )));
        }
        if !task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(TimerError::Validation(format!(
                "Task id contains invalid characters: '{}'",
                task_id
            )));
        }
        Ok(())
    }

    /// Одна in-flight мутация: второй конкурентный переход отклоняется,
    /// чтобы два start не открыли две сессии
    fn try_transition(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, TimerError> {
        self.transition
            .try_lock()
            .map_err(|_| TimerError::Busy("Another transition is already in flight".into()))
    }

    /// Переход: Idle → Running (или переключение задачи / resume через start)
    /// Running для другой задачи: сначала pause-эффект текущей - две задачи
    /// не могут быть Running одновременно в одном процессе.
    /// Paused для той же задачи: маршрутизируется в resume, previously_elapsed
    /// сохраняется (start затер бы его)
    pub async fn start(&self, task_id: &str) -> Result<TimerState, TimerError> {
        Self::validate_task_id(task_id)?;
        let _guard = self.try_transition()?;

        let state = self.store.get();
        match state.status {
            TimerStatus::Running => {
                if state.task_id.as_deref() == Some(task_id) {
                    // Недопустимый переход: Running → Running для той же задачи
                    warn!("[FSM] start('{}') while already running it, no-op", task_id);
                    return Ok(state);
                }
                // Переключение задач: закрываем текущий эпизод pause-эффектом
                info!(
                    "[FSM] start('{}') while running '{}', pausing current task first",
                    task_id,
                    state.task_id.as_deref().unwrap_or("?")
                );
                let folded = self.close_open_interval(&state, TaskStatus::Paused).await?;
                // Сессия старой задачи уже финализирована - локально фиксируем
                // Paused до создания новой: при отказе create остаемся в
                // консистентном Paused, а не в Running с закрытой сессией,
                // копящим время мимо ledger
                self.store.patch(TimerStatePatch {
                    status: Some(TimerStatus::Paused),
                    session_id: Some(None),
                    start_time_ms: Some(None),
                    elapsed_ms: Some(0),
                    previously_elapsed_ms: Some(
                        state.previously_elapsed_ms.saturating_add(folded),
                    ),
                    ..Default::default()
                });
                self.ticker.cancel();
                self.begin_episode(task_id).await
            }
            TimerStatus::Paused => {
                if state.task_id.as_deref() == Some(task_id) {
                    info!("[FSM] start('{}') on paused task routed through resume", task_id);
                    self.resume_interval(&state).await
                } else {
                    // Paused-эпизод другой задачи: его сессии уже в ledger,
                    // незакрытого remote-состояния нет - начинаем новый эпизод
                    self.begin_episode(task_id).await
                }
            }
            TimerStatus::Idle => self.begin_episode(task_id).await,
        }
    }

    /// Переход: Running → Paused
    /// Финализирует открытую сессию и складывает интервал в previously_elapsed
    pub async fn pause(&self, status: Option<TaskStatus>) -> Result<TimerState, TimerError> {
        let _guard = self.try_transition()?;
        let state = self.store.get();

        if state.status != TimerStatus::Running || state.session_id.is_none() {
            // Guard не прошел - no-op, состояние не меняется
            warn!(
                "[FSM] pause ignored: status={:?}, session={:?}",
                state.status, state.session_id
            );
            return Ok(state);
        }

        let folded = self
            .close_open_interval(&state, status.unwrap_or(TaskStatus::Paused))
            .await?;

        let new_state = self.store.patch(TimerStatePatch {
            status: Some(TimerStatus::Paused),
            session_id: Some(None),
            start_time_ms: Some(None),
            elapsed_ms: Some(0),
            previously_elapsed_ms: Some(state.previously_elapsed_ms.saturating_add(folded)),
            ..Default::default()
        });
        self.ticker.cancel();
        Ok(new_state)
    }

    /// Переход: Paused → Running
    /// Новая сессия для той же задачи (политика "new session per resume"):
    /// каждый running-интервал 1:1 соответствует одной записи в ledger
    pub async fn resume(&self) -> Result<TimerState, TimerError> {
        let _guard = self.try_transition()?;
        let state = self.store.get();

        if state.status != TimerStatus::Paused || state.task_id.is_none() {
            warn!(
                "[FSM] resume ignored: status={:?}, task={:?}",
                state.status, state.task_id
            );
            return Ok(state);
        }

        self.resume_interval(&state).await
    }

    /// Переход: Running|Paused → Idle
    /// Если Running - сначала pause-эффект (закрыть сессию ровно один раз),
    /// затем финальный статус задачи и полная очистка полей
    pub async fn stop(&self, final_status: Option<TaskStatus>) -> Result<TimerState, TimerError> {
        let _guard = self.try_transition()?;
        let state = self.store.get();

        let task_id = match &state.task_id {
            Some(task_id) => task_id.clone(),
            None => {
                // stop в Idle - идемпотентный no-op: без второй финализации,
                // без дублирующей записи статуса
                warn!("[FSM] stop ignored: already idle");
                return Ok(state);
            }
        };

        let final_status = final_status.unwrap_or(TaskStatus::Completed);
        if state.status == TimerStatus::Running {
            self.close_open_interval(&state, final_status).await?;
        } else if let Err(e) = self.recorder.tasks.set_status(&task_id, final_status).await {
            // Сессии уже финализированы на pause; статус - презентационный эффект
            warn!("[TIMER] Failed to set final status for '{}': {}", task_id, e);
        }

        let new_state = self.store.replace(TimerState::default());
        self.ticker.cancel();
        info!("[TIMER] Stopped episode for task '{}' ({})", task_id, final_status);
        Ok(new_state)
    }

    /// Локальная очистка без remote-эффектов (смена пользователя, логаут)
    pub async fn reset(&self) -> TimerState {
        // Локальная операция без I/O - ждем, а не отклоняем
        let _guard = self.transition.lock().await;
        self.ticker.cancel();
        self.store.replace(TimerState::default())
    }

    /// Открыть новый эпизод: сессия + статус + чистое Running-состояние
    /// Отказ создания сессии пропагируется, состояние не мутируется
    async fn begin_episode(&self, task_id: &str) -> Result<TimerState, TimerError> {
        let start = now_ms();
        let record = self
            .recorder
            .create_session(task_id, &self.config.user_id, start)
            .await?;

        if let Err(e) = self
            .recorder
            .tasks
            .set_status(task_id, TaskStatus::InProgress)
            .await
        {
            warn!("[TIMER] Failed to set task status to in_progress: {}", e);
        }

        let new_state = self.store.patch(TimerStatePatch {
            status: Some(TimerStatus::Running),
            task_id: Some(Some(task_id.to_string())),
            session_id: Some(Some(record.id)),
            start_time_ms: Some(Some(start)),
            elapsed_ms: Some(0),
            previously_elapsed_ms: Some(0),
        });
        self.ticker.rearm(self.store.clone());
        Ok(new_state)
    }

    /// Возобновить paused-эпизод: новая сессия, previously_elapsed не трогаем
    async fn resume_interval(&self, state: &TimerState) -> Result<TimerState, TimerError> {
        let task_id = state
            .task_id
            .clone()
            .ok_or_else(|| TimerError::Validation("Paused state without task id".into()))?;

        let start = now_ms();
        let record = self
            .recorder
            .create_session(&task_id, &self.config.user_id, start)
            .await?;

        if let Err(e) = self
            .recorder
            .tasks
            .set_status(&task_id, TaskStatus::InProgress)
            .await
        {
            warn!("[TIMER] Failed to set task status to in_progress: {}", e);
        }

        let new_state = self.store.patch(TimerStatePatch {
            status: Some(TimerStatus::Running),
            session_id: Some(Some(record.id)),
            start_time_ms: Some(Some(start)),
            elapsed_ms: Some(0),
            ..Default::default()
        });
        self.ticker.rearm(self.store.clone());
        Ok(new_state)
    }

    /// Pause-эффект: финализировать открытую сессию и вернуть ее длительность
    /// Финализация - commit point: отказ до нее прерывает переход;
    /// пересчет actual_time и статус после нее не откатывают ledger
    async fn close_open_interval(
        &self,
        state: &TimerState,
        task_status: TaskStatus,
    ) -> Result<u64, TimerError> {
        let (session_id, start, task_id) =
            match (&state.session_id, state.start_time_ms, &state.task_id) {
                (Some(session_id), Some(start), Some(task_id)) => {
                    (session_id.clone(), start, task_id.clone())
                }
                _ => {
                    warn!("[FSM] close_open_interval without open session, nothing to fold");
                    return Ok(0);
                }
            };

        let end = now_ms();
        let interval_ms = end.saturating_sub(start).max(0) as u64;
        self.recorder
            .finalize_session(&session_id, end, interval_ms)
            .await?;

        if let Err(e) = self.recorder.recompute_task_actual_time(&task_id).await {
            warn!(
                "[TIMER] Failed to recompute actual time for '{}' (ledger intact): {}",
                task_id, e
            );
        }
        if let Err(e) = self.recorder.tasks.set_status(&task_id, task_status).await {
            warn!("[TIMER] Failed to set task status for '{}': {}", task_id, e);
        }

        Ok(interval_ms)
    }

    /// Отформатировать previously_elapsed + elapsed текущего эпизода
    pub fn format_elapsed(&self, compact: bool) -> String {
        let state = self.store.get();
        let total = state.previously_elapsed_ms.saturating_add(state.elapsed_ms);
        if compact {
            format_compact(total)
        } else {
            format_hms(total)
        }
    }

    /// Отображаемое время задачи: live display_time для отслеживаемой,
    /// иначе - сохраненный actual_time через кодек
    /// Отсутствующая/битая длительность дает placeholder, не panic
    pub fn get_display_time(&self, task: &Task) -> String {
        let state = self.store.get();
        if state.task_id.as_deref() == Some(task.id.as_str()) {
            return state.display_time;
        }
        match &task.actual_time {
            Some(encoded) => match duration::decode(encoded) {
                Ok(ms) => format_hms(ms),
                Err(e) => {
                    warn!("[TIMER] Malformed actual_time on task '{}': {}", task.id, e);
                    UNKNOWN_DISPLAY.to_string()
                }
            },
            None => UNKNOWN_DISPLAY.to_string(),
        }
    }
}
