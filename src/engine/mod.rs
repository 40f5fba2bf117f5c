use crate::database::LocalStore;
use crate::recorder::SessionRecorder;
use crate::repo::{RepoError, SessionRepository, TaskStatusRepository};
use crate::ticker::TickScheduler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

mod core;
mod store;

pub use store::{TimerStatePatch, TimerStateStore};

/// Текущее время как Unix timestamp в миллисекундах
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Статус таймера - строгая FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
}

/// Состояние таймера - единственное значение на процесс
/// display_time - производное поле: всегда format_hms(previously_elapsed + elapsed),
/// пересчитывается при каждой мутации в TimerStateStore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerState {
    pub status: TimerStatus,
    /// Задача, по которой идет отсчет (отсутствует в Idle)
    pub task_id: Option<String>,
    /// Открытая запись сессии (отсутствует вне Running)
    pub session_id: Option<String>,
    /// Unix timestamp (мс) начала текущего running-интервала
    pub start_time_ms: Option<i64>,
    /// Миллисекунды текущего running-интервала (пересчитывается каждый тик)
    pub elapsed_ms: u64,
    /// Миллисекунды всех предыдущих интервалов эпизода (переживает pause→resume)
    pub previously_elapsed_ms: u64,
    pub display_time: String,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Idle,
            task_id: None,
            session_id: None,
            start_time_ms: None,
            elapsed_ms: 0,
            previously_elapsed_ms: 0,
            display_time: crate::duration::format_hms(0),
        }
    }
}

/// Ошибки Timer Engine
/// Validation отклоняется до любых мутаций и I/O; Repository означает,
/// что переход прерван и состояние осталось пред-переходным
#[derive(Debug)]
pub enum TimerError {
    Validation(String),
    Busy(String),
    Repository(RepoError),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::Validation(s) => write!(f, "Validation: {}", s),
            TimerError::Busy(s) => write!(f, "Busy: {}", s),
            TimerError::Repository(e) => write!(f, "Repository: {}", e),
        }
    }
}

impl std::error::Error for TimerError {}

impl From<RepoError> for TimerError {
    fn from(e: RepoError) -> Self {
        TimerError::Repository(e)
    }
}

/// Конфигурация engine
#[derive(Clone)]
pub struct EngineConfig {
    pub user_id: String,
    /// Период тика UI-часов
    pub tick_period_ms: u64,
    /// Интервал реконсиляции с backing store
    pub reconcile_interval_secs: u64,
    /// Фиксированный ключ снапшота состояния в LocalStore
    pub state_key: String,
}

impl EngineConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tick_period_ms: 1000,
            reconcile_interval_secs: 30,
            state_key: "timer_state".to_string(),
        }
    }
}

/// Timer Engine - фасад над state store, tick scheduler, session recorder
/// и reconciler. Явный экземпляр (не глобальный singleton) - в тестах
/// может существовать несколько независимых таймеров
pub struct TimerEngine {
    pub(crate) store: Arc<TimerStateStore>,
    pub(crate) recorder: SessionRecorder,
    pub(crate) sessions: Arc<dyn SessionRepository>,
    pub(crate) config: EngineConfig,
    /// Одна in-flight мутация: переходы и реконсиляция сериализуются здесь
    pub(crate) transition: tokio::sync::Mutex<()>,
    pub(crate) ticker: TickScheduler,
    /// Single-flight для циклов реконсиляции
    pub(crate) reconcile_inflight: Arc<AtomicBool>,
    pub(crate) reconcile_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerEngine {
    pub fn new(
        config: EngineConfig,
        sessions: Arc<dyn SessionRepository>,
        tasks: Arc<dyn TaskStatusRepository>,
        local: Option<Arc<dyn LocalStore>>,
    ) -> Arc<Self> {
        let store = Arc::new(TimerStateStore::new(local, config.state_key.clone()));
        let ticker = TickScheduler::new(config.tick_period_ms);
        Arc::new(Self {
            store,
            recorder: SessionRecorder::new(sessions.clone(), tasks),
            sessions,
            config,
            transition: tokio::sync::Mutex::new(()),
            ticker,
            reconcile_inflight: Arc::new(AtomicBool::new(false)),
            reconcile_handle: Mutex::new(None),
        })
    }

    /// Запуск фоновых активностей: тикер (если восстановились в Running),
    /// начальная реконсиляция и периодический цикл
    pub async fn initialize(self: &Arc<Self>) {
        self.ticker.rearm(self.store.clone());

        // Начальная реконсиляция: ошибка - это "активной сессии нет", не фатально
        if let Err(e) = self.reconcile_once().await {
            warn!("[RECONCILE] Initial reconcile failed, will retry on interval: {}", e);
        }

        let handle = crate::reconcile::spawn_reconcile_loop(self.clone());
        let mut slot = self
            .reconcile_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Текущее состояние таймера
    pub fn get_state(&self) -> TimerState {
        self.store.get()
    }

    /// Явно сохранить текущее состояние (shutdown, panic hook)
    pub fn persist_now(&self) {
        self.store.persist_now();
    }

    /// Остановить все таймеры engine; ни один callback не переживает teardown
    pub fn shutdown(&self) {
        self.ticker.cancel();
        let mut slot = self
            .reconcile_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.store.persist_now();
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
