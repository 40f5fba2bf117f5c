use crate::database::LocalStore;
use crate::duration::format_hms;
use crate::engine::{now_ms, TimerState, TimerStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Максимальный разумный разрыв при восстановлении running-состояния
/// Больше - вероятен clock skew или системная ошибка, не добавляем elapsed
const MAX_REASONABLE_GAP_MS: i64 = 24 * 60 * 60 * 1000;

/// Частичное обновление TimerState
/// Двойной Option: внешний - "менять ли поле", внутренний - новое значение
#[derive(Debug, Default, Clone)]
pub struct TimerStatePatch {
    pub status: Option<TimerStatus>,
    pub task_id: Option<Option<String>>,
    pub session_id: Option<Option<String>>,
    pub start_time_ms: Option<Option<i64>>,
    pub elapsed_ms: Option<u64>,
    pub previously_elapsed_ms: Option<u64>,
}

/// Timer State Store - владеет единственным значением TimerState
/// Каждая мутация проходит через один lock, display_time пересчитывается
/// из previously_elapsed + elapsed и никогда не задается вручную;
/// полный снапшот персистится в LocalStore под фиксированным ключом
pub struct TimerStateStore {
    state: Mutex<TimerState>,
    local: Option<Arc<dyn LocalStore>>,
    key: String,
}

impl TimerStateStore {
    pub fn new(local: Option<Arc<dyn LocalStore>>, key: String) -> Self {
        let store = Self {
            state: Mutex::new(TimerState::default()),
            local,
            key,
        };
        store.restore();
        store
    }

    /// Lock с восстановлением после poison: короткие критические секции
    /// не оставляют состояние полуизмененным, продолжаем с тем, что есть
    fn lock_state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> TimerState {
        self.lock_state().clone()
    }

    /// Смержить patch в текущее состояние, пересчитать display_time,
    /// сохранить полный снапшот и вернуть новое состояние
    /// Ошибка персистентности не пропагируется - in-memory состояние
    /// остается авторитетным до конца процесса
    pub fn patch(&self, patch: TimerStatePatch) -> TimerState {
        let mut state = self.lock_state();

        if let Some(status) = patch.status {
            state.status = status;
        }
        if let Some(task_id) = patch.task_id {
            state.task_id = task_id;
        }
        if let Some(session_id) = patch.session_id {
            state.session_id = session_id;
        }
        if let Some(start_time_ms) = patch.start_time_ms {
            state.start_time_ms = start_time_ms;
        }
        if let Some(elapsed_ms) = patch.elapsed_ms {
            state.elapsed_ms = elapsed_ms;
        }
        if let Some(previously_elapsed_ms) = patch.previously_elapsed_ms {
            state.previously_elapsed_ms = previously_elapsed_ms;
        }

        state.display_time = format_hms(
            state
                .previously_elapsed_ms
                .saturating_add(state.elapsed_ms),
        );

        self.persist_locked(&state);
        state.clone()
    }

    /// Тик: пересчитать elapsed от абсолютного start_time под тем же lock,
    /// что и мутации - тик не может записать состояние из устаревшего снапшота
    /// None когда таймер не Running (сигнал планировщику остановиться)
    pub fn tick(&self, now_ms: i64) -> Option<TimerState> {
        let mut state = self.lock_state();
        if state.status != TimerStatus::Running {
            return None;
        }
        let start = state.start_time_ms?;
        state.elapsed_ms = now_ms.saturating_sub(start).max(0) as u64;
        state.display_time = format_hms(
            state
                .previously_elapsed_ms
                .saturating_add(state.elapsed_ms),
        );
        self.persist_locked(&state);
        Some(state.clone())
    }

    /// Сбросить в дефолт (локальная очистка, без remote-эффектов)
    pub fn replace(&self, new_state: TimerState) -> TimerState {
        let mut state = self.lock_state();
        *state = new_state;
        state.display_time = format_hms(
            state
                .previously_elapsed_ms
                .saturating_add(state.elapsed_ms),
        );
        self.persist_locked(&state);
        state.clone()
    }

    /// Явное сохранение текущего состояния (panic hook, shutdown)
    pub fn persist_now(&self) {
        let state = self.lock_state();
        self.persist_locked(&state);
    }

    fn persist_locked(&self, state: &TimerState) {
        let local = match &self.local {
            Some(local) => local,
            None => return, // Нет store - пропускаем
        };
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[STORE] Failed to serialize timer state: {}", e);
                return;
            }
        };
        if let Err(e) = local.save(&self.key, &bytes) {
            // Деградация: store вернется к дефолту при следующей загрузке
            warn!("[STORE] Failed to persist timer state: {}", e);
        }
    }

    /// Восстановить состояние при старте процесса
    /// GUARD: НИКОГДА не крашиться - отсутствие и битый контент дают дефолт
    fn restore(&self) {
        let local = match &self.local {
            Some(local) => local,
            None => {
                info!("[RECOVERY] No local store available, starting with default state");
                return;
            }
        };

        let bytes = match local.load(&self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                // Первый запуск - это нормально
                info!("[RECOVERY] No saved state found, starting fresh");
                return;
            }
            Err(e) => {
                error!(
                    "[RECOVERY] Failed to load state: {}. Starting with default state.",
                    e
                );
                return;
            }
        };

        let mut loaded: TimerState = match serde_json::from_slice(&bytes) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    "[RECOVERY] Corrupt saved state ({}), starting with default state",
                    e
                );
                return;
            }
        };

        if loaded.status == TimerStatus::Running {
            // start_time - абсолютный timestamp, elapsed пересчитывается от него
            // (не интерпретируется как offset)
            match loaded.start_time_ms {
                Some(start) => {
                    let now = now_ms();
                    let gap = now - start;
                    if gap < 0 || gap > MAX_REASONABLE_GAP_MS {
                        // Clock skew или нереалистичный разрыв: не надуваем elapsed,
                        // демотируем в Paused - reconciler подхватит открытую сессию
                        warn!(
                            "[RECOVERY] Unreasonable gap since saved start ({} ms), demoting to paused",
                            gap
                        );
                        loaded.status = TimerStatus::Paused;
                        loaded.start_time_ms = None;
                        loaded.elapsed_ms = 0;
                    } else {
                        loaded.elapsed_ms = gap as u64;
                        info!(
                            "[RECOVERY] Timer was running: start={}, recomputed elapsed={}ms",
                            start, loaded.elapsed_ms
                        );
                    }
                }
                None => {
                    warn!("[RECOVERY] Running state without start_time, demoting to paused");
                    loaded.status = TimerStatus::Paused;
                    loaded.elapsed_ms = 0;
                }
            }
        }

        loaded.display_time = format_hms(
            loaded
                .previously_elapsed_ms
                .saturating_add(loaded.elapsed_ms),
        );

        let mut state = self.lock_state();
        *state = loaded;
        info!(
            "[RECOVERY] Restored state: status={:?}, task={:?}, display={}",
            state.status, state.task_id, state.display_time
        );
    }
}
