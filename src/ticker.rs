use crate::engine::{now_ms, TimerStateStore, TimerStatus};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tick Scheduler - один повторяющийся таймер UI-часов
/// Живет только пока состояние Running; elapsed пересчитывается от
/// абсолютного start_time (timestamp-delta), а не счетчиком тиков -
/// фоновое троттлинг планировщика не накапливает дрейф
pub struct TickScheduler {
    period_ms: u64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickScheduler {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            handle: Mutex::new(None),
        }
    }

    /// Перевзвести таймер после смены статуса
    /// Сначала отменяем существующий (идемпотентно - максимум один живой
    /// таймер), затем запускаем новый только если статус Running
    pub fn rearm(&self, store: Arc<TimerStateStore>) {
        self.cancel();

        if store.get().status != TimerStatus::Running {
            return;
        }

        let period_ms = self.period_ms;
        let handle = tokio::spawn(async move {
            use tokio::time::MissedTickBehavior;

            // Микро-синхронизация: первый тик на границе системной секунды
            // (12:00:00.000, не .500)
            if period_ms == 1000 {
                if let Ok(now) = std::time::SystemTime::now().duration_since(UNIX_EPOCH) {
                    let now_millis = now.as_millis();
                    let next_sec_ms = (now_millis / 1000 + 1) * 1000;
                    let delay_ms = (next_sec_ms - now_millis).min(999);
                    if delay_ms > 0 {
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms as u64))
                            .await;
                    }
                }
            }

            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(period_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                // Store пересчитывает elapsed под своим lock; None - статус
                // сменился между rearm и тиком, выходим
                if store.tick(now_ms()).is_none() {
                    debug!("[TICK] Timer no longer running, tick task exiting");
                    break;
                }
            }
        });

        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
    }

    /// Безусловная отмена (teardown, переход из Running)
    pub fn cancel(&self) {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}
