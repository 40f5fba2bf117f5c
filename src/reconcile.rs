use crate::engine::{now_ms, TimerEngine, TimerStatePatch, TimerStatus};
use crate::remote::check_online_status;
use crate::repo::RepoError;
use scopeguard::guard;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl TimerEngine {
    /// Один цикл реконсиляции против backing store
    /// Консервативное правило: только втягиваем remote-истину -
    /// отсутствие активной сессии никогда не останавливает локальный таймер
    /// (локальная сессия, о которой reconciler еще не узнал - не ошибка)
    pub async fn reconcile_once(&self) -> Result<bool, RepoError> {
        // Single-flight: пересекающиеся циклы не накладываются
        if self
            .reconcile_inflight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[RECONCILE] Another cycle already in progress, skipping");
            return Ok(false);
        }
        let inflight = self.reconcile_inflight.clone();
        let _reset = guard((), move |_| {
            inflight.store(false, Ordering::Release);
        });

        if self.store.get().status == TimerStatus::Running {
            // Non-clobber: локальный Running всегда выигрывает
            debug!("[RECONCILE] Local timer running, nothing to adopt");
            return Ok(false);
        }

        // Запрос до захвата transition lock: медленный remote (до полного
        // HTTP-таймаута) не должен держать переходы пользователя в Busy
        let remote = self
            .sessions
            .get_active_session_for_user(&self.config.user_id)
            .await?;

        let record = match remote {
            Some(record) => record,
            None => {
                debug!("[RECONCILE] No active remote session");
                return Ok(false);
            }
        };

        // Сериализация с переходами: принятие не должно заменить состояние
        // посреди pause/stop. Состояние могло измениться за время запроса -
        // перечитываем под lock
        let _transition = self.transition.lock().await;
        let local = self.store.get();
        if local.status == TimerStatus::Running {
            debug!("[RECONCILE] Local timer started during query, nothing to adopt");
            return Ok(false);
        }

        // Активная сессия с другого устройства - принимаем ее
        // previously_elapsed сохраняем только если локальный эпизод той же задачи
        let elapsed_ms = now_ms().saturating_sub(record.start_time).max(0) as u64;
        let same_task = local.task_id.as_deref() == Some(record.task_id.as_str());
        info!(
            "[RECONCILE] Adopting remote session {} for task {} (elapsed={}ms, same_task={})",
            record.id, record.task_id, elapsed_ms, same_task
        );

        self.store.patch(TimerStatePatch {
            status: Some(TimerStatus::Running),
            task_id: Some(Some(record.task_id)),
            session_id: Some(Some(record.id)),
            start_time_ms: Some(Some(record.start_time)),
            elapsed_ms: Some(elapsed_ms),
            previously_elapsed_ms: Some(if same_task {
                local.previously_elapsed_ms
            } else {
                0
            }),
        });
        self.ticker.rearm(self.store.clone());
        Ok(true)
    }
}

/// Периодический цикл реконсиляции
/// Ошибка цикла трактуется как "активной сессии нет" - пропускаем и ждем
/// следующего интервала, ничего фатального
pub(crate) fn spawn_reconcile_loop(engine: Arc<TimerEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Jitter 1-3s: не бомбим API при старте или wake из сна
        let jitter_ms: u64 = rand::random::<u32>() as u64 % 2000 + 1000;
        tokio::time::sleep(tokio::time::Duration::from_millis(jitter_ms)).await;

        info!(
            "[RECONCILE] Starting reconcile loop (every {}s)",
            engine.config.reconcile_interval_secs
        );
        let period = tokio::time::Duration::from_secs(engine.config.reconcile_interval_secs);
        loop {
            tokio::time::sleep(period).await;

            if !check_online_status().await {
                debug!("[RECONCILE] Offline, skipping cycle");
                continue;
            }

            match engine.reconcile_once().await {
                Ok(true) => info!("[RECONCILE] Remote session adopted"),
                Ok(false) => debug!("[RECONCILE] Nothing to reconcile"),
                Err(e) => {
                    warn!(
                        "[RECONCILE] Cycle failed, treating as no active session: {}",
                        e
                    );
                }
            }
        }
    })
}
