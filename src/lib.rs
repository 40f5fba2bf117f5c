//! taskclock - timer/session engine для task manager
//!
//! Строгая FSM (Idle/Running/Paused) поверх одного TimerState,
//! durable-снапшоты в локальном store, ledger сессий в backing store
//! и периодическая реконсиляция "одна активная сессия на пользователя"
//! между устройствами.

use std::panic;
use std::sync::{Arc, OnceLock};

mod auth;
mod database;
pub mod duration;
mod engine;
mod models;
mod recorder;
mod reconcile;
mod remote;
mod repo;
mod ticker;


pub use auth::{AuthManager, TokenRefreshResult};
pub use database::{Database, LocalStore, MemoryStore};
pub use duration::{DurationParseError, EncodedDuration};
pub use engine::{
    EngineConfig, TimerEngine, TimerError, TimerState, TimerStatePatch, TimerStateStore,
    TimerStatus,
};
pub use models::{SessionRecord, Task, TaskStatus};
pub use recorder::SessionRecorder;
pub use remote::{check_online_status, RemoteApi, RemoteConfig};
pub use repo::{RepoError, SessionRepository, TaskStatusRepository};
pub use ticker::TickScheduler;

/// Panic recovery: persist TimerState when a non-fatal panic occurs.
static PANIC_ENGINE: OnceLock<Arc<TimerEngine>> = OnceLock::new();

/// Установить panic hook, сохраняющий состояние таймера до unwind
/// Повторные вызовы игнорируются (OnceLock)
pub fn install_panic_persist(engine: Arc<TimerEngine>) {
    if PANIC_ENGINE.set(engine).is_err() {
        return;
    }
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        if let Some(engine) = PANIC_ENGINE.get() {
            engine.persist_now();
            eprintln!("[PANIC_RECOVERY] Timer state persisted before panic");
        }
        default_hook(panic_info);
    }));
}
