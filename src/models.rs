use crate::duration::EncodedDuration;
use serde::{Deserialize, Serialize};

/// Статус задачи - строгий allow-list
/// Валидация статусов происходит ровно один раз, на границе engine
/// (раньше строки проверялись в каждом call site - источник багов)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        }
    }

    /// Распарсить статус из строки (allow-list)
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("Unknown task status: '{}'", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Запись рабочей сессии (единица ledger)
/// Сессия "активна" пока end_time отсутствует
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    /// Unix timestamp (миллисекунды)
    pub start_time: i64,
    /// Отсутствует пока сессия открыта
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Устанавливается ровно один раз, при финализации
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<EncodedDuration>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Внешняя задача - engine читает/пишет только status и actual_time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Накопленное время по всем финализированным сессиям
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<EncodedDuration>,
}
