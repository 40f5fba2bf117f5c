use serde::{Deserialize, Serialize};
use std::fmt;

/// Длительность в формате хранения: "HH:MM:SS.mmm"
/// Часы не ограничены 24 ("137:02:05.250" - валидно)
/// Формат round-trip точен до миллисекунды: decode(encode(x)) == x
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedDuration(String);

impl EncodedDuration {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Канонический ноль
    pub fn zero() -> Self {
        encode(0)
    }

    /// Обернуть сырую строку без валидации
    /// Внешний store может отдать что угодно - валидность проверяет decode
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for EncodedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationParseError(pub String);

impl fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid encoded duration: {}", self.0)
    }
}

impl std::error::Error for DurationParseError {}

/// Закодировать миллисекунды в формат хранения
pub fn encode(ms: u64) -> EncodedDuration {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    EncodedDuration(format!(
        "{:02}:{:02}:{:02}.{:03}",
        hours, minutes, seconds, millis
    ))
}

/// Раскодировать формат хранения обратно в миллисекунды
/// Некорректный ввод - ошибка, не panic (данные приходят из внешнего store)
pub fn decode(encoded: &EncodedDuration) -> Result<u64, DurationParseError> {
    let s = encoded.as_str();
    let (hms, millis_str) = match s.split_once('.') {
        Some((hms, millis)) => (hms, millis),
        None => (s, "000"), // старый формат без миллисекунд
    };

    let mut parts = hms.split(':');
    let (h, m, sec) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(sec), None) => (h, m, sec),
        _ => return Err(DurationParseError(s.to_string())),
    };

    let h: u64 = h
        .parse()
        .map_err(|_| DurationParseError(s.to_string()))?;
    let m: u64 = m
        .parse()
        .map_err(|_| DurationParseError(s.to_string()))?;
    let sec: u64 = sec
        .parse()
        .map_err(|_| DurationParseError(s.to_string()))?;
    if millis_str.len() != 3 {
        return Err(DurationParseError(s.to_string()));
    }
    let millis: u64 = millis_str
        .parse()
        .map_err(|_| DurationParseError(s.to_string()))?;
    if m >= 60 || sec >= 60 {
        return Err(DurationParseError(s.to_string()));
    }

    Ok(h * 3_600_000 + m * 60_000 + sec * 1000 + millis)
}

/// Отформатировать как "HH:MM:SS" (миллисекунды отбрасываются)
pub fn format_hms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Компактная форма: "1h 23m" / "23m 5s" / "42s" (часы опускаются если 0)
pub fn format_compact(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
