use crate::auth::AuthManager;
use crate::duration::EncodedDuration;
use crate::models::{SessionRecord, TaskStatus};
use crate::repo::{RepoError, SessionRepository, TaskStatusRepository};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Конфигурация remote API (api_base_url, таймауты, app_version)
#[derive(Clone)]
pub struct RemoteConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://app.taskclock.dev/api".to_string(),
            http_timeout_secs: 120,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// Проверка online статуса через легковесный HTTP запрос
pub async fn check_online_status() -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client
        .get("https://www.cloudflare.com/cdn-cgi/trace")
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => {
            match client
                .get("https://www.google.com/generate_204")
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(response) => response.status().is_success() || response.status().as_u16() == 204,
                Err(_) => false,
            }
        }
    }
}

/// HTTP-реализация SessionRepository и TaskStatusRepository
/// PRODUCTION: один reqwest::Client с таймаутом, Bearer auth через AuthManager,
/// refresh-once на 401, idempotency key на создании сессии
pub struct RemoteApi {
    pub(crate) api_base_url: String,
    pub(crate) auth_manager: Arc<AuthManager>,
    pub(crate) client: reqwest::Client,
    pub(crate) app_version: String,
}

/// Описание одного API-запроса; тело пересобирается на каждой попытке
struct ApiRequest {
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
    idempotency_key: Option<String>,
}

impl RemoteApi {
    pub fn new(config: RemoteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            auth_manager: Arc::new(AuthManager::new(config.api_base_url.clone())),
            api_base_url: config.api_base_url,
            client,
            app_version: config.app_version,
        }
    }

    pub fn auth_manager(&self) -> Arc<AuthManager> {
        self.auth_manager.clone()
    }

    fn build(&self, req: &ApiRequest, access_token: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(req.method.clone(), &req.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", access_token))
            .header("X-App-Version", &self.app_version);
        if let Some(key) = &req.idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        builder
    }

    /// Отправить запрос с авторизацией
    /// Автоматически обновляет токен при 401 ошибке (только одна попытка refresh)
    async fn send(&self, req: ApiRequest) -> Result<reqwest::Response, RepoError> {
        let mut access_token = self.auth_manager.get_access_token().await?;
        let mut retry_with_refresh = true;

        loop {
            let response = self
                .build(&req, &access_token)
                .send()
                .await
                .map_err(|e| RepoError::Network(e.to_string()))?;

            let status = response.status();

            // Если 401 и есть refresh_token, обновляем токен
            if status == StatusCode::UNAUTHORIZED && retry_with_refresh {
                if let Some(refresh) = self.auth_manager.get_refresh_token().await {
                    info!("[REMOTE] Token expired (401), refreshing for {}", req.url);

                    match self.auth_manager.refresh_token(&refresh).await {
                        Ok(token_result) => {
                            access_token = token_result.access_token.clone();
                            self.auth_manager
                                .set_tokens(
                                    Some(token_result.access_token),
                                    token_result.refresh_token.or(Some(refresh)),
                                )
                                .await;
                            retry_with_refresh = false; // Только одна попытка обновления
                            continue; // Повторяем запрос с новым токеном
                        }
                        Err(e) => {
                            warn!("[REMOTE] Failed to refresh token: {}", e);
                            return Err(e);
                        }
                    }
                } else {
                    return Err(RepoError::Auth(
                        "Token expired (401) but no refresh token available".into(),
                    ));
                }
            }

            return Ok(response);
        }
    }

    /// Разобрать неуспешный ответ в RepoError
    /// State-already-achieved (400 с известным текстом) становится Conflict -
    /// вызывающий код трактует его как идемпотентный успех
    async fn error_from_response(response: reqwest::Response) -> RepoError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status == 400 || status == 409 {
            if body.contains("already finalized")
                || body.contains("already stopped")
                || body.contains("already has an active session")
            {
                return RepoError::Conflict(body);
            }
        }
        let message = if body.is_empty() {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string()
        } else {
            body
        };
        RepoError::Http { status, message }
    }
}

#[async_trait]
impl SessionRepository for RemoteApi {
    async fn create_open_session(
        &self,
        task_id: &str,
        user_id: &str,
        start_time_ms: i64,
    ) -> Result<SessionRecord, RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::POST,
                url: format!("{}/sessions", self.api_base_url),
                body: Some(serde_json::json!({
                    "taskId": task_id,
                    "userId": user_id,
                    "startTime": start_time_ms,
                })),
                // Ровно одна сессия на сервере даже при сетевых ретраях
                idempotency_key: Some(uuid::Uuid::new_v4().to_string()),
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<SessionRecord>()
            .await
            .map_err(|e| RepoError::Parse(format!("Failed to parse session record: {}", e)))
    }

    async fn get_active_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionRecord>, RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::GET,
                url: format!(
                    "{}/sessions/active?userId={}",
                    self.api_base_url, user_id
                ),
                body: None,
                idempotency_key: None,
            })
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<SessionRecord>()
                .await
                .map(Some)
                .map_err(|e| RepoError::Parse(format!("Failed to parse active session: {}", e))),
            _ => Err(Self::error_from_response(response).await),
        }
    }

    async fn finalize_session(
        &self,
        id: &str,
        end_time_ms: i64,
        duration: &EncodedDuration,
    ) -> Result<(), RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::PUT,
                url: format!("{}/sessions/{}/finalize", self.api_base_url, id),
                body: Some(serde_json::json!({
                    "endTime": end_time_ms,
                    "duration": duration.as_str(),
                })),
                idempotency_key: None,
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    async fn list_finalized_sessions(
        &self,
        task_id: &str,
    ) -> Result<Vec<SessionRecord>, RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::GET,
                url: format!(
                    "{}/sessions?taskId={}&finalized=true",
                    self.api_base_url, task_id
                ),
                body: None,
                idempotency_key: None,
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<Vec<SessionRecord>>()
            .await
            .map_err(|e| RepoError::Parse(format!("Failed to parse session list: {}", e)))
    }
}

#[async_trait]
impl TaskStatusRepository for RemoteApi {
    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::PUT,
                url: format!("{}/tasks/{}/status", self.api_base_url, task_id),
                body: Some(serde_json::json!({ "status": status.as_str() })),
                idempotency_key: None,
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    async fn set_actual_time(
        &self,
        task_id: &str,
        actual_time: &EncodedDuration,
    ) -> Result<(), RepoError> {
        let response = self
            .send(ApiRequest {
                method: Method::PUT,
                url: format!("{}/tasks/{}/actual-time", self.api_base_url, task_id),
                body: Some(serde_json::json!({ "actualTime": actual_time.as_str() })),
                idempotency_key: None,
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}
