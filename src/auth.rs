use crate::repo::RepoError;
use std::sync::Arc;

/// Результат обновления токена
#[derive(Debug)]
pub struct TokenRefreshResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Менеджер аутентификации для HTTP-репозиториев
/// Токены живут только в памяти; получение/логин - забота хоста
pub struct AuthManager {
    api_base_url: String,
    pub access_token: Arc<tokio::sync::RwLock<Option<String>>>,
    pub refresh_token: Arc<tokio::sync::RwLock<Option<String>>>,
}

impl AuthManager {
    pub fn new(api_base_url: String) -> Self {
        Self {
            api_base_url,
            access_token: Arc::new(tokio::sync::RwLock::new(None)),
            refresh_token: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    /// Установить токены (вызывается хостом после логина)
    pub async fn set_tokens(&self, access_token: Option<String>, refresh_token: Option<String>) {
        *self.access_token.write().await = access_token;
        *self.refresh_token.write().await = refresh_token;
    }

    /// Получить access token
    pub async fn get_access_token(&self) -> Result<String, RepoError> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or_else(|| RepoError::Auth("Access token not set. Call set_tokens first.".into()))
    }

    /// Получить refresh token
    pub async fn get_refresh_token(&self) -> Option<String> {
        self.refresh_token.read().await.clone()
    }

    /// Обновить токен через refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResult, RepoError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| RepoError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let url = format!("{}/auth/refresh", self.api_base_url);
        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "refresh_token": refresh_token
            }))
            .send()
            .await
            .map_err(|e| RepoError::Network(format!("Network error during token refresh: {}", e)))?;

        if !response.status().is_success() {
            return Err(RepoError::Auth(format!(
                "Token refresh failed with status: {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RepoError::Parse(format!("Failed to parse refresh response: {}", e)))?;

        let access_token = json["access_token"]
            .as_str()
            .ok_or_else(|| RepoError::Parse("Missing access_token in refresh response".into()))?
            .to_string();

        let refresh_token = json["refresh_token"].as_str().map(|s| s.to_string());

        Ok(TokenRefreshResult {
            access_token,
            refresh_token,
        })
    }
}
