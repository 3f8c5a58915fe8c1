use crate::error::AuthError;
use crate::utils::ParticipantId;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// Issues session tokens for a participant.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, participant_id: &ParticipantId) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// HTTP client for the directory service: `GET <base>/sessions?userId=<id>`.
#[derive(Clone)]
pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn sessions_url(&self) -> String {
        format!("{}/sessions", self.base_url)
    }
}

#[async_trait]
impl TokenProvider for DirectoryClient {
    async fn get_token(&self, participant_id: &ParticipantId) -> Result<String, AuthError> {
        let url = self.sessions_url();
        debug!("Requesting session token from {}", url);

        let response = self
            .http
            .get(&url)
            .query(&[("userId", participant_id.as_str())])
            .send()
            .await
            .map_err(|e| {
                error!("❌ Error connecting to directory: {}", e);
                AuthError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("❌ Directory HTTP error: {}", status);
            return Err(AuthError::ServerError(status.to_string()));
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            error!("❌ Invalid directory response: {}", e);
            AuthError::ServerError(format!("invalid directory response: {}", e))
        })?;

        let token = token_from_response(parsed)?;
        info!("🔑 Session token issued for {}", participant_id);
        Ok(token)
    }
}

fn token_from_response(parsed: TokenResponse) -> Result<String, AuthError> {
    match parsed.token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => {
            error!("❌ No 'token' field in directory response");
            Err(AuthError::NoToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_token_from_response() {
        assert_eq!(
            token_from_response(response(r#"{"token":"abc123","expires":null}"#)).unwrap(),
            "abc123"
        );
        assert_eq!(
            token_from_response(response(r#"{"other":1}"#)),
            Err(AuthError::NoToken)
        );
        assert_eq!(
            token_from_response(response(r#"{"token":""}"#)),
            Err(AuthError::NoToken)
        );
    }

    #[test]
    fn test_sessions_url_normalizes_trailing_slash() {
        let client = DirectoryClient::new("http://127.0.0.1:5003/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.sessions_url(), "http://127.0.0.1:5003/sessions");
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        // Port 9 (discard) on loopback is expected to refuse connections.
        let client = DirectoryClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = client.get_token(&ParticipantId::from("p1")).await;
        assert!(matches!(result, Err(AuthError::Unreachable(_))));
    }
}
