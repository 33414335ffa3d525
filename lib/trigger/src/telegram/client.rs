//! Minimal Telegram Bot API client.

use crate::error::TelegramError;
use rootcause::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, instrument};

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Identity of a bot, as returned by `getMe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInfo {
    /// Telegram user id of the bot.
    pub id: i64,
    /// Whether the account is a bot.
    #[serde(default)]
    pub is_bot: bool,
    /// Display name.
    pub first_name: String,
    /// `@username` without the `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Client for the Bot API methods triggers need.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base_url: String,
}

impl TelegramClient {
    /// Creates a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Report<TelegramError>> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelegramError::Unreachable {
                reason: format!("HTTP client error: {e}"),
            })?;
        Ok(Self {
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the bot's identity. Doubles as a token check.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or Telegram rejects the token.
    #[instrument(skip_all)]
    pub async fn get_me(&self, bot_token: &str) -> Result<BotInfo, Report<TelegramError>> {
        self.call(bot_token, "getMe", &json!({})).await
    }

    /// Removes any webhook registered for the bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    #[instrument(skip_all)]
    pub async fn delete_webhook(&self, bot_token: &str) -> Result<(), Report<TelegramError>> {
        self.call::<bool>(bot_token, "deleteWebhook", &json!({}))
            .await
            .map(|_| ())
    }

    /// Points the bot's webhook at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or Telegram rejects the URL.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn set_webhook(
        &self,
        bot_token: &str,
        url: &str,
        secret_token: &str,
        allowed_updates: &[String],
    ) -> Result<(), Report<TelegramError>> {
        let body = json!({
            "url": url,
            "secret_token": secret_token,
            "allowed_updates": allowed_updates,
        });
        self.call::<bool>(bot_token, "setWebhook", &body)
            .await
            .map(|_| ())
    }

    /// Sends a text message to `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    #[instrument(skip_all, fields(chat_id = chat_id))]
    pub async fn send_message(
        &self,
        bot_token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), Report<TelegramError>> {
        let body = json!({ "chat_id": chat_id, "text": text });
        self.call::<JsonValue>(bot_token, "sendMessage", &body)
            .await
            .map(|_| ())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        bot_token: &str,
        method: &str,
        body: &JsonValue,
    ) -> Result<T, Report<TelegramError>> {
        let url = format!("{}/bot{bot_token}/{method}", self.api_base_url);
        // Errors are stripped of the URL so the token never reaches logs.
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e.without_url()))?;

        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| match transport_error(e.without_url()) {
                TelegramError::Unreachable { reason } => TelegramError::InvalidResponse {
                    reason: format!("status {status}: {reason}"),
                },
                other => other,
            })?;

        if !parsed.ok {
            return Err(TelegramError::Rejected {
                error_code: parsed.error_code,
                description: parsed
                    .description
                    .unwrap_or_else(|| format!("status {status}")),
            }
            .into());
        }
        debug!(method, "Telegram API call succeeded");
        parsed.result.ok_or_else(|| {
            TelegramError::InvalidResponse {
                reason: format!("{method} returned no result"),
            }
            .into()
        })
    }
}

fn transport_error(error: reqwest::Error) -> TelegramError {
    if error.is_timeout() {
        TelegramError::Timeout
    } else {
        TelegramError::Unreachable {
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> TelegramClient {
        TelegramClient::new(server.url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn get_me_parses_identity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/getMe")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Loom","username":"loom_bot"}}"#,
            )
            .create_async()
            .await;

        let bot = client(&server).get_me("TOKEN").await.expect("identity");

        assert_eq!(bot.id, 42);
        assert_eq!(bot.username.as_deref(), Some("loom_bot"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_webhook_sends_secret_and_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/setWebhook")
            .match_body(Matcher::PartialJson(json!({
                "url": "https://loom.example/api/telegram/ws",
                "secret_token": "s3cret",
                "allowed_updates": ["message"],
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;

        client(&server)
            .set_webhook(
                "TOKEN",
                "https://loom.example/api/telegram/ws",
                "s3cret",
                &["message".to_string()],
            )
            .await
            .expect("webhook set");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejection_keeps_description() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botBAD/getMe")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let err = client(&server).get_me("BAD").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &TelegramError::Rejected {
                error_code: Some(401),
                description: "Unauthorized".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn non_json_answer_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/deleteWebhook")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let err = client(&server).delete_webhook("TOKEN").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TelegramError::InvalidResponse { reason } if reason.contains("502")
        ));
    }

    #[tokio::test]
    async fn unreachable_api_is_distinguished() {
        let client =
            TelegramClient::new("http://127.0.0.1:1", Duration::from_secs(5)).expect("client");
        let err = client.get_me("TOKEN").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TelegramError::Unreachable { reason } if !reason.contains("TOKEN")
        ));
    }
}
