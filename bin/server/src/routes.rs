//! HTTP handlers for trigger endpoints, the event stream and health.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use rootcause::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::WorkspaceId;
use taskloom_trigger::telegram::SECRET_TOKEN_HEADER;
use taskloom_trigger::webhook::SECRET_HEADER;
use taskloom_trigger::{QueueError, UpdateDisposition};
use tracing::{debug, warn};

/// Liveness probe.
pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

/// Server-sent stream of every broadcast envelope.
///
/// Each event is named after the envelope type and carries the full envelope.
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.broadcaster.stream().map(|envelope| {
        let event = Event::default().event(envelope.kind.as_str());
        Ok(match envelope.to_json() {
            Ok(json) => event.data(json),
            Err(e) => {
                warn!(error = %e, kind = %envelope.kind, "failed to encode envelope");
                event.comment("encode error")
            }
        })
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[derive(Debug, Deserialize)]
pub struct SecretQuery {
    secret: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn queue_unavailable(report: &Report<QueueError>) -> ApiError {
    ApiError::QueueUnavailable {
        reason: report.current_context().to_string(),
    }
}

/// Decodes a webhook body: JSON when it parses, otherwise the raw text.
fn webhook_payload(body: &Bytes) -> JsonValue {
    if body.is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(body).into_owned()))
}

/// Inbound webhook. The secret comes from `X-Webhook-Secret` or `?secret=`.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(query): Query<SecretQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = WorkspaceId::new(workspace_id).map_err(|_| ApiError::Unauthorized)?;
    let secret = header(&headers, SECRET_HEADER).or(query.secret.as_deref());
    if state.webhooks.validate(&workspace_id, secret).await.is_none() {
        debug!(%workspace_id, "webhook credential rejected");
        return Err(ApiError::Unauthorized);
    }

    let job_id = state
        .webhooks
        .accept(&workspace_id, webhook_payload(&body))
        .map_err(|report| queue_unavailable(&report))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "queued": true, "jobId": job_id })),
    ))
}

/// Inbound Telegram update.
///
/// The secret token is checked before the body is looked at.
pub async fn telegram(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let workspace_id = WorkspaceId::new(workspace_id).map_err(|_| ApiError::Unauthorized)?;
    let secret_token = header(&headers, SECRET_TOKEN_HEADER);
    let Some(registration) = state.telegram.validate(&workspace_id, secret_token).await else {
        debug!(%workspace_id, "telegram secret token rejected");
        return Err(ApiError::Unauthorized);
    };

    let update: JsonValue = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
        reason: format!("update is not JSON: {e}"),
    })?;
    let disposition = state
        .telegram
        .accept(&registration, &workspace_id, update)
        .map_err(|report| queue_unavailable(&report))?;

    Ok(match disposition {
        UpdateDisposition::Queued(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "queued": true, "jobId": job_id })),
        )
            .into_response(),
        UpdateDisposition::Filtered(reason) => Json(json!({
            "filtered": true,
            "reason": reason.to_string(),
        }))
        .into_response(),
    })
}

/// Next fire time of a workspace's schedule.
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let workspace_id = WorkspaceId::new(workspace_id).map_err(|_| ApiError::NotFound)?;
    let registration = state
        .scheduled
        .registration(&workspace_id)
        .await
        .ok_or(ApiError::NotFound)?;
    let next = state.scheduled.next_execution_time(&workspace_id).await;

    Ok(Json(json!({
        "workspaceId": workspace_id,
        "nextExecutionTime": next,
        "cronExpression": registration.schedule.expression(),
        "timezone": registration.schedule.timezone().name(),
    })))
}

#[cfg(test)]
mod tests {
    use crate::app::router;
    use crate::inbound::TriggerSettings;
    use crate::state::AppState;
    use crate::state::testing::{state, workspace};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use mockito::Matcher;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Arc;
    use std::time::Duration;
    use taskloom_core::WorkspaceId;
    use taskloom_engine::EnvelopeKind;
    use taskloom_trigger::{ScheduledConfig, TelegramConfig, WebhookConfig};
    use tower::ServiceExt;

    fn id(value: &str) -> WorkspaceId {
        WorkspaceId::new(value).expect("valid")
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = router(Arc::clone(state))
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&body).unwrap_or(JsonValue::Null);
        (status, json)
    }

    fn post(uri: &str, headers: &[(&str, &str)], body: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn webhook_secret(state: &AppState) -> String {
        state.load_workspace(workspace("ws")).await;
        let body = state
            .register_trigger(&id("ws"), TriggerSettings::Webhook(WebhookConfig::default()))
            .await
            .expect("registered");
        body["secret"].as_str().expect("secret").to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = state("http://127.0.0.1:1");
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");

        let (status, body) = call(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn webhook_rejects_bad_secrets() {
        let state = state("http://127.0.0.1:1");
        webhook_secret(&state).await;

        let (status, _) = call(&state, post("/api/webhooks/ws", &[], "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &state,
            post("/api/webhooks/ws", &[("x-webhook-secret", "guess")], "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&state, post("/api/webhooks/unknown?secret=guess", &[], "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepted_webhook_runs_headless() {
        let state = state("http://127.0.0.1:1");
        let secret = webhook_secret(&state).await;
        let mut events = state.broadcaster.subscribe();

        let (status, body) = call(
            &state,
            post(&format!("/api/webhooks/ws?secret={secret}"), &[], "hello"),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queued"], true);
        assert!(body["jobId"].is_string());

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let envelope = events.recv().await.expect("broadcast");
                if envelope.kind == EnvelopeKind::RunCompleted {
                    return envelope;
                }
            }
        })
        .await
        .expect("run completed");
        assert_eq!(completed.data["status"], "completed");
        assert_eq!(
            completed.data["finalOutput"],
            "TRIGGER CONTEXT (WEBHOOK):\nHELLO"
        );
    }

    #[tokio::test]
    async fn telegram_checks_token_then_filters() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/getMe")
            .with_body(r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Loom"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/botTOKEN/deleteWebhook")
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/botTOKEN/setWebhook")
            .match_body(Matcher::PartialJson(json!({
                "url": "https://loom.example/api/telegram/ws"
            })))
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
        let state = state(&server.url());
        state.load_workspace(workspace("ws")).await;
        let registered = state
            .register_trigger(
                &id("ws"),
                TriggerSettings::Telegram(
                    serde_json::from_value::<TelegramConfig>(json!({"botToken": "TOKEN"}))
                        .expect("config"),
                ),
            )
            .await
            .expect("registered");
        let token = registered["secretToken"].as_str().expect("token").to_string();
        let header = "x-telegram-bot-api-secret-token";

        let (status, _) = call(
            &state,
            post("/api/telegram/ws", &[(header, "wrong")], "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let edited = json!({
            "update_id": 7,
            "edited_message": {"message_id": 1, "chat": {"id": 5, "type": "private"}}
        });
        let (status, body) = call(
            &state,
            post("/api/telegram/ws", &[(header, token.as_str())], &edited.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filtered"], true);

        let message = json!({
            "update_id": 8,
            "message": {"message_id": 2, "chat": {"id": 5, "type": "private"}, "text": "hi"}
        });
        let (status, body) = call(
            &state,
            post("/api/telegram/ws", &[(header, token.as_str())], &message.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queued"], true);
    }

    #[tokio::test]
    async fn schedule_lookup_reports_next_fire_time() {
        let state = state("http://127.0.0.1:1");
        let lookup = || {
            Request::builder()
                .uri("/api/schedules/ws")
                .body(Body::empty())
                .expect("request")
        };

        let (status, _) = call(&state, lookup()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.load_workspace(workspace("ws")).await;
        state
            .register_trigger(
                &id("ws"),
                TriggerSettings::Scheduled(ScheduledConfig {
                    cron_expression: "0 9 * * 1-5".to_string(),
                    timezone: "Europe/Berlin".to_string(),
                }),
            )
            .await
            .expect("registered");

        let (status, body) = call(&state, lookup()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cronExpression"], "0 9 * * 1-5");
        assert_eq!(body["timezone"], "Europe/Berlin");
        assert!(body["nextExecutionTime"].is_string());
    }

    #[tokio::test]
    async fn event_stream_is_sse() {
        let state = state("http://127.0.0.1:1");
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/events")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
    }
}
