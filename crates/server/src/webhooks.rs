use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use propbot_agent::{ConversationRuntime, NotifyError, OperatorNotifier};
use propbot_channels::{telegram, whatsapp, InboundEnvelope};
use propbot_core::{ApplicationError, DomainError, InterfaceError, OperatorId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TELEGRAM_LIVENESS: &str = "telegram webhook ready";
const WHATSAPP_LIVENESS: &str = "whatsapp webhook ready";

/// Counts messages still being handled after their webhook was acknowledged.
#[derive(Clone)]
pub struct InFlight {
    active: Arc<watch::Sender<usize>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self { active: Arc::new(watch::Sender::new(0)) }
    }
}

impl InFlight {
    fn enter(&self) -> InFlightGuard {
        self.active.send_modify(|active| *active += 1);
        InFlightGuard { active: self.active.clone() }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut active = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = active.wait_for(|count| *count == 0).await;
    }
}

struct InFlightGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.send_modify(|active| *active = active.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct WebhookState {
    runtime: Arc<ConversationRuntime>,
    notifier: Arc<OperatorNotifier>,
    internal_token: Option<Arc<SecretString>>,
    in_flight: InFlight,
}

impl WebhookState {
    pub fn new(
        runtime: Arc<ConversationRuntime>,
        notifier: Arc<OperatorNotifier>,
        internal_token: Option<SecretString>,
    ) -> Self {
        Self {
            runtime,
            notifier,
            internal_token: internal_token.map(Arc::new),
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/telegram", post(telegram_webhook).get(|| async { TELEGRAM_LIVENESS }))
        .route("/webhook/whatsapp", post(whatsapp_webhook).get(|| async { WHATSAPP_LIVENESS }))
        .route("/internal/notify", post(internal_notify))
        .with_state(state)
}

/// Telegram retries anything that is not a 2xx, so every update is acknowledged. Handling
/// continues in the background once the update is parsed.
pub async fn telegram_webhook(
    State(state): State<WebhookState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Json<Value> {
    match payload {
        Ok(Json(update)) => match telegram::parse_update(&update) {
            Some(envelope) => dispatch(&state, envelope),
            None => debug!(event_name = "webhook.telegram.ignored", "update carried no chat message"),
        },
        Err(rejection) => warn!(
            event_name = "webhook.telegram.malformed",
            error = %rejection,
            "telegram payload rejected"
        ),
    }
    Json(json!({ "ok": true }))
}

pub async fn whatsapp_webhook(
    State(state): State<WebhookState>,
    payload: Result<Form<HashMap<String, String>>, FormRejection>,
) -> &'static str {
    match payload {
        Ok(Form(form)) => match whatsapp::parse_inbound(&form) {
            Some(envelope) => dispatch(&state, envelope),
            None => debug!(event_name = "webhook.whatsapp.ignored", "form carried no sender"),
        },
        Err(rejection) => warn!(
            event_name = "webhook.whatsapp.malformed",
            error = %rejection,
            "whatsapp payload rejected"
        ),
    }
    "ok"
}

fn dispatch(state: &WebhookState, envelope: InboundEnvelope) {
    let runtime = state.runtime.clone();
    let guard = state.in_flight.enter();
    tokio::spawn(async move {
        let _guard = guard;
        let channel = envelope.message.channel;
        match runtime.handle(envelope).await {
            Ok(outcome) => debug!(
                event_name = "webhook.handled",
                channel = %channel,
                outcome = ?outcome,
                "message handled"
            ),
            Err(error) => warn!(
                event_name = "webhook.failed",
                channel = %channel,
                error = %error,
                "message handling failed"
            ),
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub operator_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub ok: bool,
    pub channel: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn internal_notify(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    authorize(&state, &headers, &correlation_id)?;

    let Json(request) = payload.map_err(|rejection| {
        ApiError(InterfaceError::BadRequest {
            message: rejection.to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;
    if request.operator_id.trim().is_empty() || request.text.trim().is_empty() {
        return Err(ApiError(InterfaceError::BadRequest {
            message: "operator_id and text are required".to_owned(),
            correlation_id,
        }));
    }

    let operator_id = OperatorId(request.operator_id.trim().to_owned());
    match state.notifier.notify(&operator_id, &request.text).await {
        Ok(channel) => {
            info!(
                event_name = "internal.notify.delivered",
                correlation_id = %correlation_id,
                operator_id = %operator_id.0,
                channel = %channel,
                "operator notification delivered"
            );
            Ok(Json(NotifyResponse { ok: true, channel: channel.to_string() }))
        }
        Err(error) => {
            warn!(
                event_name = "internal.notify.failed",
                correlation_id = %correlation_id,
                operator_id = %operator_id.0,
                error = %error,
                "operator notification failed"
            );
            Err(ApiError(notify_error(error).into_interface(correlation_id)))
        }
    }
}

fn notify_error(error: NotifyError) -> ApplicationError {
    match error {
        NotifyError::Unreachable(operator) => ApplicationError::Domain(
            DomainError::InvariantViolation(format!("operator `{operator}` has no linked chat")),
        ),
        NotifyError::Repository(inner) => ApplicationError::Persistence(inner.to_string()),
        NotifyError::Delivery(inner) => ApplicationError::Integration(inner.to_string()),
    }
}

fn authorize(state: &WebhookState, headers: &HeaderMap, correlation_id: &str) -> Result<(), ApiError> {
    let Some(expected) = state.internal_token.as_deref() else {
        return Err(ApiError(InterfaceError::ServiceUnavailable {
            message: "server.internal_token is not configured".to_owned(),
            correlation_id: correlation_id.to_owned(),
        }));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    if presented == Some(expected.expose_secret()) {
        Ok(())
    } else {
        Err(ApiError(InterfaceError::Unauthorized {
            message: "invalid bearer token".to_owned(),
            correlation_id: correlation_id.to_owned(),
        }))
    }
}
