use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use propbot_core::Channel;
use propbot_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    channels: Vec<Channel>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channels: Vec<Channel>,
    pub database: HealthCheck,
    pub sessions: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, channels: Vec<Channel>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, channels })
}

/// Readiness is decided by the database alone; the session count is informational.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let sessions = if ready {
        live_sessions_check(&state.db_pool).await
    } else {
        HealthCheck { status: "unknown", detail: "database unavailable".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        channels: state.channels.clone(),
        database,
        sessions,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn live_sessions_check(pool: &DbPool) -> HealthCheck {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_session WHERE expires_at > ?")
        .bind(now)
        .fetch_one(pool)
        .await
    {
        Ok(count) => HealthCheck { status: "ready", detail: format!("{count} live sessions") },
        Err(error) => {
            HealthCheck { status: "unknown", detail: format!("session count failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::{extract::State, http::StatusCode, Json};
    use propbot_core::Channel;
    use propbot_db::{connect_with_settings, migrations};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState {
            db_pool: pool.clone(),
            channels: vec![Channel::Telegram],
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.sessions.detail, "0 live sessions");
        assert_eq!(payload.channels, vec![Channel::Telegram]);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, channels: Vec::new() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.sessions.status, "unknown");
    }

    #[tokio::test]
    async fn health_route_serializes_channels_in_snake_case() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let app = router(pool.clone(), vec![Channel::Telegram, Channel::Whatsapp]);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["channels"], serde_json::json!(["telegram", "whatsapp"]));

        pool.close().await;
    }
}
