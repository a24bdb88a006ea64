use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use signoff_core::config::TransportMode;
use signoff_core::transport::bus::DeadLetterLog;
use signoff_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub transport_mode: TransportMode,
    pub dead_letters: DeadLetterLog,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub transport: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        transport: transport_check(&state),
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

// Dead letters are reported but never flip readiness.
fn transport_check(state: &HealthState) -> HealthCheck {
    let detail = match state.transport_mode {
        TransportMode::Call => "synchronous call path".to_string(),
        TransportMode::Queue => {
            format!("queue path, {} dead-lettered message(s)", state.dead_letters.len())
        }
    };
    HealthCheck { status: "ready", detail }
}
