//! # routes::account
//!
//! | Method | Path      | Description                                   |
//! |--------|-----------|-----------------------------------------------|
//! | GET    | `/health` | Liveness probe, no auth                       |
//! | GET    | `/api/me` | Caller id, effective plan, `api_user_context` |

use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde_json::{json, Value};

use crate::{auth::AuthUser, error::AppError, state::SharedState};

// ─── GET /health ──────────────────────────────────────────────────────────────

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "ok":      true,
        "service": "holdwise",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── GET /api/me ──────────────────────────────────────────────────────────────

/// Everything the frontend needs to render plan-gated UI in one call.
pub async fn get_me(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    let (plan, context) = tokio::try_join!(
        state.plans.get(user.id),
        state.portfolio.user_context(&user.token),
    )?;

    Ok(Json(json!({
        "user_id": user.id,
        "email":   user.email,
        "plan":    plan,
        "context": context,
    })))
}
