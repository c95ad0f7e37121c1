//! Style preset routes.

use axum::{Json, Router, routing::get};

use crate::api::server::AppState;
use crate::domain::subtitle::{StylePreset, builtin_presets};

pub fn router() -> Router<AppState> {
    Router::new().route("/presets", get(list_presets))
}

async fn list_presets() -> Json<Vec<StylePreset>> {
    Json(builtin_presets())
}
