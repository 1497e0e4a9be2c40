use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
	Router::new().route("/connectors", get(all_connectors))
}

/// Lists the connector ids this deployment serves.
async fn all_connectors(State(state): State<AppState>) -> impl IntoResponse {
	Json(serde_json::Value::Array(
		state
			.config
			.connectors
			.iter()
			.map(|connector| serde_json::Value::String(connector.id.clone()))
			.collect::<Vec<serde_json::Value>>(),
	))
}
