use crate::AppState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub fn routes() -> Router<AppState> {
	Router::new().route("/", get(index))
}

async fn index() -> impl IntoResponse {
	format!(
		"This server is running wado-connector (v{})",
		env!("CARGO_PKG_VERSION")
	)
}
