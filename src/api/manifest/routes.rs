use crate::api::manifest::ManifestRequest;
use crate::builder::url::{self, GZIP_PARAMETER, MANIFEST_ID_PARAMETER};
use crate::builder::{FetchOutcome, ManifestRequestOutcome};
use crate::gate::{self, AuthDecision};
use crate::AppState;
use anyhow::Context;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, EXPIRES, HOST, PRAGMA};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, head};
use axum::Router;
use axum_extra::extract::Query;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, error, instrument};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route(
			"/manifest",
			head(probe_manifest).get(build_manifest).post(build_manifest),
		)
		.route("/RequestManifest", get(fetch_manifest))
}

/// Stamps the anti-caching contract onto a response. Every branch of the
/// manifest endpoints goes through here, success and rejection alike.
fn no_cache(mut response: Response) -> Response {
	let headers = response.headers_mut();
	headers.insert(
		CACHE_CONTROL,
		HeaderValue::from_static("no-cache, no-store, must-revalidate"),
	);
	headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
	// Already expired, for proxies that only speak HTTP/1.0.
	headers.insert(EXPIRES, HeaderValue::from_static("-1"));
	response
}

/// Existence probe. Answers with the manifest media type and performs no
/// build work.
async fn probe_manifest() -> Response {
	no_cache(([(CONTENT_TYPE, mime::TEXT_XML.as_ref())], ()).into_response())
}

#[instrument(skip_all)]
async fn build_manifest(State(state): State<AppState>, request: ManifestRequest) -> Response {
	let response = match dispatch(&state, &request).await {
		Ok(response) => response,
		// Error boundary: log with full detail, surface only the message.
		Err(error) => {
			error!("Building manifest failed: {error:#}");
			(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
		}
	};
	no_cache(response)
}

async fn dispatch(state: &AppState, request: &ManifestRequest) -> anyhow::Result<Response> {
	let connector = state
		.config
		.resolve_connector(request.host.as_deref())
		.context("no connector is configured for this request")?;

	// Admission is checked before any build work starts.
	let outcome = match gate::authorize(request.source, connector) {
		AuthDecision::Denied { status, reason } => ManifestRequestOutcome::Denied { status, reason },
		AuthDecision::Allowed => {
			state
				.coordinator
				.start_build(&request.parameters, connector)
				.await
		}
	};

	let response = match outcome {
		ManifestRequestOutcome::NoParametersGiven => (
			StatusCode::NO_CONTENT,
			[(
				"Cause",
				"No allowed parameters have been given to build a manifest",
			)],
		)
			.into_response(),
		ManifestRequestOutcome::Denied { status, reason } => {
			debug!("Denied manifest request from {:?}: {reason}", request.source);
			// No body: nothing beyond the status is observable.
			status.into_response()
		}
		ManifestRequestOutcome::Built(handle) => {
			let gzip = request.has_parameter(&connector.manifest.gzip_parameter);
			let manifest_url = url::encode(handle, connector, gzip);

			if request.has_parameter(&connector.manifest.url_parameter) {
				(
					StatusCode::OK,
					[(CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())],
					manifest_url.to_string(),
				)
					.into_response()
			} else {
				Redirect::to(manifest_url.as_str()).into_response()
			}
		}
		ManifestRequestOutcome::Failed(error) => return Err(error.into()),
	};

	Ok(response)
}

#[derive(Debug, Deserialize)]
struct FetchQuery {
	#[serde(rename = "manifestID")]
	manifest_id: Uuid,
	#[serde(rename = "gzip")]
	gzip: Option<String>,
}

/// Serves a finished manifest document, waiting (bounded) for in-flight
/// builds to complete.
#[instrument(skip_all)]
async fn fetch_manifest(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<FetchQuery>,
) -> Response {
	let host = headers.get(HOST).and_then(|value| value.to_str().ok());
	let wait = state
		.config
		.resolve_connector(host)
		.map_or(Duration::from_secs(30), |connector| {
			Duration::from_millis(connector.manifest.build_timeout)
		});

	let response = match state.registry.wait_ready(query.manifest_id, wait).await {
		FetchOutcome::Unknown => {
			(StatusCode::NOT_FOUND, "Unknown manifest id").into_response()
		}
		FetchOutcome::Pending => (
			StatusCode::GATEWAY_TIMEOUT,
			"The manifest build did not complete in time",
		)
			.into_response(),
		FetchOutcome::Failed(message) => {
			error!("Serving manifest {} failed: {message}", query.manifest_id);
			(StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
		}
		FetchOutcome::Ready(manifest) if query.gzip.is_some() => {
			match compress(manifest.as_bytes()) {
				Ok(body) => (
					[
						(CONTENT_TYPE, mime::TEXT_XML.as_ref()),
						(CONTENT_ENCODING, "gzip"),
					],
					body,
				)
					.into_response(),
				Err(error) => {
					error!("Compressing manifest {} failed: {error:#}", query.manifest_id);
					(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
				}
			}
		}
		FetchOutcome::Ready(manifest) => (
			[(CONTENT_TYPE, mime::TEXT_XML.as_ref())],
			manifest.to_string(),
		)
			.into_response(),
	};

	no_cache(response)
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
	let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
	encoder.write_all(bytes)?;
	encoder.finish()
}
