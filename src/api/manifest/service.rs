use axum::extract::{ConnectInfo, FromRequest, Request};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};

/// Upper bound for url-encoded form bodies on the manifest endpoint.
const MAX_FORM_BODY: usize = 64 * 1024;

/// Immutable view over the client-supplied data of one manifest request.
///
/// Query parameters and (for POST) url-encoded form parameters are merged
/// into a single list, in request order. The view is never mutated by
/// request handling.
#[derive(Debug, Clone)]
pub struct ManifestRequest {
	pub parameters: Vec<(String, String)>,
	/// `Host` header, used to resolve the governing connector.
	pub host: Option<String>,
	/// Source address as seen by the gate: the first `X-Forwarded-For`
	/// entry if present, the peer address otherwise.
	pub source: Option<IpAddr>,
}

impl ManifestRequest {
	/// Marker parameters toggle on mere presence; their value is ignored.
	pub fn has_parameter(&self, name: &str) -> bool {
		self.parameters.iter().any(|(n, _)| n == name)
	}
}

impl<S> FromRequest<S> for ManifestRequest
where
	S: Send + Sync,
{
	type Rejection = Response;

	async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
		let (parts, body) = req.into_parts();

		let mut parameters: Vec<(String, String)> = parts
			.uri
			.query()
			.map(|query| {
				url::form_urlencoded::parse(query.as_bytes())
					.into_owned()
					.collect()
			})
			.unwrap_or_default();

		if parts.method == Method::POST && is_form(&parts) {
			let bytes = axum::body::to_bytes(body, MAX_FORM_BODY)
				.await
				.map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
			parameters.extend(url::form_urlencoded::parse(&bytes).into_owned());
		}

		let host = parts
			.headers
			.get(HOST)
			.and_then(|value| value.to_str().ok())
			.map(ToOwned::to_owned);

		Ok(Self {
			parameters,
			host,
			source: source_address(&parts),
		})
	}
}

fn is_form(parts: &Parts) -> bool {
	parts
		.headers
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|ct| ct.starts_with(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref()))
}

fn source_address(parts: &Parts) -> Option<IpAddr> {
	let forwarded = parts
		.headers
		.get("x-forwarded-for")
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.split(',').next())
		.and_then(|value| value.trim().parse().ok());

	forwarded.or_else(|| {
		parts
			.extensions
			.get::<ConnectInfo<SocketAddr>>()
			.map(|ConnectInfo(addr)| addr.ip())
	})
}
