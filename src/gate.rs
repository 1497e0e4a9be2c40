use crate::config::ConnectorConfig;
use axum::http::StatusCode;
use std::net::IpAddr;

/// Outcome of the admission check for a manifest build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
	Allowed,
	/// The denial reason is logged server-side only; callers see the status.
	Denied { status: StatusCode, reason: String },
}

impl AuthDecision {
	fn denied(reason: impl Into<String>) -> Self {
		Self::Denied {
			status: StatusCode::FORBIDDEN,
			reason: reason.into(),
		}
	}
}

/// Decides whether a request source is authorized to build manifests.
///
/// Pure predicate over the connector's `allow_from` networks. An empty list
/// allows every source. Must run before any build work starts so denied
/// requests stay cheap.
pub fn authorize(source: Option<IpAddr>, connector: &ConnectorConfig) -> AuthDecision {
	if connector.allow_from.is_empty() {
		return AuthDecision::Allowed;
	}

	let Some(source) = source else {
		return AuthDecision::denied("source address unknown but an allowlist is configured");
	};

	if connector
		.allow_from
		.iter()
		.any(|network| network.contains(source))
	{
		AuthDecision::Allowed
	} else {
		AuthDecision::denied(format!("source {source} not in allowlist"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ConnectorConfig, ManifestConfig};

	fn connector(allow_from: &[&str]) -> ConnectorConfig {
		ConnectorConfig {
			id: String::from("test"),
			hosts: Vec::new(),
			allow_from: allow_from.iter().map(|s| s.parse().unwrap()).collect(),
			manifest: ManifestConfig {
				base_url: "http://localhost:8080/RequestManifest".parse().unwrap(),
				wado_url: "http://localhost:8080/wado".parse().unwrap(),
				url_parameter: String::from("url"),
				gzip_parameter: String::from("gzip"),
				accepted_parameters: vec![String::from("patientID")],
				build_timeout: 30_000,
			},
		}
	}

	#[test]
	fn empty_allowlist_allows_everyone() {
		let connector = connector(&[]);
		assert_eq!(
			authorize(Some("203.0.113.7".parse().unwrap()), &connector),
			AuthDecision::Allowed
		);
		assert_eq!(authorize(None, &connector), AuthDecision::Allowed);
	}

	#[test]
	fn source_inside_network_is_allowed() {
		let connector = connector(&["10.0.0.0/8", "192.168.1.0/24"]);
		assert_eq!(
			authorize(Some("192.168.1.42".parse().unwrap()), &connector),
			AuthDecision::Allowed
		);
	}

	#[test]
	fn source_outside_networks_is_denied() {
		let connector = connector(&["10.0.0.0/8"]);
		let decision = authorize(Some("203.0.113.7".parse().unwrap()), &connector);
		let AuthDecision::Denied { status, .. } = decision else {
			panic!("expected denial");
		};
		assert_eq!(status, StatusCode::FORBIDDEN);
	}

	#[test]
	fn unknown_source_with_allowlist_is_denied() {
		let connector = connector(&["10.0.0.0/8"]);
		assert!(matches!(
			authorize(None, &connector),
			AuthDecision::Denied { .. }
		));
	}
}
