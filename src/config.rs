use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: HttpServerConfig,
	#[serde(default)]
	pub connectors: Vec<ConnectorConfig>,
}

impl AppConfig {
	/// Layered configuration: compiled-in defaults < `config.toml` < environment.
	pub fn new() -> Result<Self, config::ConfigError> {
		config::Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(config::Environment::with_prefix("WADO_CONNECTOR").separator("__"))
			.build()?
			.try_deserialize()
	}

	/// Resolves the connector that governs a request, by its `Host` header.
	///
	/// A connector with an empty `hosts` list is a catch-all and matches any
	/// request that no other connector claimed.
	pub fn resolve_connector(&self, host: Option<&str>) -> Option<&ConnectorConfig> {
		host.and_then(|host| {
			// The Host header may carry a port, which connector configs omit.
			let hostname = host.rsplit_once(':').map_or(host, |(name, _)| name);
			self.connectors.iter().find(|connector| {
				connector
					.hosts
					.iter()
					.any(|h| h.eq_ignore_ascii_case(hostname) || h.eq_ignore_ascii_case(host))
			})
		})
		.or_else(|| self.connectors.iter().find(|c| c.hosts.is_empty()))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Log level for the default filter directive.
	/// Also configurable at runtime via the RUST_LOG environment variable.
	pub level: String,
	/// Sentry DSN. Sentry is disabled if unset or empty.
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	/// The interface the HTTP server will be listening on.
	pub interface: IpAddr,
	/// The port for the HTTP server.
	pub port: u16,
	/// Request timeout in seconds.
	pub request_timeout: u64,
	pub graceful_shutdown: bool,
	/// Base path to nest all routes under, e.g. `/pacs-connector`.
	#[serde(default = "default_base_path")]
	pub base_path: String,
}

fn default_base_path() -> String {
	String::from("/")
}

/// Per-tenant settings governing authorization and URL construction.
///
/// Shared read-only across concurrently handled requests; request handling
/// never mutates it.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
	/// Archive identifier, embedded into built manifests.
	pub id: String,
	/// `Host` header values this connector answers for. Empty = catch-all.
	#[serde(default)]
	pub hosts: Vec<String>,
	/// Source networks allowed to request manifest builds (CIDR notation).
	/// An empty list allows every source.
	#[serde(default)]
	pub allow_from: Vec<IpNetwork>,
	pub manifest: ManifestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
	/// Absolute URL of the manifest retrieval endpoint.
	pub base_url: Url,
	/// Base URL of the WADO service referenced by built manifests.
	pub wado_url: Url,
	/// Marker parameter requesting the retrieval URL as a plain-text body
	/// instead of a redirect.
	#[serde(default = "default_url_parameter")]
	pub url_parameter: String,
	/// Marker parameter requesting a gzip-compressed manifest.
	#[serde(default = "default_gzip_parameter")]
	pub gzip_parameter: String,
	/// Request parameters recognized as manifest-relevant.
	#[serde(default = "default_accepted_parameters")]
	pub accepted_parameters: Vec<String>,
	/// How long the retrieval endpoint waits for a build to finish, in
	/// milliseconds.
	#[serde(default = "default_build_timeout")]
	pub build_timeout: u64,
}

fn default_url_parameter() -> String {
	String::from("url")
}

fn default_gzip_parameter() -> String {
	String::from("gzip")
}

fn default_accepted_parameters() -> Vec<String> {
	["patientID", "studyUID", "accessionNumber", "seriesUID", "objectUID"]
		.map(String::from)
		.to_vec()
}

const fn default_build_timeout() -> u64 {
	30_000
}
