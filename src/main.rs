pub(crate) mod api;
pub(crate) mod builder;
pub(crate) mod config;
pub(crate) mod gate;

use crate::builder::xml::XmlManifestSource;
use crate::builder::{BuildCoordinator, ManifestBuildCoordinator, ManifestRegistry};
use crate::config::{AppConfig, HttpServerConfig};
use axum::extract::Request;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace;
use tracing::{error, info, level_filters::LevelFilter, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: &str) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(
					level
						.parse()
						.unwrap_or_else(|_| LevelFilter::INFO.into()),
				)
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

#[derive(Clone)]
pub struct AppState {
	pub config: AppConfig,
	pub coordinator: Arc<dyn BuildCoordinator>,
	pub registry: ManifestRegistry,
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	init_logger(&config.telemetry.level);

	// Manually create the Tokio runtime because the Sentry client needs to be created *before* the
	// Tokio runtime, which prevents us from using the #[tokio::main] macro.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			if let Err(error) = run(config).await {
				error!("Failed to start application due to error: {error}");
			}
		});
	Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	let registry = ManifestRegistry::new();
	let coordinator: Arc<dyn BuildCoordinator> = Arc::new(ManifestBuildCoordinator::new(
		Arc::new(XmlManifestSource),
		registry.clone(),
	));

	let app_state = AppState {
		config: config.clone(),
		coordinator,
		registry,
	};

	let app = api::routes(&config.server.base_path)
		.layer(CorsLayer::permissive())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			tower_http::trace::TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(TimeoutLayer::new(Duration::from_secs(
			config.server.request_timeout,
		)))
		.with_state(app_state);

	let HttpServerConfig {
		interface: host,
		port,
		graceful_shutdown,
		..
	} = config.server;
	let addr = SocketAddr::from((host, port));
	let listener = TcpListener::bind(addr).await?;

	info!("Started manifest connector on http://{addr}");
	let service = app.into_make_service_with_connect_info::<SocketAddr>();
	if graceful_shutdown {
		axum::serve(listener, service)
			.with_graceful_shutdown(shutdown_signal())
			.await?;
	} else {
		axum::serve(listener, service).await?;
	}

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async { signal::ctrl_c().await.unwrap() };

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.unwrap()
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

async fn add_common_headers(req: Request, next: axum::middleware::Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("wado-connector/", env!("CARGO_PKG_VERSION"));
	let headers = response.headers_mut();
	headers.insert("Server", axum::http::HeaderValue::from_static(server_name));
	response
}
