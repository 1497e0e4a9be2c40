use crate::config::ConnectorConfig;
use async_trait::async_trait;
use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::error;
use uuid::Uuid;

pub mod url;
pub mod xml;

/// Opaque reference to an in-flight or completed manifest build.
///
/// Only ever produced when at least one manifest-relevant parameter was
/// present in the request. The identifier is stable from the moment the build
/// is started, so the retrieval URL can be encoded without waiting for the
/// build to finish.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BuildHandle {
	id: Uuid,
}

impl BuildHandle {
	fn new() -> Self {
		Self { id: Uuid::new_v4() }
	}

	pub const fn id(&self) -> Uuid {
		self.id
	}

	#[cfg(test)]
	pub(crate) const fn from_id(id: Uuid) -> Self {
		Self { id }
	}
}

/// The single source of truth for shaping the `/manifest` response.
#[derive(Debug)]
pub enum ManifestRequestOutcome {
	/// The request carried no manifest-relevant parameter. No build task
	/// was created.
	NoParametersGiven,
	/// A build was started; the handle resolves to a retrieval URL without
	/// waiting for the build result.
	Built(BuildHandle),
	/// The request is not permitted to build manifests. The reason stays
	/// server-side; callers only observe the status.
	Denied { status: StatusCode, reason: String },
	/// Constructing the build context failed.
	Failed(BuildError),
}

#[derive(Debug, Error)]
pub enum BuildError {
	#[error("manifest parameter {name} has an empty value")]
	EmptyParameter { name: String },
}

/// Everything the build subsystem needs to produce one manifest document.
#[derive(Debug, Clone)]
pub struct BuildJob {
	pub connector: ConnectorConfig,
	/// Manifest-relevant parameters only, in request order.
	pub parameters: Vec<(String, String)>,
}

/// The external build subsystem producing manifest documents.
///
/// Implementations may be slow; they run on a spawned task and never block
/// request handling.
#[async_trait]
pub trait ManifestSource: Send + Sync {
	async fn build(&self, job: BuildJob) -> anyhow::Result<String>;
}

/// Seam between the HTTP dispatcher and the build orchestration.
#[async_trait]
pub trait BuildCoordinator: Send + Sync {
	async fn start_build(
		&self,
		parameters: &[(String, String)],
		connector: &ConnectorConfig,
	) -> ManifestRequestOutcome;
}

/// State of a single manifest build as observed through the registry.
#[derive(Debug, Clone)]
pub enum BuildState {
	Pending,
	Ready(Arc<String>),
	Failed(String),
}

/// Result of waiting for a manifest in the registry.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
	/// No build with this id was ever started (or it has been evicted).
	Unknown,
	/// The build did not finish within the wait budget.
	Pending,
	Ready(Arc<String>),
	Failed(String),
}

/// Finished manifests are kept around this long for (repeated) retrieval.
const RETENTION: Duration = Duration::from_secs(15 * 60);

/// Registry of in-flight and finished manifest builds.
///
/// This is the shared state of the build subsystem; it is safe under
/// concurrent starts. Identical parameter sets are *not* deduplicated:
/// every request gets its own independent build.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
	builds: Arc<RwLock<HashMap<Uuid, watch::Receiver<BuildState>>>>,
}

impl ManifestRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new build and returns the sender half used to publish
	/// its completion. The entry is evicted [`RETENTION`] after registration.
	async fn register(&self, id: Uuid) -> watch::Sender<BuildState> {
		let (tx, rx) = watch::channel(BuildState::Pending);
		self.builds.write().await.insert(id, rx);

		let builds = Arc::clone(&self.builds);
		tokio::spawn(async move {
			tokio::time::sleep(RETENTION).await;
			builds.write().await.remove(&id);
		});

		tx
	}

	/// Waits until the identified build leaves the pending state, bounded
	/// by `timeout`.
	pub async fn wait_ready(&self, id: Uuid, timeout: Duration) -> FetchOutcome {
		let Some(mut rx) = self.builds.read().await.get(&id).cloned() else {
			return FetchOutcome::Unknown;
		};

		let settled =
			tokio::time::timeout(timeout, rx.wait_for(|s| !matches!(s, BuildState::Pending))).await;

		match settled {
			Err(_elapsed) => FetchOutcome::Pending,
			Ok(result) => match result.as_deref() {
				Ok(BuildState::Ready(manifest)) => FetchOutcome::Ready(Arc::clone(manifest)),
				Ok(BuildState::Failed(message)) => FetchOutcome::Failed(message.clone()),
				// The sender finished without publishing a result.
				Ok(BuildState::Pending) | Err(_) => {
					FetchOutcome::Failed(String::from("manifest build was aborted"))
				}
			},
		}
	}

	#[cfg(test)]
	async fn len(&self) -> usize {
		self.builds.read().await.len()
	}
}

/// Orchestrates asynchronous manifest builds.
///
/// `start_build` only decides whether there is anything to build and hands
/// the job off to the [`ManifestSource`] on a spawned task; it returns as
/// soon as a handle exists.
pub struct ManifestBuildCoordinator {
	source: Arc<dyn ManifestSource>,
	registry: ManifestRegistry,
}

impl ManifestBuildCoordinator {
	pub fn new(source: Arc<dyn ManifestSource>, registry: ManifestRegistry) -> Self {
		Self { source, registry }
	}
}

#[async_trait]
impl BuildCoordinator for ManifestBuildCoordinator {
	async fn start_build(
		&self,
		parameters: &[(String, String)],
		connector: &ConnectorConfig,
	) -> ManifestRequestOutcome {
		let accepted = &connector.manifest.accepted_parameters;
		let relevant: Vec<(String, String)> = parameters
			.iter()
			.filter(|(name, _)| accepted.iter().any(|a| a == name))
			.cloned()
			.collect();

		if relevant.is_empty() {
			return ManifestRequestOutcome::NoParametersGiven;
		}

		// An identifier that is present but blank cannot select anything
		// and would produce an ambiguous manifest.
		if let Some((name, _)) = relevant.iter().find(|(_, value)| value.trim().is_empty()) {
			return ManifestRequestOutcome::Failed(BuildError::EmptyParameter { name: name.clone() });
		}

		let handle = BuildHandle::new();
		let completion = self.registry.register(handle.id()).await;
		let job = BuildJob {
			connector: connector.clone(),
			parameters: relevant,
		};

		let source = Arc::clone(&self.source);
		tokio::spawn(async move {
			let state = match source.build(job).await {
				Ok(manifest) => BuildState::Ready(Arc::new(manifest)),
				Err(err) => {
					error!("Manifest build failed: {err:#}");
					BuildState::Failed(err.to_string())
				}
			};
			// Nobody may be watching anymore; that is fine.
			let _ = completion.send(state);
		});

		ManifestRequestOutcome::Built(handle)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ConnectorConfig, ManifestConfig};
	use std::sync::atomic::{AtomicUsize, Ordering};

	pub(crate) fn test_connector() -> ConnectorConfig {
		ConnectorConfig {
			id: String::from("test"),
			hosts: Vec::new(),
			allow_from: Vec::new(),
			manifest: ManifestConfig {
				base_url: "http://localhost:8080/RequestManifest".parse().unwrap(),
				wado_url: "http://localhost:8080/wado".parse().unwrap(),
				url_parameter: String::from("url"),
				gzip_parameter: String::from("gzip"),
				accepted_parameters: vec![
					String::from("patientID"),
					String::from("studyUID"),
					String::from("seriesUID"),
				],
				build_timeout: 30_000,
			},
		}
	}

	/// Counts invocations and returns a fixed document.
	struct SpySource {
		builds: AtomicUsize,
	}

	impl SpySource {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				builds: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait]
	impl ManifestSource for SpySource {
		async fn build(&self, _job: BuildJob) -> anyhow::Result<String> {
			self.builds.fetch_add(1, Ordering::SeqCst);
			Ok(String::from("<manifest/>"))
		}
	}

	fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
		pairs
			.iter()
			.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
			.collect()
	}

	#[tokio::test]
	async fn no_relevant_parameters_creates_no_build() {
		let source = SpySource::new();
		let registry = ManifestRegistry::new();
		let coordinator = ManifestBuildCoordinator::new(source.clone(), registry.clone());

		let outcome = coordinator
			.start_build(&params(&[("unrelated", "x"), ("gzip", "")]), &test_connector())
			.await;

		assert!(matches!(outcome, ManifestRequestOutcome::NoParametersGiven));
		assert_eq!(registry.len().await, 0);
		assert_eq!(source.builds.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn relevant_parameter_starts_one_build() {
		let source = SpySource::new();
		let registry = ManifestRegistry::new();
		let coordinator = ManifestBuildCoordinator::new(source.clone(), registry.clone());

		let outcome = coordinator
			.start_build(&params(&[("patientID", "123")]), &test_connector())
			.await;

		let ManifestRequestOutcome::Built(handle) = outcome else {
			panic!("expected a build handle");
		};

		let fetched = registry
			.wait_ready(handle.id(), Duration::from_secs(5))
			.await;
		let FetchOutcome::Ready(manifest) = fetched else {
			panic!("expected a finished manifest");
		};
		assert_eq!(manifest.as_str(), "<manifest/>");
		assert_eq!(source.builds.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn blank_identifier_fails_before_any_build() {
		let source = SpySource::new();
		let registry = ManifestRegistry::new();
		let coordinator = ManifestBuildCoordinator::new(source.clone(), registry.clone());

		let outcome = coordinator
			.start_build(&params(&[("studyUID", "  ")]), &test_connector())
			.await;

		assert!(matches!(
			outcome,
			ManifestRequestOutcome::Failed(BuildError::EmptyParameter { .. })
		));
		assert_eq!(registry.len().await, 0);
		assert_eq!(source.builds.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn concurrent_starts_get_independent_handles() {
		let source = SpySource::new();
		let registry = ManifestRegistry::new();
		let coordinator = ManifestBuildCoordinator::new(source.clone(), registry.clone());
		let connector = test_connector();
		let parameters = params(&[("patientID", "123")]);

		let (a, b) = tokio::join!(
			coordinator.start_build(&parameters, &connector),
			coordinator.start_build(&parameters, &connector),
		);

		let (ManifestRequestOutcome::Built(a), ManifestRequestOutcome::Built(b)) = (a, b) else {
			panic!("expected two build handles");
		};
		assert_ne!(a.id(), b.id());
		assert_eq!(registry.len().await, 2);
	}

	#[tokio::test]
	async fn failed_build_is_observable_through_the_registry() {
		struct FailingSource;

		#[async_trait]
		impl ManifestSource for FailingSource {
			async fn build(&self, _job: BuildJob) -> anyhow::Result<String> {
				anyhow::bail!("archive unreachable")
			}
		}

		let registry = ManifestRegistry::new();
		let coordinator = ManifestBuildCoordinator::new(Arc::new(FailingSource), registry.clone());

		let ManifestRequestOutcome::Built(handle) = coordinator
			.start_build(&params(&[("patientID", "123")]), &test_connector())
			.await
		else {
			panic!("expected a build handle");
		};

		let fetched = registry
			.wait_ready(handle.id(), Duration::from_secs(5))
			.await;
		let FetchOutcome::Failed(message) = fetched else {
			panic!("expected a failed build");
		};
		assert_eq!(message, "archive unreachable");
	}

	#[tokio::test]
	async fn unknown_handle_is_reported_as_unknown() {
		let registry = ManifestRegistry::new();
		let fetched = registry
			.wait_ready(Uuid::new_v4(), Duration::from_millis(10))
			.await;
		assert!(matches!(fetched, FetchOutcome::Unknown));
	}
}
