mod routes;
mod service;

pub use routes::routes;
pub use service::ManifestRequest;
