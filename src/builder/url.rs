use crate::builder::BuildHandle;
use crate::config::ConnectorConfig;
use url::Url;

/// Query parameter carrying the build handle id on the retrieval URL.
pub const MANIFEST_ID_PARAMETER: &str = "manifestID";

/// Query parameter marking the manifest as gzip-compressed on the wire.
pub const GZIP_PARAMETER: &str = "gzip";

/// Encodes the URL under which a finished manifest can be retrieved.
///
/// Deterministic and free of I/O: the same `(handle, connector, gzip)`
/// triple always encodes to the same URL. Escaping is handled by the query
/// serializer, so the result is safe to hand to a redirect.
pub fn encode(handle: BuildHandle, connector: &ConnectorConfig, gzip: bool) -> Url {
	let mut url = connector.manifest.base_url.clone();
	{
		let mut query = url.query_pairs_mut();
		query.append_pair(MANIFEST_ID_PARAMETER, &handle.id().to_string());
		if gzip {
			query.append_pair(GZIP_PARAMETER, "true");
		}
	}
	url
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builder::tests::test_connector;

	#[test]
	fn embeds_the_handle_id() {
		let handle = BuildHandle::new();
		let url = encode(handle, &test_connector(), false);

		assert_eq!(url.path(), "/RequestManifest");
		let id = url
			.query_pairs()
			.find(|(name, _)| name == MANIFEST_ID_PARAMETER)
			.map(|(_, value)| value.into_owned())
			.unwrap();
		assert_eq!(id, handle.id().to_string());
	}

	#[test]
	fn encoding_is_idempotent() {
		let handle = BuildHandle::new();
		let connector = test_connector();

		let first = encode(handle, &connector, true);
		let second = encode(handle, &connector, true);
		assert_eq!(first.as_str(), second.as_str());
	}

	#[test]
	fn gzip_flag_is_visible_in_the_url() {
		let handle = BuildHandle::new();
		let connector = test_connector();

		let plain = encode(handle, &connector, false);
		let compressed = encode(handle, &connector, true);

		assert_ne!(plain.as_str(), compressed.as_str());
		assert!(compressed
			.query_pairs()
			.any(|(name, value)| name == GZIP_PARAMETER && value == "true"));
		assert!(!plain.query_pairs().any(|(name, _)| name == GZIP_PARAMETER));
	}

	#[test]
	fn base_url_query_parameters_are_preserved() {
		let mut connector = test_connector();
		connector.manifest.base_url = "http://pacs.example.com/connector/RequestManifest?tenant=a b"
			.parse()
			.unwrap();

		let url = encode(BuildHandle::new(), &connector, false);
		assert!(url.as_str().contains("tenant=a%20b"));
		assert!(url.as_str().contains(MANIFEST_ID_PARAMETER));
	}
}
