use crate::builder::{BuildJob, ManifestSource};
use async_trait::async_trait;
use std::fmt::Write;

/// Builds manifest documents listing the requested identifiers together
/// with the WADO location they can be retrieved from.
pub struct XmlManifestSource;

#[async_trait]
impl ManifestSource for XmlManifestSource {
	async fn build(&self, job: BuildJob) -> anyhow::Result<String> {
		let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
		doc.push_str("<manifest xmlns=\"http://www.weasis.org/xsd/2.5\">\n");
		writeln!(
			doc,
			"  <arcQuery arcId=\"{arc}\" baseUrl=\"{wado}\">",
			arc = escape(&job.connector.id),
			wado = escape(job.connector.manifest.wado_url.as_str()),
		)?;

		for (name, value) in &job.parameters {
			let (element, attribute) = match name.as_str() {
				"patientID" => ("Patient", "PatientID"),
				"studyUID" => ("Study", "StudyInstanceUID"),
				"accessionNumber" => ("Study", "AccessionNumber"),
				"seriesUID" => ("Series", "SeriesInstanceUID"),
				"objectUID" => ("Instance", "SOPInstanceUID"),
				// Parameters accepted by configuration but without a
				// dedicated element are carried verbatim.
				other => ("Item", other),
			};
			writeln!(
				doc,
				"    <{element} {attribute}=\"{value}\"/>",
				value = escape(value),
			)?;
		}

		doc.push_str("  </arcQuery>\n</manifest>\n");
		Ok(doc)
	}
}

/// Escapes a string for use in XML attribute values.
fn escape(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&apos;"),
			c => escaped.push(c),
		}
	}
	escaped
}
