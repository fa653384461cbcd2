//! Distribution backend contract.
//!
//! A backend enumerates the binary packages of a repository and exposes
//! their file lists and file data. Everything the extraction core knows
//! about a distribution goes through these two traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::data_store::DataStore;

pub mod dummy;
pub mod plain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// A real archive package.
    Physical,
    /// A synthetic package carrying injected data (extra metainfo).
    Fake,
}

/// GStreamer capability metadata a backend may expose for a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GstInfo {
    #[serde(default)]
    pub decoders: Vec<String>,
    #[serde(default)]
    pub encoders: Vec<String>,
    #[serde(default)]
    pub element_names: Vec<String>,
    #[serde(default)]
    pub uri_sinks: Vec<String>,
    #[serde(default)]
    pub uri_sources: Vec<String>,
}

impl GstInfo {
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
            && self.encoders.is_empty()
            && self.element_names.is_empty()
            && self.uri_sinks.is_empty()
            && self.uri_sources.is_empty()
    }

    /// Stable textual form, mixed into the GCID of synthesized codec
    /// components.
    pub fn checksum_strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (prefix, list) in [
            ("decoder", &self.decoders),
            ("encoder", &self.encoders),
            ("element", &self.element_names),
            ("urisink", &self.uri_sinks),
            ("urisource", &self.uri_sources),
        ] {
            for item in list {
                out.push(format!("{}:{}", prefix, item));
            }
        }
        out
    }
}

/// One binary package. Implementations are shared across worker threads;
/// `finish` must be idempotent and callable from any of them.
pub trait Package: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn arch(&self) -> &str;

    fn maintainer(&self) -> &str {
        ""
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Physical
    }

    /// Canonical package identifier `name/version/arch`.
    fn id(&self) -> String {
        format!("{}/{}/{}", self.name(), self.version(), self.arch())
    }

    /// Localized short summaries (locale -> text).
    fn summaries(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Localized long descriptions (locale -> text).
    fn descriptions(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// All file paths contained in the package, absolute.
    fn contents(&self) -> Result<Vec<Utf8PathBuf>>;

    /// Reads one contained file.
    fn get_file_data(&self, path: &Utf8Path) -> Result<Vec<u8>>;

    fn gst(&self) -> Option<GstInfo> {
        None
    }

    /// Releases transient resources (decompressed data, open handles).
    /// The package may be reopened lazily afterwards.
    fn finish(&self);

    /// Removes any persistent scratch data. Called at engine shutdown.
    fn cleanup_temp(&self) {}
}

/// Entry point a distribution implements to expose its repositories.
pub trait PackageIndex: Send + Sync {
    /// All packages for a (suite, section, arch). `with_long_descs`
    /// permits the backend to skip expensive translation loading.
    fn packages_for(
        &self,
        suite: &str,
        section: &str,
        arch: &str,
        with_long_descs: bool,
    ) -> Result<Vec<Arc<dyn Package>>>;

    /// Resolves a standalone file to a synthetic single-file package, for
    /// the `process-file` command.
    fn package_for_file(
        &self,
        path: &Utf8Path,
        suite: Option<&str>,
        section: Option<&str>,
    ) -> Result<Option<Arc<dyn Package>>>;

    /// Compares the repository index against the stored watermark and
    /// updates the watermark when it moved. Returns whether a rescan is
    /// needed.
    fn has_changes(
        &self,
        dstore: &DataStore,
        suite: &str,
        section: &str,
        arch: &str,
    ) -> Result<bool>;

    /// Drops per-run caches.
    fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gst_info_checksum_strings() {
        let gst = GstInfo {
            decoders: vec!["audio/mpeg".into()],
            encoders: vec![],
            element_names: vec!["mpegaudioparse".into()],
            uri_sinks: vec![],
            uri_sources: vec![],
        };
        assert!(!gst.is_empty());
        assert_eq!(
            gst.checksum_strings(),
            vec!["decoder:audio/mpeg", "element:mpegaudioparse"]
        );
        assert!(GstInfo::default().is_empty());
    }
}
