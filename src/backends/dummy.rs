//! In-memory packages: injected-metainfo carriers and test fixtures.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};

use super::{GstInfo, Package, PackageKind};

/// A package whose contents live in memory. Carries operator-injected
/// metainfo through the regular extraction path and backs most tests.
pub struct FakePackage {
    name: String,
    version: String,
    arch: String,
    maintainer: String,
    files: Mutex<BTreeMap<Utf8PathBuf, Vec<u8>>>,
    gst: Option<GstInfo>,
}

impl FakePackage {
    pub fn new(name: &str, version: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            maintainer: String::new(),
            files: Mutex::new(BTreeMap::new()),
            gst: None,
        }
    }

    pub fn with_gst(mut self, gst: GstInfo) -> Self {
        self.gst = Some(gst);
        self
    }

    pub fn add_file<P: Into<Utf8PathBuf>>(&self, path: P, data: Vec<u8>) {
        self.files
            .lock()
            .expect("fake package lock poisoned")
            .insert(path.into(), data);
    }

    /// Loads every regular file beneath `dir`, mapping it to
    /// `<target_prefix>/<relative path>`.
    pub fn load_dir(&self, dir: &Utf8Path, target_prefix: &Utf8Path) -> Result<usize> {
        if !dir.is_dir() {
            bail!("'{}' is not a directory", dir);
        }
        let mut count = 0;
        for entry in walkdir::WalkDir::new(dir).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir.as_std_path())
                .expect("walkdir yields children of its root");
            let rel = Utf8Path::from_path(rel)
                .with_context(|| format!("non UTF-8 file name below {}", dir))?;
            let data = fs::read(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            self.add_file(target_prefix.join(rel), data);
            count += 1;
        }
        Ok(count)
    }
}

impl Package for FakePackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn arch(&self) -> &str {
        &self.arch
    }

    fn maintainer(&self) -> &str {
        &self.maintainer
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Fake
    }

    fn contents(&self) -> Result<Vec<Utf8PathBuf>> {
        Ok(self
            .files
            .lock()
            .expect("fake package lock poisoned")
            .keys()
            .cloned()
            .collect())
    }

    fn get_file_data(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("fake package lock poisoned")
            .get(path)
            .cloned()
            .with_context(|| format!("no file '{}' in package {}", path, self.id()))
    }

    fn gst(&self) -> Option<GstInfo> {
        self.gst.clone()
    }

    fn finish(&self) {}
}
