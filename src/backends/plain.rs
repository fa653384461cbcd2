//! Plain filesystem backend.
//!
//! Packages are unpacked directory trees beneath
//! `<root>/<suite>/<section>/<arch>/<name>-<version>/`, described by an
//! `index.json` next to them. This backend exercises the full contract
//! and serves tests and small deployments; real distributions plug in
//! their own archive formats.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

use super::{GstInfo, Package, PackageIndex};
use crate::data_store::DataStore;
use crate::utils::file_mtime;

#[derive(Debug, Clone, Deserialize)]
struct IndexEntry {
    name: String,
    version: String,
    #[serde(default)]
    maintainer: String,
    #[serde(default)]
    summary: BTreeMap<String, String>,
    #[serde(default)]
    description: BTreeMap<String, String>,
    #[serde(default)]
    gst: Option<GstInfo>,
}

pub struct PlainPackage {
    meta: IndexEntry,
    arch: String,
    dir: Utf8PathBuf,
    contents_cache: Mutex<Option<Vec<Utf8PathBuf>>>,
}

impl PlainPackage {
    fn new(meta: IndexEntry, arch: &str, dir: Utf8PathBuf) -> Self {
        Self {
            meta,
            arch: arch.to_string(),
            dir,
            contents_cache: Mutex::new(None),
        }
    }
}

impl Package for PlainPackage {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn version(&self) -> &str {
        &self.meta.version
    }

    fn arch(&self) -> &str {
        &self.arch
    }

    fn maintainer(&self) -> &str {
        &self.meta.maintainer
    }

    fn summaries(&self) -> BTreeMap<String, String> {
        self.meta.summary.clone()
    }

    fn descriptions(&self) -> BTreeMap<String, String> {
        self.meta.description.clone()
    }

    fn contents(&self) -> Result<Vec<Utf8PathBuf>> {
        let mut cache = self.contents_cache.lock().expect("package lock poisoned");
        if let Some(contents) = cache.as_ref() {
            return Ok(contents.clone());
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(self.dir.as_std_path())
                .expect("walkdir yields children of its root");
            let rel = Utf8Path::from_path(rel)
                .with_context(|| format!("non UTF-8 file name below {}", self.dir))?;
            files.push(Utf8PathBuf::from("/").join(rel));
        }
        files.sort();
        *cache = Some(files.clone());
        Ok(files)
    }

    fn get_file_data(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        let rel = path.strip_prefix("/").unwrap_or(path);
        let full = self.dir.join(rel);
        fs::read(&full).with_context(|| format!("read {} from package {}", path, self.id()))
    }

    fn gst(&self) -> Option<GstInfo> {
        self.meta.gst.clone().filter(|g| !g.is_empty())
    }

    fn finish(&self) {
        self.contents_cache
            .lock()
            .expect("package lock poisoned")
            .take();
    }
}

pub struct PlainPackageIndex {
    root: Utf8PathBuf,
}

impl PlainPackageIndex {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn index_path(&self, suite: &str, section: &str, arch: &str) -> Utf8PathBuf {
        self.root.join(suite).join(section).join(arch).join("index.json")
    }

    #[context("loading package index for {suite}/{section}/{arch}")]
    fn load_index(&self, suite: &str, section: &str, arch: &str) -> Result<Vec<IndexEntry>> {
        let path = self.index_path(suite, section, arch);
        let data = fs::read_to_string(&path).with_context(|| format!("read {}", path))?;
        serde_json::from_str(&data).with_context(|| format!("parse {}", path))
    }
}

impl PackageIndex for PlainPackageIndex {
    fn packages_for(
        &self,
        suite: &str,
        section: &str,
        arch: &str,
        _with_long_descs: bool,
    ) -> Result<Vec<Arc<dyn Package>>> {
        let arch_dir = self.root.join(suite).join(section).join(arch);
        let entries = self.load_index(suite, section, arch)?;
        let mut packages: Vec<Arc<dyn Package>> = Vec::with_capacity(entries.len());
        for meta in entries {
            let dir = arch_dir.join(format!("{}-{}", meta.name, meta.version));
            if !dir.is_dir() {
                bail!("package directory '{}' is missing", dir);
            }
            packages.push(Arc::new(PlainPackage::new(meta, arch, dir)));
        }
        Ok(packages)
    }

    fn package_for_file(
        &self,
        path: &Utf8Path,
        _suite: Option<&str>,
        _section: Option<&str>,
    ) -> Result<Option<Arc<dyn Package>>> {
        // A "file" in this backend is an unpacked package directory named
        // <name>-<version>, below an architecture directory.
        if !path.is_dir() {
            return Ok(None);
        }
        let dirname = match path.file_name() {
            Some(n) => n,
            None => return Ok(None),
        };
        let Some((name, version)) = dirname.rsplit_once('-') else {
            bail!("'{}' is not of the form <name>-<version>", dirname);
        };
        let arch = path
            .parent()
            .and_then(|p| p.file_name())
            .unwrap_or("unknown")
            .to_string();
        let meta = IndexEntry {
            name: name.to_string(),
            version: version.to_string(),
            maintainer: String::new(),
            summary: BTreeMap::new(),
            description: BTreeMap::new(),
            gst: None,
        };
        Ok(Some(Arc::new(PlainPackage::new(
            meta,
            &arch,
            path.to_path_buf(),
        ))))
    }

    fn has_changes(
        &self,
        dstore: &DataStore,
        suite: &str,
        section: &str,
        arch: &str,
    ) -> Result<bool> {
        let path = self.index_path(suite, section, arch);
        let mtime = file_mtime(&path)?;
        let stored = dstore.get_repo_info(suite, section, arch)?;
        if stored == Some(mtime) {
            return Ok(false);
        }
        dstore.set_repo_info(suite, section, arch, mtime)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(root: &Utf8Path) {
        let arch_dir = root.join("stable/main/amd64");
        fs::create_dir_all(arch_dir.join("foo-1.0/usr/share/applications")).unwrap();
        fs::write(
            arch_dir.join("foo-1.0/usr/share/applications/foo.desktop"),
            "[Desktop Entry]\nType=Application\nName=Foo\n",
        )
        .unwrap();
        fs::write(
            arch_dir.join("index.json"),
            r#"[{"name": "foo", "version": "1.0", "maintainer": "Jane <jane@example.org>"}]"#,
        )
        .unwrap();
    }

    #[test]
    fn test_packages_for() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        write_fixture(root);

        let index = PlainPackageIndex::new(root);
        let packages = index.packages_for("stable", "main", "amd64", true).unwrap();
        assert_eq!(packages.len(), 1);
        let pkg = &packages[0];
        assert_eq!(pkg.id(), "foo/1.0/amd64");
        assert_eq!(pkg.maintainer(), "Jane <jane@example.org>");
        let contents = pkg.contents().unwrap();
        assert_eq!(
            contents,
            vec![Utf8PathBuf::from("/usr/share/applications/foo.desktop")]
        );
        let data = pkg
            .get_file_data(Utf8Path::new("/usr/share/applications/foo.desktop"))
            .unwrap();
        assert!(data.starts_with(b"[Desktop Entry]"));
        pkg.finish();
    }

    #[test]
    fn test_missing_index_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = PlainPackageIndex::new(Utf8Path::from_path(tmp.path()).unwrap());
        assert!(index.packages_for("stable", "main", "amd64", true).is_err());
    }
}
