//! Durable cache of extraction results.
//!
//! Six sled trees: `packages` (pkid -> "ignore" | "seen" | GCID list),
//! `repo_info` (watermarks), `metadata_xml`/`metadata_yaml` (gcid ->
//! serialized component), `hints` (pkid -> hints JSON), `statistics`
//! (big-endian unix-time key -> JSON). Every write is transactional at
//! sled level; multi-step writes additionally serialize behind one
//! mutex so parallel extraction workers cannot interleave them.

use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::model::{self, MetadataType};
use crate::result::GeneratorResult;
use crate::utils::prune_empty_parents;

pub const IGNORE_MARKER: &str = "ignore";
pub const SEEN_MARKER: &str = "seen";

pub struct DataStore {
    db: sled::Db,
    packages: sled::Tree,
    repo_info: sled::Tree,
    metadata_xml: sled::Tree,
    metadata_yaml: sled::Tree,
    hints: sled::Tree,
    statistics: sled::Tree,
    media_pool_dir: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl DataStore {
    pub fn open(path: &Utf8Path, media_pool_dir: &Utf8Path) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("open datastore at {}", path))?;
        Ok(Self {
            packages: db.open_tree("packages")?,
            repo_info: db.open_tree("repo_info")?,
            metadata_xml: db.open_tree("metadata_xml")?,
            metadata_yaml: db.open_tree("metadata_yaml")?,
            hints: db.open_tree("hints")?,
            statistics: db.open_tree("statistics")?,
            media_pool_dir: media_pool_dir.to_path_buf(),
            write_lock: Mutex::new(()),
            db,
        })
    }

    pub fn media_pool_dir(&self) -> &Utf8Path {
        &self.media_pool_dir
    }

    fn metadata_tree(&self, dtype: MetadataType) -> &sled::Tree {
        match dtype {
            MetadataType::Xml => &self.metadata_xml,
            MetadataType::Yaml => &self.metadata_yaml,
        }
    }

    pub fn metadata_exists(&self, dtype: MetadataType, gcid: &str) -> Result<bool> {
        Ok(self.metadata_tree(dtype).contains_key(gcid.as_bytes())?)
    }

    pub fn get_metadata(&self, dtype: MetadataType, gcid: &str) -> Result<Option<String>> {
        let Some(raw) = self.metadata_tree(dtype).get(gcid.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(
            std::str::from_utf8(&raw)
                .context("metadata entry is not UTF-8")?
                .to_string(),
        ))
    }

    pub fn set_metadata(&self, dtype: MetadataType, gcid: &str, data: &str) -> Result<()> {
        self.metadata_tree(dtype)
            .insert(gcid.as_bytes(), data.as_bytes())?;
        Ok(())
    }

    /// Stores a finalized extraction result.
    #[context("storing result for package")]
    pub fn add_generator_result(
        &self,
        res: &GeneratorResult,
        dtype: MetadataType,
        always_regenerate: bool,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("datastore lock poisoned");
        let pkid = res.pkid();

        if res.unit_ignored() {
            self.packages
                .insert(pkid.as_bytes(), IGNORE_MARKER.as_bytes())?;
            return Ok(());
        }

        let mut gcids = Vec::new();
        for cid in res.component_ids() {
            let Some(gcid) = res.gcid_for_component(&cid) else {
                tracing::error!("component '{}' in {} has no GCID, skipping", cid, pkid);
                continue;
            };
            if always_regenerate || !self.metadata_exists(dtype, &gcid)? {
                let cpt = res.get_component(&cid).expect("component id is live");
                let data = model::serialize_component(cpt, dtype)?;
                self.set_metadata(dtype, &gcid, &data)?;
            }
            gcids.push(gcid);
        }

        if let Some(hints_json) = res.hints_json()? {
            self.hints
                .insert(pkid.as_bytes(), hints_json.as_bytes())?;
        }

        if gcids.is_empty() {
            self.packages
                .insert(pkid.as_bytes(), SEEN_MARKER.as_bytes())?;
        } else {
            self.packages
                .insert(pkid.as_bytes(), gcids.join("\n").as_bytes())?;
        }
        Ok(())
    }

    fn package_value(&self, pkid: &str) -> Result<Option<String>> {
        let Some(raw) = self.packages.get(pkid.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(
            std::str::from_utf8(&raw)
                .context("package entry is not UTF-8")?
                .to_string(),
        ))
    }

    pub fn get_gcids_for_package(&self, pkid: &str) -> Result<Vec<String>> {
        let Some(value) = self.package_value(pkid)? else {
            return Ok(Vec::new());
        };
        if value == IGNORE_MARKER || value == SEEN_MARKER {
            return Ok(Vec::new());
        }
        Ok(value.lines().map(String::from).collect())
    }

    pub fn package_exists(&self, pkid: &str) -> Result<bool> {
        Ok(self.packages.contains_key(pkid.as_bytes())?)
    }

    pub fn set_package_ignore(&self, pkid: &str) -> Result<()> {
        self.packages
            .insert(pkid.as_bytes(), IGNORE_MARKER.as_bytes())?;
        Ok(())
    }

    pub fn is_ignored(&self, pkid: &str) -> Result<bool> {
        Ok(self.package_value(pkid)?.as_deref() == Some(IGNORE_MARKER))
    }

    /// Removes a package record and its hints. Missing keys are fine.
    pub fn remove_package(&self, pkid: &str) -> Result<()> {
        self.packages.remove(pkid.as_bytes())?;
        self.hints.remove(pkid.as_bytes())?;
        Ok(())
    }

    pub fn get_hints(&self, pkid: &str) -> Result<Option<String>> {
        let Some(raw) = self.hints.get(pkid.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(
            std::str::from_utf8(&raw)
                .context("hints entry is not UTF-8")?
                .to_string(),
        ))
    }

    pub fn get_packages_list(&self) -> Result<Vec<String>> {
        let mut pkids = Vec::new();
        for item in self.packages.iter() {
            let (key, _) = item?;
            pkids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(pkids)
    }

    /// pkids whose name part equals `prefix`.
    pub fn get_pkids_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let needle = format!("{}/", prefix);
        Ok(self
            .get_packages_list()?
            .into_iter()
            .filter(|pkid| pkid.starts_with(&needle))
            .collect())
    }

    fn repo_key(suite: &str, section: &str, arch: &str) -> String {
        format!("{}-{}-{}", suite, section, arch)
    }

    pub fn get_repo_info(&self, suite: &str, section: &str, arch: &str) -> Result<Option<u64>> {
        let key = Self::repo_key(suite, section, arch);
        let Some(raw) = self.repo_info.get(key.as_bytes())? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&raw).context("repo info entry is not UTF-8")?;
        Ok(text.parse().ok())
    }

    pub fn set_repo_info(&self, suite: &str, section: &str, arch: &str, mtime: u64) -> Result<()> {
        let key = Self::repo_key(suite, section, arch);
        self.repo_info
            .insert(key.as_bytes(), mtime.to_string().as_bytes())?;
        Ok(())
    }

    pub fn remove_repo_info(&self, suite: &str, section: &str, arch: &str) -> Result<()> {
        let key = Self::repo_key(suite, section, arch);
        self.repo_info.remove(key.as_bytes())?;
        Ok(())
    }

    /// Records a statistics entry under the current time. A colliding
    /// timestamp merges both entries into one JSON array.
    pub fn add_statistics(&self, entry: serde_json::Value) -> Result<()> {
        let _guard = self.write_lock.lock().expect("datastore lock poisoned");
        let key = crate::utils::current_unix_time().to_be_bytes();
        let value = match self.statistics.get(key)? {
            Some(existing) => {
                let existing: serde_json::Value = serde_json::from_slice(&existing)?;
                let mut items = match existing {
                    serde_json::Value::Array(items) => items,
                    other => vec![other],
                };
                items.push(entry);
                serde_json::Value::Array(items)
            }
            None => entry,
        };
        self.statistics
            .insert(key, serde_json::to_vec(&value)?.as_slice())?;
        Ok(())
    }

    /// All statistics entries, flattened and ordered by time.
    pub fn get_statistics(&self) -> Result<Vec<(u64, serde_json::Value)>> {
        let mut out = Vec::new();
        for item in self.statistics.iter() {
            let (key, value) = item?;
            let ts = u64::from_be_bytes(
                key.as_ref()
                    .try_into()
                    .context("statistics key is not a u64")?,
            );
            let value: serde_json::Value = serde_json::from_slice(&value)?;
            match value {
                serde_json::Value::Array(items) => {
                    out.extend(items.into_iter().map(|v| (ts, v)));
                }
                other => out.push((ts, other)),
            }
        }
        Ok(out)
    }

    pub fn remove_statistics(&self, ts: u64) -> Result<()> {
        self.statistics.remove(ts.to_be_bytes())?;
        Ok(())
    }

    /// The set of GCIDs referenced by any known package.
    pub fn get_active_gcids(&self) -> Result<HashSet<String>> {
        let mut active = HashSet::new();
        for item in self.packages.iter() {
            let (_, value) = item?;
            let value = std::str::from_utf8(&value).context("package entry is not UTF-8")?;
            if value == IGNORE_MARKER || value == SEEN_MARKER {
                continue;
            }
            active.extend(value.lines().map(String::from));
        }
        Ok(active)
    }

    fn cleanup_media_dir(&self, root: &Utf8Path, active: &HashSet<String>) -> Result<u32> {
        if !root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        // GCID directories sit at depth 4: prefix/mid/cid/checksum.
        for entry in walkdir::WalkDir::new(root)
            .min_depth(4)
            .max_depth(4)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root.as_std_path())
                .expect("walkdir yields children of its root");
            let Some(gcid) = rel.to_str() else {
                continue;
            };
            if active.contains(gcid) {
                continue;
            }
            tracing::info!("removing stale media directory {}", entry.path().display());
            fs::remove_dir_all(entry.path())
                .with_context(|| format!("remove {}", entry.path().display()))?;
            if let Some(dir) = Utf8Path::from_path(entry.path()) {
                prune_empty_parents(dir, root)?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Drops metadata and media belonging to GCIDs no package references
    /// anymore. `mutable_suite_media_dirs` holds the per-suite pinned
    /// media directories of non-immutable suites.
    #[context("collecting datastore cruft")]
    pub fn cleanup_cruft(&self, mutable_suite_media_dirs: &[Utf8PathBuf]) -> Result<()> {
        let active = self.get_active_gcids()?;

        for tree in [&self.metadata_xml, &self.metadata_yaml] {
            let mut batch = sled::Batch::default();
            let mut dropped = 0u32;
            for item in tree.iter() {
                let (key, _) = item?;
                let gcid = String::from_utf8_lossy(&key).into_owned();
                if !active.contains(&gcid) {
                    batch.remove(gcid.as_bytes());
                    dropped += 1;
                }
            }
            tree.apply_batch(batch)?;
            if dropped > 0 {
                tracing::info!("dropped {} orphaned metadata entries", dropped);
            }
        }

        let media_pool = self.media_pool_dir.clone();
        let removed = self.cleanup_media_dir(&media_pool, &active)?;
        if removed > 0 {
            tracing::info!("removed {} stale media pool directories", removed);
        }
        for suite_dir in mutable_suite_media_dirs {
            self.cleanup_media_dir(suite_dir, &active)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::dummy::FakePackage;
    use crate::hints::Hint;
    use crate::model::{Component, ComponentKind};
    use crate::result::GENERAL_ID;
    use std::sync::Arc;

    fn open_store() -> (tempfile::TempDir, DataStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let store = DataStore::open(&root.join("db"), &root.join("media/pool")).unwrap();
        (tmp, store)
    }

    fn sample_result(version: &str) -> GeneratorResult {
        let pkg = Arc::new(FakePackage::new("foo", version, "amd64"));
        let mut res = GeneratorResult::new(pkg);
        let mut cpt = Component::new(ComponentKind::DesktopApp, "org.example.Foo");
        cpt.set_name("C", "Foo");
        cpt.pkgname = Some("foo".into());
        res.add_component(cpt, b"<component/>");
        res.update_component_gcid("org.example.Foo", version.as_bytes());
        res
    }

    #[test]
    fn test_add_result_and_lookup() {
        let (_tmp, store) = open_store();
        let res = sample_result("1.0");
        let gcid = res.gcid_for_component("org.example.Foo").unwrap();
        store
            .add_generator_result(&res, MetadataType::Xml, false)
            .unwrap();

        assert!(store.package_exists("foo/1.0/amd64").unwrap());
        assert_eq!(
            store.get_gcids_for_package("foo/1.0/amd64").unwrap(),
            vec![gcid.clone()]
        );
        assert!(store.metadata_exists(MetadataType::Xml, &gcid).unwrap());
        let blob = store.get_metadata(MetadataType::Xml, &gcid).unwrap().unwrap();
        assert!(blob.contains("<pkgname>foo</pkgname>"));
        // Stored blobs carry no trailing whitespace.
        assert_eq!(blob, blob.trim_end());
    }

    #[test]
    fn test_ignore_marker() {
        let (_tmp, store) = open_store();
        let pkg = Arc::new(FakePackage::new("boring", "1.0", "amd64"));
        let res = GeneratorResult::new(pkg);
        assert!(res.unit_ignored());
        store
            .add_generator_result(&res, MetadataType::Xml, false)
            .unwrap();
        assert!(store.is_ignored("boring/1.0/amd64").unwrap());
        assert!(
            store
                .get_gcids_for_package("boring/1.0/amd64")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_hints_only_is_seen() {
        let (_tmp, store) = open_store();
        let pkg = Arc::new(FakePackage::new("hinted", "1.0", "amd64"));
        let mut res = GeneratorResult::new(pkg);
        res.add_hint(GENERAL_ID, Hint::new("internal-error"));
        store
            .add_generator_result(&res, MetadataType::Xml, false)
            .unwrap();
        assert!(!store.is_ignored("hinted/1.0/amd64").unwrap());
        assert!(
            store
                .get_gcids_for_package("hinted/1.0/amd64")
                .unwrap()
                .is_empty()
        );
        assert!(store.get_hints("hinted/1.0/amd64").unwrap().is_some());
    }

    #[test]
    fn test_remove_package_missing_ok() {
        let (_tmp, store) = open_store();
        store.remove_package("never/1.0/amd64").unwrap();
    }

    #[test]
    fn test_pkids_matching() {
        let (_tmp, store) = open_store();
        store.set_package_ignore("foo/1.0/amd64").unwrap();
        store.set_package_ignore("foobar/1.0/amd64").unwrap();
        let matches = store.get_pkids_matching("foo").unwrap();
        assert_eq!(matches, vec!["foo/1.0/amd64".to_string()]);
    }

    #[test]
    fn test_repo_info_roundtrip() {
        let (_tmp, store) = open_store();
        assert_eq!(store.get_repo_info("stable", "main", "amd64").unwrap(), None);
        store.set_repo_info("stable", "main", "amd64", 12345).unwrap();
        assert_eq!(
            store.get_repo_info("stable", "main", "amd64").unwrap(),
            Some(12345)
        );
    }

    #[test]
    fn test_statistics_collision_merges() {
        let (_tmp, store) = open_store();
        store
            .add_statistics(serde_json::json!({"suite": "stable", "metadata": 1}))
            .unwrap();
        store
            .add_statistics(serde_json::json!({"suite": "stable", "metadata": 2}))
            .unwrap();
        // Both entries survive, whether or not their timestamps collided.
        let stats = store.get_statistics().unwrap();
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn test_cleanup_cruft() {
        let (tmp, store) = open_store();
        let root = Utf8Path::from_path(tmp.path()).unwrap();

        let res = sample_result("1.0");
        let live_gcid = res.gcid_for_component("org.example.Foo").unwrap();
        store
            .add_generator_result(&res, MetadataType::Xml, false)
            .unwrap();

        let dead_gcid = "org/example/Dead/0123456789abcdef0123456789abcdef";
        store
            .set_metadata(MetadataType::Xml, dead_gcid, "<component/>")
            .unwrap();
        let dead_dir = root.join("media/pool").join(dead_gcid).join("icons/64x64");
        std::fs::create_dir_all(&dead_dir).unwrap();
        std::fs::write(dead_dir.join("dead.png"), b"x").unwrap();
        let live_dir = root.join("media/pool").join(&live_gcid);
        std::fs::create_dir_all(&live_dir).unwrap();

        store.cleanup_cruft(&[]).unwrap();

        assert!(store.metadata_exists(MetadataType::Xml, &live_gcid).unwrap());
        assert!(!store.metadata_exists(MetadataType::Xml, dead_gcid).unwrap());
        assert!(live_dir.exists());
        assert!(!root.join("media/pool").join(dead_gcid).exists());
        // Empty parents of the dead GCID directory are pruned.
        assert!(!root.join("media/pool/org/example/Dead").exists());
    }
}
