//! Persistent index of package contents: which files does a package ship.
//!
//! The single sled tree maps pkid -> newline-joined path list. Inverted
//! lookups (path -> pkid) scan that tree once per query; callers batch
//! them per suite/section, so the scan cost is paid a handful of times
//! per run.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

const ICON_LOCATIONS: &[&str] = &["/usr/share/icons/", "/usr/share/pixmaps/"];
const LOCALE_LOCATION: &str = "/usr/share/locale/";

pub struct ContentsStore {
    db: sled::Db,
    contents: sled::Tree,
}

impl ContentsStore {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("open contents cache at {}", path))?;
        let contents = db.open_tree("contents")?;
        Ok(Self { db, contents })
    }

    /// Idempotent upsert of a package's file list in one transaction.
    pub fn add_contents(&self, pkid: &str, paths: &[Utf8PathBuf]) -> Result<()> {
        let mut sorted: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let joined = sorted.join("\n");
        self.contents.insert(pkid.as_bytes(), joined.as_bytes())?;
        Ok(())
    }

    pub fn package_exists(&self, pkid: &str) -> Result<bool> {
        Ok(self.contents.contains_key(pkid.as_bytes())?)
    }

    pub fn get_contents(&self, pkid: &str) -> Result<Vec<Utf8PathBuf>> {
        let Some(raw) = self.contents.get(pkid.as_bytes())? else {
            return Ok(Vec::new());
        };
        let raw = std::str::from_utf8(&raw).context("contents entry is not UTF-8")?;
        Ok(raw
            .lines()
            .filter(|l| !l.is_empty())
            .map(Utf8PathBuf::from)
            .collect())
    }

    pub fn remove_packages(&self, pkids: &[String]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for pkid in pkids {
            batch.remove(pkid.as_bytes());
        }
        self.contents.apply_batch(batch)?;
        Ok(())
    }

    pub fn get_packages_list(&self) -> Result<Vec<String>> {
        let mut pkids = Vec::new();
        for item in self.contents.iter() {
            let (key, _) = item?;
            pkids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(pkids)
    }

    /// path -> pkid for every file of the given packages that satisfies
    /// the filter. One full scan of the contents tree.
    fn get_contents_map<F>(
        &self,
        pkids: &HashSet<String>,
        filter: F,
    ) -> Result<HashMap<Utf8PathBuf, String>>
    where
        F: Fn(&str) -> bool,
    {
        let mut map = HashMap::new();
        for item in self.contents.iter() {
            let (key, value) = item?;
            let pkid = String::from_utf8_lossy(&key);
            if !pkids.contains(pkid.as_ref()) {
                continue;
            }
            let value = std::str::from_utf8(&value).context("contents entry is not UTF-8")?;
            for line in value.lines() {
                if filter(line) {
                    map.insert(Utf8PathBuf::from(line), pkid.clone().into_owned());
                }
            }
        }
        Ok(map)
    }

    /// Icon files (themes and pixmaps) of the given packages.
    pub fn get_icon_files_map(
        &self,
        pkids: &HashSet<String>,
    ) -> Result<HashMap<Utf8PathBuf, String>> {
        self.get_contents_map(pkids, |path| {
            ICON_LOCATIONS.iter().any(|loc| path.starts_with(loc))
        })
    }

    /// locale-file basename -> owning pkid, for locale statistics.
    pub fn get_locale_map(&self, pkids: &HashSet<String>) -> Result<HashMap<String, String>> {
        let full = self.get_contents_map(pkids, |path| path.starts_with(LOCALE_LOCATION))?;
        let mut map = HashMap::new();
        for (path, pkid) in full {
            if let Some(basename) = path.file_name() {
                map.insert(basename.to_string(), pkid);
            }
        }
        Ok(map)
    }

    pub fn sync(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, ContentsStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContentsStore::open(
            Utf8Path::from_path(tmp.path()).unwrap().join("db").as_path(),
        )
        .unwrap();
        (tmp, store)
    }

    #[test]
    fn test_add_and_get_contents() {
        let (_tmp, store) = open_store();
        let paths = vec![
            Utf8PathBuf::from("/usr/bin/foo"),
            Utf8PathBuf::from("/usr/share/applications/foo.desktop"),
        ];
        store.add_contents("foo/1.0/amd64", &paths).unwrap();
        assert!(store.package_exists("foo/1.0/amd64").unwrap());
        assert!(!store.package_exists("bar/1.0/amd64").unwrap());
        let got = store.get_contents("foo/1.0/amd64").unwrap();
        assert_eq!(got, paths);

        // Re-adding the same contents is an idempotent upsert.
        store.add_contents("foo/1.0/amd64", &paths).unwrap();
        assert_eq!(store.get_packages_list().unwrap().len(), 1);
    }

    #[test]
    fn test_icon_files_map() {
        let (_tmp, store) = open_store();
        store
            .add_contents(
                "foo/1.0/amd64",
                &[
                    Utf8PathBuf::from("/usr/share/icons/hicolor/64x64/apps/foo.png"),
                    Utf8PathBuf::from("/usr/share/pixmaps/foo.xpm"),
                    Utf8PathBuf::from("/usr/bin/foo"),
                ],
            )
            .unwrap();
        store
            .add_contents(
                "bar/2.0/amd64",
                &[Utf8PathBuf::from("/usr/share/icons/hicolor/64x64/apps/bar.png")],
            )
            .unwrap();

        let pkids: HashSet<String> = ["foo/1.0/amd64".to_string()].into_iter().collect();
        let map = store.get_icon_files_map(&pkids).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(Utf8Path::new("/usr/share/icons/hicolor/64x64/apps/foo.png"))
                .map(String::as_str),
            Some("foo/1.0/amd64")
        );
        // bar is filtered out by the pkid set.
        assert!(
            !map.contains_key(Utf8Path::new("/usr/share/icons/hicolor/64x64/apps/bar.png"))
        );
    }

    #[test]
    fn test_locale_map() {
        let (_tmp, store) = open_store();
        store
            .add_contents(
                "foo/1.0/amd64",
                &[Utf8PathBuf::from(
                    "/usr/share/locale/de/LC_MESSAGES/foo.mo",
                )],
            )
            .unwrap();
        let pkids: HashSet<String> = ["foo/1.0/amd64".to_string()].into_iter().collect();
        let map = store.get_locale_map(&pkids).unwrap();
        assert_eq!(map.get("foo.mo").map(String::as_str), Some("foo/1.0/amd64"));
    }

    #[test]
    fn test_remove_packages() {
        let (_tmp, store) = open_store();
        store
            .add_contents("foo/1.0/amd64", &[Utf8PathBuf::from("/usr/bin/foo")])
            .unwrap();
        store
            .add_contents("bar/2.0/amd64", &[Utf8PathBuf::from("/usr/bin/bar")])
            .unwrap();
        store.remove_packages(&["foo/1.0/amd64".to_string()]).unwrap();
        assert!(!store.package_exists("foo/1.0/amd64").unwrap());
        assert!(store.package_exists("bar/2.0/amd64").unwrap());
        assert!(store.get_contents("foo/1.0/amd64").unwrap().is_empty());
    }
}
