//! Top-level orchestration: contents seeding, parallel extraction,
//! injected metainfo, export and garbage collection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use rayon::prelude::*;

use crate::backends::dummy::FakePackage;
use crate::backends::plain::PlainPackageIndex;
use crate::backends::{Package, PackageIndex};
use crate::config::{BackendKind, Config, Suite};
use crate::contents_store::ContentsStore;
use crate::data_store::DataStore;
use crate::extractor::{Collaborators, DataExtractor, package_is_interesting};
use crate::hints::{self, HintSeverity};
use crate::icons::IconHandler;
use crate::utils::{ScratchDir, ensure_dir};

pub mod export;

/// Package name used for the synthetic unit carrying operator-injected
/// metainfo.
const EXTRA_METAINFO_PKG: &str = "extra-metainfo";

pub struct Engine {
    config: Arc<Config>,
    backend: Arc<dyn PackageIndex>,
    dstore: Arc<DataStore>,
    cstore: Arc<ContentsStore>,
    collaborators: Collaborators,
    scratch: ScratchDir,
    cancelled: Arc<AtomicBool>,
    forced: bool,
}

impl Engine {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        ensure_dir(&config.db_dir)?;
        ensure_dir(&config.cache_dir)?;
        ensure_dir(&config.export_dir)?;
        ensure_dir(&config.media_pool_dir())?;

        let backend: Arc<dyn PackageIndex> = match config.backend {
            BackendKind::Plain => Arc::new(PlainPackageIndex::new(&config.archive_root)),
        };
        let dstore = Arc::new(DataStore::open(
            &config.db_dir.join("main"),
            &config.media_pool_dir(),
        )?);
        let cstore = Arc::new(ContentsStore::open(&config.cache_dir.join("contents"))?);
        let scratch = ScratchDir::new(&config.cache_dir);

        Ok(Self {
            backend,
            dstore,
            cstore,
            collaborators: Collaborators::default(),
            scratch,
            cancelled: Arc::new(AtomicBool::new(false)),
            forced: false,
            config,
        })
    }

    pub fn set_forced(&mut self, forced: bool) {
        self.forced = forced;
    }

    pub fn set_collaborators(&mut self, collaborators: Collaborators) {
        self.collaborators = collaborators;
    }

    /// Flag observed between work chunks; setting it makes the run wind
    /// down at the next chunk boundary.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn datastore(&self) -> &DataStore {
        &self.dstore
    }

    fn suite_named(&self, name: &str) -> Result<Suite> {
        self.config
            .suite(name)
            .cloned()
            .with_context(|| format!("suite '{}' is not configured", name))
    }

    fn selected_sections(suite: &Suite, only_section: Option<&str>) -> Result<Vec<String>> {
        match only_section {
            Some(section) => {
                if !suite.sections.iter().any(|s| s == section) {
                    bail!("section '{}' is not part of suite '{}'", section, suite.name);
                }
                Ok(vec![section.to_string()])
            }
            None => Ok(suite.sections.clone()),
        }
    }

    /// Processes one suite: seed, extract, export, report.
    pub fn run(&self, suite_name: &str, only_section: Option<&str>) -> Result<()> {
        let suite = self.suite_named(suite_name)?;
        if suite.immutable {
            bail!("suite '{}' is immutable and can not be processed", suite.name);
        }

        for section in Self::selected_sections(&suite, only_section)? {
            for arch in &suite.architectures {
                if self.cancelled.load(Ordering::Relaxed) {
                    tracing::warn!("run cancelled, skipping remaining sections");
                    return Ok(());
                }
                if let Err(e) = self.process_section_arch(&suite, &section, arch) {
                    // Backend trouble must not kill the whole run; the
                    // watermark is reset so the next run retries.
                    tracing::warn!(
                        "skipping {}/{}/{}: {:#}",
                        suite.name,
                        section,
                        arch,
                        e
                    );
                    self.dstore.remove_repo_info(&suite.name, &section, arch)?;
                }
            }
        }

        hints::save_registry(
            &self
                .config
                .hints_export_dir
                .join(&suite.name)
                .join("hint-definitions.json"),
        )?;

        self.backend.release();
        self.dstore.sync()?;
        self.cstore.sync()?;
        self.scratch.cleanup()?;
        Ok(())
    }

    #[context("processing {section}/{arch} of suite {}", suite.name)]
    fn process_section_arch(&self, suite: &Suite, section: &str, arch: &str) -> Result<()> {
        if !self.forced
            && !self
                .backend
                .has_changes(&self.dstore, &suite.name, section, arch)?
        {
            tracing::info!(
                "index of {}/{}/{} is unchanged, skipping",
                suite.name,
                section,
                arch
            );
            return Ok(());
        }
        tracing::info!("processing {}/{}/{}", suite.name, section, arch);

        // Base-suite packages only contribute contents (icons, themes);
        // they are never extracted or exported here.
        let mut base_packages: Vec<Arc<dyn Package>> = Vec::new();
        if let Some(base_name) = &suite.base_suite {
            base_packages = self
                .backend
                .packages_for(base_name, section, arch, false)
                .with_context(|| format!("enumerate base suite '{}'", base_name))?;
            self.seed_contents(&base_packages, false)?;
        }

        let packages = self
            .backend
            .packages_for(&suite.name, section, arch, true)?;
        let interesting = self.seed_contents(&packages, true)?;
        self.cstore.sync()?;
        if !interesting {
            tracing::info!(
                "no interesting packages in {}/{}/{}",
                suite.name,
                section,
                arch
            );
        }

        let mut pkg_map: HashMap<String, Arc<dyn Package>> = HashMap::new();
        for pkg in packages.iter().chain(base_packages.iter()) {
            pkg_map.insert(pkg.id(), Arc::clone(pkg));
        }
        let icon_handler = IconHandler::new(
            &self.cstore,
            &pkg_map,
            suite.icon_theme.as_deref(),
            &self.config,
        )?;

        if interesting {
            self.extract_packages(&packages, &icon_handler)?;
        }
        for pkg in &base_packages {
            pkg.finish();
        }

        let mut pkids: Vec<String> = packages.iter().map(|p| p.id()).collect();
        if let Some(extra_pkid) = self.process_extra_metainfo(suite, section, arch, &icon_handler)?
        {
            pkids.push(extra_pkid);
        }

        export::export_data(&self.config, &self.dstore, suite, section, arch, &pkids)?;
        self.store_statistics(suite, section, arch, &pkids)?;
        self.dstore.sync()?;
        Ok(())
    }

    /// Records package contents and marks packages without interesting
    /// files as permanently ignorable. Returns whether any interesting
    /// package was seen.
    fn seed_contents(&self, packages: &[Arc<dyn Package>], classify: bool) -> Result<bool> {
        let interesting_seen = AtomicBool::new(false);
        let threads = (2 * num_cpus::get()).min(30).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;

        pool.install(|| {
            packages.par_iter().try_for_each(|pkg| -> Result<()> {
                let pkid = pkg.id();
                let known = self.cstore.package_exists(&pkid)?;
                let contents = if known {
                    self.cstore.get_contents(&pkid)?
                } else {
                    let contents = pkg
                        .contents()
                        .with_context(|| format!("read contents of {}", pkid))?;
                    self.cstore.add_contents(&pkid, &contents)?;
                    contents
                };

                if !classify {
                    pkg.finish();
                    return Ok(());
                }
                if self.dstore.package_exists(&pkid)? {
                    if !self.dstore.is_ignored(&pkid)? {
                        interesting_seen.store(true, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                let has_gst = pkg.gst().map(|g| !g.is_empty()).unwrap_or(false);
                if package_is_interesting(&contents, has_gst) {
                    interesting_seen.store(true, Ordering::Relaxed);
                } else {
                    self.dstore.set_package_ignore(&pkid)?;
                }
                Ok(())
            })
        })?;
        Ok(interesting_seen.load(Ordering::Relaxed))
    }

    /// Parallel metadata extraction over chunked package lists. Each
    /// chunk runs on one worker with its own extractor; results land in
    /// the datastore through its internal write lock.
    fn extract_packages(
        &self,
        packages: &[Arc<dyn Package>],
        icon_handler: &IconHandler,
    ) -> Result<()> {
        let mut todo: Vec<&Arc<dyn Package>> = Vec::new();
        for pkg in packages {
            if !self.dstore.package_exists(&pkg.id())? {
                todo.push(pkg);
            }
        }
        if todo.is_empty() {
            tracing::info!("all packages are already known, nothing to extract");
            return Ok(());
        }

        let cores = num_cpus::get().max(1);
        let chunk_size = (todo.len() / cores / 10).clamp(10, 100);
        tracing::info!(
            "extracting {} packages in chunks of {}",
            todo.len(),
            chunk_size
        );

        let pool = rayon::ThreadPoolBuilder::new().num_threads(cores).build()?;
        pool.install(|| {
            todo.par_chunks(chunk_size).try_for_each(|chunk| -> Result<()> {
                // A cancellation request takes effect between chunks.
                if self.cancelled.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let extractor = DataExtractor::new(
                    &self.dstore,
                    icon_handler,
                    &self.config,
                    &self.collaborators,
                );
                for pkg in chunk {
                    if self.dstore.package_exists(&pkg.id())? {
                        continue;
                    }
                    let res = extractor.process_package(pkg);
                    let stored = self.dstore.add_generator_result(
                        &res,
                        self.config.metadata_type,
                        false,
                    );
                    // Transient package data is released in every case.
                    pkg.finish();
                    stored?;
                }
                Ok(())
            })
        })
    }

    /// Processes operator-injected metainfo through a synthetic package.
    fn process_extra_metainfo(
        &self,
        suite: &Suite,
        section: &str,
        arch: &str,
        icon_handler: &IconHandler,
    ) -> Result<Option<String>> {
        let base = suite.extra_metainfo_dir.clone().or_else(|| {
            self.config
                .extra_metainfo_dir
                .as_ref()
                .map(|d| d.join(&suite.name))
        });
        let Some(base) = base else {
            return Ok(None);
        };
        let dir = base.join(section);
        if !dir.is_dir() {
            return Ok(None);
        }

        let fake = FakePackage::new(EXTRA_METAINFO_PKG, "0", arch);
        let count = fake.load_dir(&dir, Utf8Path::new("/usr/share/metainfo"))?;
        if count == 0 {
            return Ok(None);
        }
        tracing::info!(
            "processing {} injected metainfo files for {}/{}",
            count,
            suite.name,
            section
        );

        let pkg: Arc<dyn Package> = Arc::new(fake);
        let extractor = DataExtractor::new(
            &self.dstore,
            icon_handler,
            &self.config,
            &self.collaborators,
        );
        let res = extractor.process_package(&pkg);
        let pkid = res.pkid().to_string();
        // Injected data bypasses the cache so operator edits always land.
        self.dstore
            .add_generator_result(&res, self.config.metadata_type, true)?;
        pkg.finish();
        Ok(Some(pkid))
    }

    fn store_statistics(
        &self,
        suite: &Suite,
        section: &str,
        arch: &str,
        pkids: &[String],
    ) -> Result<()> {
        let mut metadata_count = 0usize;
        let mut infos = 0usize;
        let mut warnings = 0usize;
        let mut errors = 0usize;
        for pkid in pkids {
            metadata_count += self.dstore.get_gcids_for_package(pkid)?.len();
            let Some(raw) = self.dstore.get_hints(pkid)? else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                continue;
            };
            let Some(cids) = value.get("hints").and_then(|h| h.as_object()) else {
                continue;
            };
            for hint_list in cids.values() {
                let Some(hint_list) = hint_list.as_array() else {
                    continue;
                };
                for hint in hint_list {
                    let Some(tag) = hint.get("tag").and_then(|t| t.as_str()) else {
                        continue;
                    };
                    match hints::severity_of(tag) {
                        HintSeverity::Error => errors += 1,
                        HintSeverity::Warning => warnings += 1,
                        HintSeverity::Info | HintSeverity::Pedantic => infos += 1,
                    }
                }
            }
        }

        self.dstore.add_statistics(serde_json::json!({
            "suite": suite.name,
            "section": section,
            "arch": arch,
            "totalInfos": infos,
            "totalWarnings": warnings,
            "totalErrors": errors,
            "totalMetadata": metadata_count,
        }))
    }

    /// Re-exports a suite from cached data without extracting anything.
    pub fn publish(&self, suite_name: &str, only_section: Option<&str>) -> Result<()> {
        let suite = self.suite_named(suite_name)?;
        for section in Self::selected_sections(&suite, only_section)? {
            for arch in &suite.architectures {
                let packages = match self
                    .backend
                    .packages_for(&suite.name, &section, arch, false)
                {
                    Ok(packages) => packages,
                    Err(e) => {
                        tracing::warn!(
                            "skipping publish of {}/{}/{}: {:#}",
                            suite.name,
                            section,
                            arch,
                            e
                        );
                        continue;
                    }
                };
                let pkids: Vec<String> = packages.iter().map(|p| p.id()).collect();
                for pkg in &packages {
                    pkg.finish();
                }
                export::export_data(&self.config, &self.dstore, &suite, &section, arch, &pkids)?;
            }
        }
        self.backend.release();
        Ok(())
    }

    /// Extracts standalone files as synthetic packages, bypassing caches.
    pub fn process_file(
        &self,
        suite_name: &str,
        section: &str,
        files: &[Utf8PathBuf],
    ) -> Result<()> {
        let suite = self.suite_named(suite_name)?;
        for file in files {
            let Some(pkg) =
                self.backend
                    .package_for_file(file, Some(&suite.name), Some(section))?
            else {
                tracing::warn!("no package could be derived from '{}'", file);
                continue;
            };
            let pkid = pkg.id();
            let contents = pkg.contents()?;
            self.cstore.add_contents(&pkid, &contents)?;

            let mut pkg_map: HashMap<String, Arc<dyn Package>> = HashMap::new();
            pkg_map.insert(pkid.clone(), Arc::clone(&pkg));
            let icon_handler = IconHandler::new(
                &self.cstore,
                &pkg_map,
                suite.icon_theme.as_deref(),
                &self.config,
            )?;
            let extractor = DataExtractor::new(
                &self.dstore,
                &icon_handler,
                &self.config,
                &self.collaborators,
            );
            let res = extractor.process_package(&pkg);
            self.dstore
                .add_generator_result(&res, self.config.metadata_type, true)?;
            pkg.finish();
            tracing::info!(
                "processed '{}' as {}: {} components, {} hints",
                file,
                pkid,
                res.components_count(),
                res.hints_count()
            );
        }
        Ok(())
    }

    /// Removes all datastore knowledge about the packages of a suite so
    /// the next run rescans it from scratch.
    pub fn remove_found(&self, suite_name: &str) -> Result<()> {
        let suite = self.suite_named(suite_name)?;
        for section in &suite.sections {
            for arch in &suite.architectures {
                let packages = self
                    .backend
                    .packages_for(&suite.name, section, arch, false)?;
                let pkids: Vec<String> = packages.iter().map(|p| p.id()).collect();
                for pkid in &pkids {
                    self.dstore.remove_package(pkid)?;
                }
                self.cstore.remove_packages(&pkids)?;
                for pkg in &packages {
                    pkg.finish();
                }
                self.dstore.remove_repo_info(&suite.name, section, arch)?;
            }
        }
        self.backend.release();
        Ok(())
    }

    /// Drops a single package (exact pkid) or every version of a package
    /// name from the caches.
    pub fn forget(&self, identifier: &str) -> Result<()> {
        let pkids = if identifier.contains('/') {
            vec![identifier.to_string()]
        } else {
            self.dstore.get_pkids_matching(identifier)?
        };
        if pkids.is_empty() {
            tracing::warn!("no package matched '{}'", identifier);
            return Ok(());
        }
        for pkid in &pkids {
            self.dstore.remove_package(pkid)?;
        }
        self.cstore.remove_packages(&pkids)?;
        tracing::info!("forgot {} package(s)", pkids.len());
        Ok(())
    }

    /// Prints what the caches know about one package.
    pub fn info(&self, pkid: &str) -> Result<()> {
        if !self.dstore.package_exists(pkid)? {
            println!("Package '{}' is unknown.", pkid);
            return Ok(());
        }
        if self.dstore.is_ignored(pkid)? {
            println!("Package '{}' is marked as ignored.", pkid);
            return Ok(());
        }
        let gcids = self.dstore.get_gcids_for_package(pkid)?;
        if gcids.is_empty() {
            println!("Package '{}' was seen but produced no components.", pkid);
        } else {
            println!("Components of '{}':", pkid);
            for gcid in &gcids {
                println!("  {}", gcid);
            }
        }
        if let Some(raw) = self.dstore.get_hints(pkid)? {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("Hints:\n{}", serde_json::to_string_pretty(&value)?);
        }
        Ok(())
    }

    /// Garbage collection: drop cache entries and media for packages that
    /// left every mutable suite, then deduplicate statistics.
    #[context("running cache cleanup")]
    pub fn run_cleanup(&self) -> Result<()> {
        let mut active: HashSet<String> = HashSet::new();
        for suite in &self.config.suites {
            if suite.immutable {
                continue;
            }
            for section in &suite.sections {
                for arch in &suite.architectures {
                    let packages = self
                        .backend
                        .packages_for(&suite.name, section, arch, false)
                        .with_context(|| {
                            format!("enumerate {}/{}/{}", suite.name, section, arch)
                        })?;
                    for pkg in &packages {
                        active.insert(pkg.id());
                        pkg.finish();
                    }
                }
            }
        }

        let mut removed = 0u32;
        for pkid in self.dstore.get_packages_list()? {
            if !active.contains(&pkid) {
                self.dstore.remove_package(&pkid)?;
                removed += 1;
            }
        }
        let stale: Vec<String> = self
            .cstore
            .get_packages_list()?
            .into_iter()
            .filter(|pkid| !active.contains(pkid))
            .collect();
        self.cstore.remove_packages(&stale)?;
        tracing::info!(
            "cleanup removed {} datastore and {} contents entries",
            removed,
            stale.len()
        );

        let suite_media_dirs: Vec<Utf8PathBuf> = self
            .config
            .suites
            .iter()
            .filter(|s| !s.immutable)
            .map(|s| self.config.suite_media_dir(&s.name))
            .collect();
        self.dstore.cleanup_cruft(&suite_media_dirs)?;

        self.dedup_statistics()?;
        self.backend.release();
        self.dstore.sync()?;
        self.cstore.sync()?;
        self.scratch.cleanup()?;
        Ok(())
    }

    /// Removes back-to-back identical statistics entries per
    /// suite-section key. Merged (colliding) timestamps are left alone.
    fn dedup_statistics(&self) -> Result<()> {
        let stats = self.dstore.get_statistics()?;
        let mut per_ts_count: HashMap<u64, usize> = HashMap::new();
        for (ts, _) in &stats {
            *per_ts_count.entry(*ts).or_insert(0) += 1;
        }

        let mut last_seen: HashMap<String, serde_json::Value> = HashMap::new();
        let mut dropped = 0u32;
        for (ts, value) in stats {
            let key = format!(
                "{}-{}",
                value.get("suite").and_then(|v| v.as_str()).unwrap_or(""),
                value.get("section").and_then(|v| v.as_str()).unwrap_or("")
            );
            match last_seen.get(&key) {
                Some(prev) if *prev == value => {
                    if per_ts_count.get(&ts) == Some(&1) {
                        self.dstore.remove_statistics(ts)?;
                        dropped += 1;
                    }
                }
                _ => {
                    last_seen.insert(key, value);
                }
            }
        }
        if dropped > 0 {
            tracing::info!("dropped {} duplicated statistics entries", dropped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetadataType;
    use std::fs;
    use std::io::Cursor;

    const METAINFO: &str = r#"<?xml version="1.0"?>
<component type="desktop-application">
  <id>org.example.Foo</id>
  <name>Foo</name>
  <summary>A sample application</summary>
  <description><p>Sample.</p></description>
  <icon type="stock">foo</icon>
  <categories><category>Utility</category></categories>
  <launchable type="desktop-id">org.example.Foo.desktop</launchable>
</component>
"#;

    const DESKTOP: &str =
        "[Desktop Entry]\nType=Application\nName=Foo\nComment=A desktop app\nIcon=foo\nCategories=Utility;\n";

    fn png_bytes(edge: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            edge,
            edge,
            image::Rgba([40, 40, 200, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    struct Workspace {
        _tmp: tempfile::TempDir,
        root: Utf8PathBuf,
        config: Arc<Config>,
    }

    fn build_workspace() -> Workspace {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap().to_path_buf();
        let config_json = format!(
            r#"{{
                "ProjectName": "TestOS",
                "WorkspaceDir": "{root}",
                "ArchiveRoot": "{root}/archive",
                "Backend": "plain",
                "MediaBaseUrl": "https://media.example.org",
                "Suites": {{
                    "stable": {{"sections": ["main"], "architectures": ["amd64"]}}
                }},
                "Features": {{"metadataTimestamps": false}}
            }}"#,
        );
        let config_path = root.join("asgen-config.json");
        fs::write(&config_path, config_json).unwrap();
        let config = Arc::new(Config::load(&config_path).unwrap());
        Workspace {
            _tmp: tmp,
            root,
            config,
        }
    }

    fn add_desktop_app(ws: &Workspace, name: &str, version: &str, cid: &str) {
        let arch_dir = ws.root.join("archive/stable/main/amd64");
        let pkg_dir = arch_dir.join(format!("{}-{}", name, version));
        fs::create_dir_all(pkg_dir.join("usr/share/metainfo")).unwrap();
        fs::create_dir_all(pkg_dir.join("usr/share/applications")).unwrap();
        fs::create_dir_all(pkg_dir.join("usr/share/icons/hicolor/128x128/apps")).unwrap();
        fs::write(
            pkg_dir.join(format!("usr/share/metainfo/{}.metainfo.xml", cid)),
            METAINFO
                .replace("org.example.Foo.desktop", &format!("{}.desktop", cid))
                .replace("<id>org.example.Foo</id>", &format!("<id>{}</id>", cid)),
        )
        .unwrap();
        fs::write(
            pkg_dir.join(format!("usr/share/applications/{}.desktop", cid)),
            DESKTOP,
        )
        .unwrap();
        fs::write(
            pkg_dir.join("usr/share/icons/hicolor/128x128/apps/foo.png"),
            png_bytes(128),
        )
        .unwrap();
    }

    fn add_boring_package(ws: &Workspace, name: &str, version: &str) {
        let pkg_dir = ws
            .root
            .join("archive/stable/main/amd64")
            .join(format!("{}-{}", name, version));
        fs::create_dir_all(pkg_dir.join("usr/bin")).unwrap();
        fs::write(pkg_dir.join("usr/bin").join(name), b"binary").unwrap();
    }

    fn write_index(ws: &Workspace, entries: &[(&str, &str)]) {
        let index: Vec<serde_json::Value> = entries
            .iter()
            .map(|(name, version)| serde_json::json!({"name": name, "version": version}))
            .collect();
        fs::write(
            ws.root.join("archive/stable/main/amd64/index.json"),
            serde_json::to_string(&index).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_end_to_end_run() {
        let ws = build_workspace();
        add_desktop_app(&ws, "foo", "1.0", "org.example.Foo");
        add_boring_package(&ws, "boring", "0.1");
        write_index(&ws, &[("foo", "1.0"), ("boring", "0.1")]);

        let engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        engine.run("stable", None).unwrap();

        // The catalog exists and contains the app.
        let catalog = export::read_gz(
            &ws.config
                .data_export_dir
                .join("stable/main/Components-amd64.xml.gz"),
        )
        .unwrap();
        let catalog = String::from_utf8(catalog).unwrap();
        assert!(catalog.contains("<pkgname>foo</pkgname>"));
        assert!(catalog.contains("org.example.Foo"));
        // The boring package is sticky-ignored.
        assert!(engine.dstore.is_ignored("boring/0.1/amd64").unwrap());
        // 128 px source also produced the mandatory downscaled 64x64.
        assert!(catalog.contains("width=\"64\""));
        // Hint definitions were published.
        assert!(
            ws.config
                .hints_export_dir
                .join("stable/hint-definitions.json")
                .is_file()
        );
    }

    #[test]
    fn test_idempotent_rerun() {
        let ws = build_workspace();
        add_desktop_app(&ws, "foo", "1.0", "org.example.Foo");
        write_index(&ws, &[("foo", "1.0")]);

        let engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        engine.run("stable", None).unwrap();
        let catalog_path = ws
            .config
            .data_export_dir
            .join("stable/main/Components-amd64.xml.gz");
        let first = export::read_gz(&catalog_path).unwrap();

        // Second run with unchanged input: watermark short-circuits, the
        // export bytes stay identical.
        engine.run("stable", None).unwrap();
        let second = export::read_gz(&catalog_path).unwrap();
        assert_eq!(first, second);

        // A forced run re-exports from cache, still byte-identical.
        // Release the store locks before reopening the workspace.
        drop(engine);
        let mut engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        engine.set_forced(true);
        engine.run("stable", None).unwrap();
        let third = export::read_gz(&catalog_path).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_cleanup_drops_retired_package() {
        let ws = build_workspace();
        add_desktop_app(&ws, "foo", "1.0", "org.example.Foo");
        write_index(&ws, &[("foo", "1.0")]);

        let engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        engine.run("stable", None).unwrap();
        let gcid = engine
            .dstore
            .get_gcids_for_package("foo/1.0/amd64")
            .unwrap()
            .remove(0);
        assert!(ws.config.media_pool_dir().join(&gcid).is_dir());

        // The package disappears from the index; cleanup retires it.
        write_index(&ws, &[]);
        fs::remove_dir_all(ws.root.join("archive/stable/main/amd64/foo-1.0")).unwrap();
        engine.run_cleanup().unwrap();

        assert!(!engine.dstore.package_exists("foo/1.0/amd64").unwrap());
        assert!(
            !engine
                .dstore
                .metadata_exists(MetadataType::Xml, &gcid)
                .unwrap()
        );
        assert!(!ws.config.media_pool_dir().join(&gcid).exists());
    }

    #[test]
    fn test_forget_by_name_and_pkid() {
        let ws = build_workspace();
        add_desktop_app(&ws, "foo", "1.0", "org.example.Foo");
        write_index(&ws, &[("foo", "1.0")]);

        let engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        engine.run("stable", None).unwrap();
        assert!(engine.dstore.package_exists("foo/1.0/amd64").unwrap());

        engine.forget("foo").unwrap();
        assert!(!engine.dstore.package_exists("foo/1.0/amd64").unwrap());
    }

    #[test]
    fn test_unknown_suite_fails() {
        let ws = build_workspace();
        let engine = Engine::new(Arc::clone(&ws.config)).unwrap();
        assert!(engine.run("nonexistent", None).is_err());
    }

    #[test]
    fn test_injected_metainfo() {
        let ws = build_workspace();
        add_desktop_app(&ws, "foo", "1.0", "org.example.Foo");
        write_index(&ws, &[("foo", "1.0")]);

        // Operator-provided metainfo for a web app (needs no package).
        let extra_dir = ws.root.join("extra-metainfo/stable/main");
        fs::create_dir_all(&extra_dir).unwrap();
        fs::write(
            extra_dir.join("org.example.Web.metainfo.xml"),
            r#"<component type="web-application">
  <id>org.example.Web</id>
  <name>Web Thing</name>
  <summary>A web application</summary>
  <icon type="remote" width="64" height="64">https://example.org/icon.png</icon>
  <categories><category>Network</category></categories>
</component>"#,
        )
        .unwrap();

        let config_json = format!(
            r#"{{
                "ProjectName": "TestOS",
                "WorkspaceDir": "{root}",
                "ArchiveRoot": "{root}/archive",
                "Backend": "plain",
                "ExtraMetainfoDir": "{root}/extra-metainfo",
                "Suites": {{
                    "stable": {{"sections": ["main"], "architectures": ["amd64"]}}
                }},
                "Features": {{"metadataTimestamps": false}}
            }}"#,
            root = ws.root
        );
        let config_path = ws.root.join("asgen-config2.json");
        fs::write(&config_path, config_json).unwrap();
        let config = Arc::new(Config::load(&config_path).unwrap());

        let engine = Engine::new(config).unwrap();
        engine.run("stable", None).unwrap();

        let catalog = export::read_gz(
            &ws.root
                .join("export/data/stable/main/Components-amd64.xml.gz"),
        )
        .unwrap();
        let catalog = String::from_utf8(catalog).unwrap();
        assert!(catalog.contains("org.example.Web"));
    }
}
