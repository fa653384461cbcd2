//! Per-package metadata extraction.
//!
//! One extractor instance runs on one worker thread and processes the
//! packages of its chunk sequentially. All failure modes surface as hints
//! on the produced [`GeneratorResult`], never as hard errors, so one bad
//! package cannot take down a run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use crate::backends::Package;
use crate::config::Config;
use crate::data_store::DataStore;
use crate::desktop::{self, MergeOutcome};
use crate::hints::{self, Hint, HintDefinition, HintSeverity};
use crate::icons::IconHandler;
use crate::model::{self, Component, ComponentKind};
use crate::result::{GENERAL_ID, GeneratorResult};

const APPLICATIONS_DIR: &str = "/usr/share/applications/";
const METAINFO_DIR: &str = "/usr/share/metainfo/";
const LEGACY_METAINFO_DIR: &str = "/usr/share/appdata/";

/// FontConfig is not reentrant; every font-processing call in the process
/// serializes on this lock.
pub static FONTCONFIG_MUTEX: Mutex<()> = Mutex::new(());

/// One issue reported by the external metainfo validator.
pub struct ValidatorIssue {
    pub tag: String,
    pub severity: HintSeverity,
    pub message: String,
}

/// External metainfo validator (out-of-process or library based).
pub trait MetainfoValidator: Send + Sync {
    fn validate(&self, data: &[u8]) -> Vec<ValidatorIssue>;
}

/// External screenshot fetcher/converter.
pub trait ScreenshotProcessor: Send + Sync {
    fn process(&self, res: &mut GeneratorResult, cid: &str, media_dir: &Utf8Path) -> Result<()>;
}

/// External font preview renderer; batched per package because font
/// registration is expensive.
pub trait FontProcessor: Send + Sync {
    fn process(
        &self,
        res: &mut GeneratorResult,
        cids: &[String],
        media_dir: &Utf8Path,
    ) -> Result<()>;
}

/// External translation-statistics collector.
pub trait LocaleProcessor: Send + Sync {
    fn process(&self, res: &mut GeneratorResult, cid: &str) -> Result<()>;
}

/// Optional external collaborators. All default to absent; the extraction
/// core works without any of them.
#[derive(Default)]
pub struct Collaborators {
    pub validator: Option<Box<dyn MetainfoValidator>>,
    pub screenshots: Option<Box<dyn ScreenshotProcessor>>,
    pub fonts: Option<Box<dyn FontProcessor>>,
    pub locale: Option<Box<dyn LocaleProcessor>>,
}

pub struct DataExtractor<'a> {
    dstore: &'a DataStore,
    icons: &'a IconHandler,
    config: &'a Config,
    collaborators: &'a Collaborators,
}

impl<'a> DataExtractor<'a> {
    pub fn new(
        dstore: &'a DataStore,
        icons: &'a IconHandler,
        config: &'a Config,
        collaborators: &'a Collaborators,
    ) -> Self {
        Self {
            dstore,
            icons,
            config,
            collaborators,
        }
    }

    /// Extracts all metadata from one package. Never fails; problems are
    /// recorded as hints on the result.
    pub fn process_package(&self, pkg: &Arc<dyn Package>) -> GeneratorResult {
        let mut res = GeneratorResult::new(Arc::clone(pkg));

        let contents = match pkg.contents() {
            Ok(contents) => contents,
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "pkg-extract-error",
                        &[("fname", "<contents>"), ("msg", &format!("{:#}", e))],
                    ),
                );
                return res;
            }
        };

        // Partition the interesting files.
        let mut desktop_files: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();
        let mut metainfo_files: Vec<Utf8PathBuf> = Vec::new();
        for path in contents {
            let Some(fname) = path.file_name() else {
                continue;
            };
            if path.starts_with(APPLICATIONS_DIR) && fname.ends_with(".desktop") {
                desktop_files.insert(fname.to_string(), path);
            } else if (path.starts_with(METAINFO_DIR) || path.starts_with(LEGACY_METAINFO_DIR))
                && fname.ends_with(".xml")
            {
                metainfo_files.push(path);
            }
        }

        let mut used_desktop_files: Vec<String> = Vec::new();
        for mi_path in &metainfo_files {
            self.process_metainfo(&mut res, pkg, mi_path, &desktop_files, &mut used_desktop_files);
        }

        if self.config.feature.process_desktop {
            for (basename, path) in &desktop_files {
                if used_desktop_files.iter().any(|u| u == basename) {
                    continue;
                }
                self.process_orphan_desktop(&mut res, pkg, basename, path);
            }
        }

        if self.config.feature.process_gstreamer {
            self.process_gstreamer(&mut res, pkg);
        }

        self.process_components(&mut res, pkg);
        self.finalize(&mut res);
        res
    }

    fn process_metainfo(
        &self,
        res: &mut GeneratorResult,
        pkg: &Arc<dyn Package>,
        mi_path: &Utf8Path,
        desktop_files: &BTreeMap<String, Utf8PathBuf>,
        used_desktop_files: &mut Vec<String>,
    ) {
        let mi_basename = mi_path.file_name().unwrap_or_default().to_string();
        let data = match pkg.get_file_data(mi_path) {
            Ok(data) => data,
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "pkg-extract-error",
                        &[("fname", mi_path.as_str()), ("msg", &format!("{:#}", e))],
                    ),
                );
                return;
            }
        };

        let text = String::from_utf8_lossy(&data);
        let cpt = match model::xml::parse_metainfo(&text) {
            Ok(cpt) => cpt,
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "metainfo-parsing-error",
                        &[("fname", mi_basename.as_str()), ("msg", &format!("{:#}", e))],
                    ),
                );
                return;
            }
        };
        if cpt.cid.is_empty() {
            res.add_hint(
                GENERAL_ID,
                Hint::with_vars("metainfo-no-id", &[("fname", &mi_basename)]),
            );
            return;
        }

        let cid = cpt.cid.clone();
        res.add_component(cpt, &data);
        if mi_path.starts_with(LEGACY_METAINFO_DIR) {
            res.add_hint(
                &cid,
                Hint::with_vars("legacy-metainfo-directory", &[("fname", &mi_basename)]),
            );
        }
        // Every new upload must yield fresh GCIDs so dependent artifacts
        // (screenshots and such) are refetched.
        res.update_component_gcid(&cid, pkg.version().as_bytes());

        let launchables = res
            .get_component(&cid)
            .map(|c| c.launchables_of_type("desktop-id").to_vec())
            .unwrap_or_default();
        let mut merged_desktop = false;
        for (idx, entry) in launchables.iter().enumerate() {
            let basename = resolve_desktop_name(desktop_files, entry);
            let Some(basename) = basename else {
                res.add_hint(
                    &cid,
                    Hint::with_vars("missing-launchable-desktop-file", &[("desktop_id", entry)]),
                );
                continue;
            };
            used_desktop_files.push(basename.clone());
            // Only the first launchable entry contributes data; the rest
            // are merely checked for existence.
            if idx > 0 || merged_desktop {
                continue;
            }
            merged_desktop =
                self.merge_desktop_file(res, pkg, &cid, desktop_files, &basename, true);
        }

        let needs_desktop_fallback = res.get_component(&cid).is_some_and(|c| {
            c.kind == ComponentKind::DesktopApp
                && c.stock_icon().is_none()
                && c.local_icon().is_none()
        });
        if needs_desktop_fallback && !merged_desktop {
            let fallback = resolve_desktop_name(desktop_files, &cid);
            match fallback {
                Some(basename) => {
                    used_desktop_files.push(basename.clone());
                    self.merge_desktop_file(res, pkg, &cid, desktop_files, &basename, true);
                }
                None => {
                    res.add_hint(&cid, Hint::with_vars("missing-desktop-file", &[("cid", &cid)]));
                    return;
                }
            }
        }

        if self.config.feature.validate_metainfo {
            self.validate_metainfo(res, &cid, &data);
        }
    }

    /// Merges one `.desktop` file into a component and advances the GCID
    /// with its bytes. Returns whether a merge happened.
    fn merge_desktop_file(
        &self,
        res: &mut GeneratorResult,
        pkg: &Arc<dyn Package>,
        cid: &str,
        desktop_files: &BTreeMap<String, Utf8PathBuf>,
        basename: &str,
        ignore_nodisplay: bool,
    ) -> bool {
        let Some(path) = desktop_files.get(basename) else {
            return false;
        };
        let data = match pkg.get_file_data(path) {
            Ok(data) => data,
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "pkg-extract-error",
                        &[("fname", path.as_str()), ("msg", &format!("{:#}", e))],
                    ),
                );
                return false;
            }
        };
        let Some(cpt) = res.get_component_mut(cid) else {
            return false;
        };
        match desktop::merge_desktop_data(cpt, &String::from_utf8_lossy(&data), ignore_nodisplay)
        {
            Ok(MergeOutcome::Merged) => {
                res.update_component_gcid(cid, &data);
                true
            }
            Ok(_) => false,
            Err(e) => {
                res.add_hint(
                    cid,
                    Hint::with_vars(
                        "desktop-entry-parse-error",
                        &[("fname", basename), ("msg", &format!("{:#}", e))],
                    ),
                );
                false
            }
        }
    }

    fn process_orphan_desktop(
        &self,
        res: &mut GeneratorResult,
        pkg: &Arc<dyn Package>,
        basename: &str,
        path: &Utf8Path,
    ) {
        let data = match pkg.get_file_data(path) {
            Ok(data) => data,
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "pkg-extract-error",
                        &[("fname", path.as_str()), ("msg", &format!("{:#}", e))],
                    ),
                );
                return;
            }
        };
        let cid = desktop::cid_from_desktop_filename(basename);
        match desktop::component_from_desktop_file(&cid, &String::from_utf8_lossy(&data)) {
            Ok(Some(cpt)) => {
                res.add_component(cpt, &data);
                res.update_component_gcid(&cid, pkg.version().as_bytes());
                if self.config.feature.warn_no_metainfo {
                    res.add_hint(&cid, Hint::with_vars("no-metainfo", &[("fname", basename)]));
                }
            }
            Ok(None) => {
                tracing::debug!("desktop entry {} of {} is hidden", basename, res.pkid());
            }
            Err(e) => {
                res.add_hint(
                    GENERAL_ID,
                    Hint::with_vars(
                        "desktop-entry-parse-error",
                        &[("fname", basename), ("msg", &format!("{:#}", e))],
                    ),
                );
            }
        }
    }

    fn process_gstreamer(&self, res: &mut GeneratorResult, pkg: &Arc<dyn Package>) {
        let Some(gst) = pkg.gst() else {
            return;
        };
        if gst.is_empty() {
            return;
        }
        let mut cpt = Component::new(ComponentKind::Codec, pkg.name());
        cpt.set_name("C", "GStreamer multimedia codecs");
        let summary: Vec<String> = gst.checksum_strings();
        cpt.set_summary(
            "C",
            &format!("Multimedia playback support: {}", summary.join(", ")),
        );
        let cid = cpt.cid.clone();
        res.add_component(cpt, pkg.name().as_bytes());
        for entry in &summary {
            res.update_component_gcid(&cid, entry.as_bytes());
        }
        res.update_component_gcid(&cid, pkg.version().as_bytes());
    }

    fn validate_metainfo(&self, res: &mut GeneratorResult, cid: &str, data: &[u8]) {
        let Some(validator) = self.collaborators.validator.as_ref() else {
            return;
        };
        // Skip validation when the metadata is already cached: the result
        // would be identical and validation is expensive.
        if let Some(gcid) = res.gcid_for_component(cid) {
            if let Ok(true) = self.dstore.metadata_exists(self.config.metadata_type, &gcid) {
                return;
            }
        }
        for issue in validator.validate(data) {
            let tag = format!("asv-{}", issue.tag);
            // Validator errors demote to warnings: the data is still
            // usable for the catalog even when strictly invalid.
            let severity = match issue.severity {
                HintSeverity::Error => HintSeverity::Warning,
                other => other,
            };
            hints::register_tag(HintDefinition {
                tag: tag.clone(),
                severity,
                internal: false,
                text: "Validation issue: {{msg}}".to_string(),
            });
            res.add_hint(cid, Hint::with_vars(&tag, &[("msg", &issue.message)]));
        }
    }

    /// Expensive per-component work: dedup against the cache, icons,
    /// screenshots, locale and fonts.
    fn process_components(&self, res: &mut GeneratorResult, pkg: &Arc<dyn Package>) {
        let dtype = self.config.metadata_type;
        let mut font_cids = Vec::new();

        for cid in res.component_ids() {
            if let Some(cpt) = res.get_component_mut(&cid) {
                if cpt.pkgname.is_none() {
                    cpt.pkgname = Some(pkg.name().to_string());
                }
            }

            let Some(gcid) = res.gcid_for_component(&cid) else {
                res.add_hint(
                    &cid,
                    Hint::with_vars("internal-error", &[("msg", "component has no GCID")]),
                );
                continue;
            };

            match self.dstore.metadata_exists(dtype, &gcid) {
                Ok(true) => {
                    // Same content already produced by another package?
                    let cached_pkgname = self
                        .dstore
                        .get_metadata(dtype, &gcid)
                        .ok()
                        .flatten()
                        .and_then(|blob| model::parse_collection(&blob, dtype).ok())
                        .and_then(|cpts| cpts.into_iter().next())
                        .and_then(|c| c.pkgname);
                    let kind = res
                        .get_component(&cid)
                        .map(|c| c.kind)
                        .unwrap_or(ComponentKind::Unknown);
                    match cached_pkgname {
                        Some(ref name) if name != pkg.name() && kind != ComponentKind::WebApp => {
                            res.add_hint(
                                &cid,
                                Hint::with_vars(
                                    "metainfo-duplicate-id",
                                    &[("cid", cid.as_str()), ("pkgname", name)],
                                ),
                            );
                        }
                        _ => {}
                    }
                    // Cached metadata is reused either way; skip the
                    // expensive per-component work.
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("datastore lookup failed for {}: {:#}", gcid, e);
                }
            }

            if let Err(e) = self.icons.process_component_icon(res, &cid) {
                res.add_hint(
                    &cid,
                    Hint::with_vars("internal-error", &[("msg", &format!("{:#}", e))]),
                );
            }
            if res.is_dropped(&cid) {
                continue;
            }

            if self.config.feature.store_screenshots && !self.config.feature.no_downloads {
                if let Some(screenshots) = self.collaborators.screenshots.as_ref() {
                    if let Err(e) =
                        screenshots.process(res, &cid, &self.dstore.media_pool_dir().to_path_buf())
                    {
                        res.add_hint(
                            &cid,
                            Hint::with_vars(
                                "screenshot-download-error",
                                &[("url", ""), ("msg", &format!("{:#}", e))],
                            ),
                        );
                    }
                }
            }

            if self.config.feature.process_locale {
                if let Some(locale) = self.collaborators.locale.as_ref() {
                    if let Err(e) = locale.process(res, &cid) {
                        tracing::warn!("locale processing failed for {}: {:#}", cid, e);
                    }
                }
            }

            if self.config.feature.process_fonts
                && res.get_component(&cid).map(|c| c.kind) == Some(ComponentKind::Font)
            {
                font_cids.push(cid);
            }
        }

        if !font_cids.is_empty() {
            if let Some(fonts) = self.collaborators.fonts.as_ref() {
                let _guard = FONTCONFIG_MUTEX.lock().expect("fontconfig lock poisoned");
                if let Err(e) = fonts.process(
                    res,
                    &font_cids,
                    &self.dstore.media_pool_dir().to_path_buf(),
                ) {
                    for cid in &font_cids {
                        res.add_hint(
                            cid,
                            Hint::with_vars("font-load-error", &[("fname", ""), ("msg", &format!("{:#}", e))]),
                        );
                    }
                }
            }
        }
    }

    /// Minimum-validation pass: components that cannot stand on their own
    /// in a catalog are dropped through the hint mechanism.
    fn finalize(&self, res: &mut GeneratorResult) {
        for cid in res.component_ids() {
            let Some(cpt) = res.get_component(&cid) else {
                continue;
            };
            let kind = cpt.kind;
            let has_name = cpt.name().is_some_and(|n| !n.is_empty());
            let has_summary = cpt.summary().is_some_and(|s| !s.is_empty());
            let has_pkgname = cpt.pkgname.is_some();
            let has_stored_icon = cpt.has_stored_icon();
            let has_categories = !cpt.categories.is_empty();
            let has_description = !cpt.description.is_empty();
            let is_merge = cpt.merge_kind != model::MergeKind::None;

            if is_merge {
                // Merge components only carry patch data; none of the
                // completeness rules apply.
                continue;
            }
            if kind == ComponentKind::Unknown {
                res.add_hint(&cid, Hint::new("metainfo-unknown-type"));
                continue;
            }
            if !has_name {
                res.add_hint(&cid, Hint::new("metainfo-no-name"));
                continue;
            }
            if !has_summary {
                res.add_hint(&cid, Hint::new("metainfo-no-summary"));
                continue;
            }
            if kind.needs_install_candidate() && !has_pkgname {
                res.add_hint(&cid, Hint::new("no-install-candidate"));
                continue;
            }
            if matches!(kind, ComponentKind::DesktopApp | ComponentKind::WebApp)
                && !has_categories
            {
                if !res.add_hint(&cid, Hint::new("no-valid-category")) {
                    continue;
                }
            }
            if kind.requires_icon() && !has_stored_icon {
                let tag = if kind == ComponentKind::WebApp {
                    "web-app-without-icon"
                } else {
                    "gui-app-without-icon"
                };
                if !res.add_hint(&cid, Hint::new(tag)) {
                    continue;
                }
            }
            if kind == ComponentKind::Font && !has_stored_icon {
                res.add_hint(&cid, Hint::new("font-without-icon"));
            }
            if matches!(kind, ComponentKind::DesktopApp | ComponentKind::ConsoleApp)
                && !has_description
            {
                res.add_hint(&cid, Hint::new("description-missing"));
            }

            // Custom entries are restricted to the operator allow-list.
            if let Some(cpt) = res.get_component_mut(&cid) {
                let allowed = &self.config.allowed_custom_keys;
                if !cpt.custom.is_empty() {
                    let before = cpt.custom.len();
                    cpt.custom.retain(|key, _| allowed.contains(key));
                    let filtered = before - cpt.custom.len();
                    if filtered > 0 {
                        tracing::debug!(
                            "filtered {} custom entries from {}",
                            filtered,
                            cid
                        );
                    }
                }
            }
        }
    }
}

/// Resolves a desktop-id to an actual file basename in the package:
/// exact match first, then with `.desktop` appended.
fn resolve_desktop_name(
    desktop_files: &BTreeMap<String, Utf8PathBuf>,
    wanted: &str,
) -> Option<String> {
    if desktop_files.contains_key(wanted) {
        return Some(wanted.to_string());
    }
    let with_ext = format!("{}.desktop", wanted);
    desktop_files.contains_key(&with_ext).then_some(with_ext)
}

/// Interesting-file classification used by contents seeding: packages
/// without any of these never produce metadata.
pub fn package_is_interesting(contents: &[Utf8PathBuf], has_gst: bool) -> bool {
    has_gst
        || contents.iter().any(|path| {
            path.starts_with(APPLICATIONS_DIR)
                || path.starts_with(METAINFO_DIR)
                || path.starts_with(LEGACY_METAINFO_DIR)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::GstInfo;
    use crate::backends::dummy::FakePackage;
    use crate::contents_store::ContentsStore;
    use crate::model::MetadataType;
    use std::collections::HashMap;
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

    const DESKTOP: &str = "[Desktop Entry]\nType=Application\nName=Foo\nComment=A desktop app\nIcon=foo\nCategories=Utility;\n";

    struct TestEnv {
        _tmp: tempfile::TempDir,
        config: Config,
        dstore: DataStore,
        icons: IconHandler,
    }

    fn png_bytes(edge: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            edge,
            edge,
            image::Rgba([255, 255, 255, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn build_env(pkg: &Arc<FakePackage>) -> TestEnv {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let config_path = root.join("asgen-config.json");
        std::fs::write(
            &config_path,
            format!(r#"{{"WorkspaceDir": "{}"}}"#, root),
        )
        .unwrap();
        let config = Config::load(&config_path).unwrap();
        let dstore = DataStore::open(&config.db_dir, &config.media_pool_dir()).unwrap();

        let cstore = ContentsStore::open(&config.cache_dir.join("contents")).unwrap();
        let contents = pkg.contents().unwrap();
        cstore.add_contents(&pkg.id(), &contents).unwrap();
        let mut packages: HashMap<String, Arc<dyn crate::backends::Package>> = HashMap::new();
        packages.insert(pkg.id(), pkg.clone());
        let icons = IconHandler::new(&cstore, &packages, None, &config).unwrap();

        TestEnv {
            _tmp: tmp,
            config,
            dstore,
            icons,
        }
    }

    fn desktop_app_package() -> Arc<FakePackage> {
        let pkg = Arc::new(FakePackage::new("foo", "1.0", "amd64"));
        pkg.add_file(
            "/usr/share/metainfo/org.example.Foo.metainfo.xml",
            METAINFO.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/applications/org.example.Foo.desktop",
            DESKTOP.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/icons/hicolor/128x128/apps/foo.png",
            png_bytes(128),
        );
        pkg
    }

    #[test]
    fn test_desktop_app_end_to_end() {
        let pkg = desktop_app_package();
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);

        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);

        assert_eq!(res.components_count(), 1);
        let cpt = res.get_component("org.example.Foo").unwrap();
        assert_eq!(cpt.kind, ComponentKind::DesktopApp);
        assert_eq!(cpt.pkgname.as_deref(), Some("foo"));
        assert!(cpt.has_stored_icon());
        let gcid = res.gcid_for_component("org.example.Foo").unwrap();
        assert!(gcid.starts_with("org/example/Foo/"));

        env.dstore
            .add_generator_result(&res, MetadataType::Xml, false)
            .unwrap();
        let blob = env
            .dstore
            .get_metadata(MetadataType::Xml, &gcid)
            .unwrap()
            .unwrap();
        assert!(blob.contains("<pkgname>foo</pkgname>"));
    }

    #[test]
    fn test_gcid_differs_across_versions() {
        let gcid_for_version = |version: &str| {
            let pkg = Arc::new(FakePackage::new("foo", version, "amd64"));
            pkg.add_file(
                "/usr/share/metainfo/org.example.Foo.metainfo.xml",
                METAINFO.as_bytes().to_vec(),
            );
            pkg.add_file(
                "/usr/share/applications/org.example.Foo.desktop",
                DESKTOP.as_bytes().to_vec(),
            );
            pkg.add_file(
                "/usr/share/icons/hicolor/128x128/apps/foo.png",
                png_bytes(128),
            );
            let env = build_env(&pkg);
            let collaborators = Collaborators::default();
            let extractor =
                DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
            let pkg_dyn: Arc<dyn Package> = pkg.clone();
            extractor
                .process_package(&pkg_dyn)
                .gcid_for_component("org.example.Foo")
                .unwrap()
        };
        assert_ne!(gcid_for_version("1.0"), gcid_for_version("1.1"));
    }

    #[test]
    fn test_missing_launchable_hint() {
        let pkg = Arc::new(FakePackage::new("bar", "1.0", "amd64"));
        let metainfo = METAINFO.replace("org.example.Foo.desktop", "org.example.Gone.desktop");
        pkg.add_file(
            "/usr/share/metainfo/org.example.Foo.metainfo.xml",
            metainfo.into_bytes(),
        );
        pkg.add_file(
            "/usr/share/applications/org.example.Foo.desktop",
            DESKTOP.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/icons/hicolor/64x64/apps/foo.png",
            png_bytes(64),
        );
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);

        // The hint is a warning: the component survives.
        assert!(res.get_component("org.example.Foo").is_some());
        let hints = res.hint_map().get("org.example.Foo").unwrap();
        assert!(
            hints
                .iter()
                .any(|h| h.tag == "missing-launchable-desktop-file")
        );
    }

    #[test]
    fn test_legacy_metainfo_dir_hint() {
        let pkg = Arc::new(FakePackage::new("foo", "1.0", "amd64"));
        pkg.add_file(
            "/usr/share/appdata/org.example.Foo.metainfo.xml",
            METAINFO.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/applications/org.example.Foo.desktop",
            DESKTOP.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/icons/hicolor/64x64/apps/foo.png",
            png_bytes(64),
        );
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);
        let hints = res.hint_map().get("org.example.Foo").unwrap();
        assert!(hints.iter().any(|h| h.tag == "legacy-metainfo-directory"));
        assert!(res.get_component("org.example.Foo").is_some());
    }

    #[test]
    fn test_orphan_desktop_component() {
        let pkg = Arc::new(FakePackage::new("plain", "2.0", "amd64"));
        pkg.add_file(
            "/usr/share/applications/plainapp.desktop",
            DESKTOP.as_bytes().to_vec(),
        );
        pkg.add_file(
            "/usr/share/icons/hicolor/64x64/apps/foo.png",
            png_bytes(64),
        );
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);
        assert!(res.get_component("plainapp").is_some());
    }

    #[test]
    fn test_gstreamer_codec_component() {
        let pkg = Arc::new(
            FakePackage::new("gst-plugins-weird", "1.0", "amd64").with_gst(GstInfo {
                decoders: vec!["audio/x-wma".into()],
                ..Default::default()
            }),
        );
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);
        let cpt = res.get_component("gst-plugins-weird").unwrap();
        assert_eq!(cpt.kind, ComponentKind::Codec);
        assert!(cpt.summary().unwrap().contains("audio/x-wma"));
    }

    #[test]
    fn test_duplicate_id_across_packages() {
        let pkg1 = desktop_app_package();
        let env = build_env(&pkg1);
        let collaborators = Collaborators::default();
        {
            let extractor =
                DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
            let pkg_dyn: Arc<dyn Package> = pkg1.clone();
            let res = extractor.process_package(&pkg_dyn);
            env.dstore
                .add_generator_result(&res, MetadataType::Xml, false)
                .unwrap();
        }

        // A different package shipping the identical metainfo at the same
        // version: the GCID collides, the pkgname differs.
        let pkg2 = Arc::new(FakePackage::new("foo-ng", "1.0", "amd64"));
        pkg2.add_file(
            "/usr/share/metainfo/org.example.Foo.metainfo.xml",
            METAINFO.as_bytes().to_vec(),
        );
        pkg2.add_file(
            "/usr/share/applications/org.example.Foo.desktop",
            DESKTOP.as_bytes().to_vec(),
        );
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg2.clone();
        let res = extractor.process_package(&pkg_dyn);
        assert!(res.is_dropped("org.example.Foo"));
        let hints = res.hint_map().get("org.example.Foo").unwrap();
        assert!(hints.iter().any(|h| h.tag == "metainfo-duplicate-id"));
    }

    #[test]
    fn test_no_category_drops_desktop_app() {
        let pkg = Arc::new(FakePackage::new("foo", "1.0", "amd64"));
        let metainfo = METAINFO.replace(
            "<categories><category>Utility</category></categories>",
            "",
        );
        let desktop = DESKTOP.replace("Categories=Utility;\n", "");
        pkg.add_file(
            "/usr/share/metainfo/org.example.Foo.metainfo.xml",
            metainfo.into_bytes(),
        );
        pkg.add_file(
            "/usr/share/applications/org.example.Foo.desktop",
            desktop.into_bytes(),
        );
        pkg.add_file(
            "/usr/share/icons/hicolor/64x64/apps/foo.png",
            png_bytes(64),
        );
        let env = build_env(&pkg);
        let collaborators = Collaborators::default();
        let extractor =
            DataExtractor::new(&env.dstore, &env.icons, &env.config, &collaborators);
        let pkg_dyn: Arc<dyn Package> = pkg.clone();
        let res = extractor.process_package(&pkg_dyn);
        assert!(res.is_dropped("org.example.Foo"));
    }

    #[test]
    fn test_interesting_classification() {
        assert!(package_is_interesting(
            &[Utf8PathBuf::from("/usr/share/applications/x.desktop")],
            false
        ));
        assert!(package_is_interesting(
            &[Utf8PathBuf::from("/usr/share/appdata/x.xml")],
            false
        ));
        assert!(package_is_interesting(&[], true));
        assert!(!package_is_interesting(
            &[Utf8PathBuf::from("/usr/bin/x")],
            false
        ));
    }
}
