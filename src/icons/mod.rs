//! Icon resolution, rendering and storage.
//!
//! For every component with a preliminary icon the handler walks the
//! packaged XDG themes, picks source files for all enabled sizes, renders
//! them to PNG and places them in the content-addressed media pool.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::backends::{Package, PackageKind};
use crate::config::{Config, DEFAULT_ICON_SIZE, IconPolicyEntry, IconState};
use crate::contents_store::ContentsStore;
use crate::hints::Hint;
use crate::model::Icon;
use crate::result::GeneratorResult;
use crate::utils::{ImageSize, ensure_dir};

pub mod render;
pub mod theme;

use render::{IconFormat, load_icon_image, optimize_png, scale_to_png};
use theme::Theme;

/// Search order for packaged icon themes; the configured suite theme is
/// inserted after hicolor.
const EXTRA_THEMES: &[&str] = &["Adwaita", "AdwaitaLegacy", "breeze"];

/// Extensions accepted for non-themed (pixmap) icon sources.
const PIXMAP_EXTENSIONS: &[&str] = &["png", "jpg", "svgz", "svg", "xpm"];

const FALLBACK_HICOLOR_INDEX: &str = include_str!("../../data/hicolor-index.theme");

#[derive(Clone)]
struct IconCandidate {
    path: Utf8PathBuf,
    pkg: Arc<dyn Package>,
}

pub struct IconHandler {
    themes: Vec<Theme>,
    icon_files: HashMap<Utf8PathBuf, Arc<dyn Package>>,
    policy: Vec<IconPolicyEntry>,
    media_pool_dir: Utf8PathBuf,
    allow_upscaling: bool,
    optimize_png: bool,
}

impl IconHandler {
    /// Builds the per-section icon index: all icon files of the given
    /// packages plus every parseable packaged theme.
    #[context("building icon handler")]
    pub fn new(
        cstore: &ContentsStore,
        packages: &HashMap<String, Arc<dyn Package>>,
        suite_theme: Option<&str>,
        config: &Config,
    ) -> Result<Self> {
        let pkids: HashSet<String> = packages.keys().cloned().collect();
        let files_map = cstore.get_icon_files_map(&pkids)?;

        let mut icon_files = HashMap::new();
        for (path, pkid) in files_map {
            if let Some(pkg) = packages.get(&pkid) {
                icon_files.insert(path, Arc::clone(pkg));
            }
        }

        let mut theme_names: Vec<&str> = vec!["hicolor"];
        if let Some(name) = suite_theme {
            if !theme_names.contains(&name) {
                theme_names.push(name);
            }
        }
        for name in EXTRA_THEMES {
            if !theme_names.contains(name) {
                theme_names.push(name);
            }
        }

        let mut themes = Vec::new();
        for name in theme_names {
            let index_path =
                Utf8PathBuf::from(format!("/usr/share/icons/{}/index.theme", name));
            match icon_files.get(&index_path) {
                Some(pkg) => {
                    let data = pkg
                        .get_file_data(&index_path)
                        .with_context(|| format!("read index for theme '{}'", name))?;
                    match Theme::new(name, &String::from_utf8_lossy(&data)) {
                        Ok(theme) => themes.push(theme),
                        Err(e) => {
                            tracing::warn!("ignoring broken theme index '{}': {:#}", name, e)
                        }
                    }
                }
                None if name == "hicolor" => {
                    // No packaged hicolor: fall back to the bundled index
                    // so plain /usr/share/icons/hicolor files stay usable.
                    themes.push(
                        Theme::new("hicolor", FALLBACK_HICOLOR_INDEX)
                            .expect("bundled hicolor index is valid"),
                    );
                }
                None => {}
            }
        }

        Ok(Self {
            themes,
            icon_files,
            policy: config
                .icon_policy()
                .iter()
                .filter(|e| e.state != IconState::Ignored)
                .copied()
                .collect(),
            media_pool_dir: config.media_pool_dir(),
            allow_upscaling: config.feature.allow_icon_upscaling,
            optimize_png: config.feature.optimize_png_size,
        })
    }

    pub fn themes_count(&self) -> usize {
        self.themes.len()
    }

    fn policy_for(&self, size: ImageSize) -> Option<&IconPolicyEntry> {
        self.policy.iter().find(|e| e.size == size)
    }

    /// Finds a source file for `icon_name` at the wanted size. Files from
    /// `own` (the component's package) win over the section-wide index.
    fn find_candidate(
        &self,
        own: &HashMap<Utf8PathBuf, Arc<dyn Package>>,
        icon_name: &str,
        size: ImageSize,
        relaxed: bool,
    ) -> Option<IconCandidate> {
        for map in [own, &self.icon_files] {
            for theme in &self.themes {
                for path in theme.matching_icon_filenames(icon_name, size, relaxed) {
                    let path = Utf8PathBuf::from(path);
                    if let Some(pkg) = map.get(&path) {
                        return Some(IconCandidate {
                            path,
                            pkg: Arc::clone(pkg),
                        });
                    }
                }
            }
        }
        // Last resort for the default size: unthemed pixmaps.
        if size == DEFAULT_ICON_SIZE {
            for ext in PIXMAP_EXTENSIONS {
                let path = Utf8PathBuf::from(format!("/usr/share/pixmaps/{}.{}", icon_name, ext));
                for map in [own, &self.icon_files] {
                    if let Some(pkg) = map.get(&path) {
                        return Some(IconCandidate {
                            path,
                            pkg: Arc::clone(pkg),
                        });
                    }
                }
            }
        }
        None
    }

    /// Icon files of one package, for preferred lookups.
    fn own_icon_files(&self, pkg: &Arc<dyn Package>) -> HashMap<Utf8PathBuf, Arc<dyn Package>> {
        let Ok(contents) = pkg.contents() else {
            return HashMap::new();
        };
        contents
            .into_iter()
            .filter(|p| {
                p.starts_with("/usr/share/icons/") || p.starts_with("/usr/share/pixmaps/")
            })
            .map(|p| (p, Arc::clone(pkg)))
            .collect()
    }

    /// Runs icon processing for one component; emits hints and attaches
    /// icon entries on the component in `res`.
    pub fn process_component_icon(&self, res: &mut GeneratorResult, cid: &str) -> Result<()> {
        let Some(cpt) = res.get_component(cid) else {
            return Ok(());
        };
        if cpt.has_stored_icon() {
            return Ok(());
        }

        if let Some(path) = cpt.local_icon().map(String::from) {
            return self.process_local_icon(res, cid, &path);
        }

        let Some(stock_name) = cpt.stock_icon().map(String::from) else {
            // Nothing to resolve; kinds that require an icon are dropped
            // later during finalization.
            return Ok(());
        };
        // Tolerate logical names carrying a file extension.
        let icon_name = match IconFormat::from_filename(&stock_name) {
            Some(_) => stock_name
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or(stock_name.clone()),
            None => stock_name.clone(),
        };

        let pkg = Arc::clone(res.pkg());
        let own = self.own_icon_files(&pkg);

        let mut candidates: BTreeMap<ImageSize, IconCandidate> = BTreeMap::new();
        for entry in &self.policy {
            if let Some(c) = self.find_candidate(&own, &icon_name, entry.size, false) {
                candidates.insert(entry.size, c);
            }
        }
        // Unmet sizes: a relaxed pass accepts any directory at least as
        // large, the render step downscales.
        for entry in &self.policy {
            if candidates.contains_key(&entry.size) {
                continue;
            }
            if let Some(c) = self.find_candidate(&own, &icon_name, entry.size, true) {
                candidates.insert(entry.size, c);
            }
        }

        let mut stored_any = false;
        let mut default_stored = false;
        for entry in &self.policy {
            let Some(candidate) = candidates.get(&entry.size) else {
                continue;
            };
            if !self.store_icon(res, cid, candidate.clone(), entry.size, false)? {
                // The component may have been dropped by a hint.
                if res.is_dropped(cid) {
                    return Ok(());
                }
                continue;
            }
            stored_any = true;
            if entry.size == DEFAULT_ICON_SIZE {
                default_stored = true;
            }
        }

        // The default size must exist. Upscaling is a last resort and
        // only permitted from sources of at least 48px.
        if !default_stored && self.allow_upscaling {
            let upscale_source = self
                .policy
                .iter()
                .filter(|e| e.size.scale == 1 && e.size.width < DEFAULT_ICON_SIZE.width)
                .filter_map(|e| candidates.get(&e.size).map(|c| (e.size, c)))
                .filter(|(size, _)| size.width >= 48)
                .max_by_key(|(size, _)| size.width);
            if let Some((_, candidate)) = upscale_source {
                if self.store_icon(res, cid, candidate.clone(), DEFAULT_ICON_SIZE, true)? {
                    stored_any = true;
                    default_stored = true;
                }
                if res.is_dropped(cid) {
                    return Ok(());
                }
            }
        }

        if !default_stored {
            res.add_hint(
                cid,
                Hint::with_vars("icon-not-found", &[("icon_name", &icon_name)]),
            );
            return Ok(());
        }
        if stored_any {
            self.ensure_stock_entry(res, cid, &icon_name);
        }
        Ok(())
    }

    /// Icons referenced by absolute path are only stored at the default
    /// size, from the component's own package.
    fn process_local_icon(
        &self,
        res: &mut GeneratorResult,
        cid: &str,
        path: &str,
    ) -> Result<()> {
        let pkg = Arc::clone(res.pkg());
        let candidate = IconCandidate {
            path: Utf8PathBuf::from(path),
            pkg,
        };
        let icon_name = candidate
            .path
            .file_stem()
            .unwrap_or("icon")
            .to_string();
        if self.store_icon(res, cid, candidate, DEFAULT_ICON_SIZE, false)? {
            self.ensure_stock_entry(res, cid, &icon_name);
        } else if !res.is_dropped(cid) {
            res.add_hint(
                cid,
                Hint::with_vars("icon-not-found", &[("icon_name", path)]),
            );
        }
        Ok(())
    }

    fn ensure_stock_entry(&self, res: &mut GeneratorResult, cid: &str, icon_name: &str) {
        if let Some(cpt) = res.get_component_mut(cid) {
            if cpt.stock_icon().is_none() {
                cpt.icons.push(Icon::Stock {
                    name: icon_name.to_string(),
                });
            }
        }
    }

    /// Renders one source file at one target size and stores it in the
    /// media pool. Returns whether an icon was attached.
    fn store_icon(
        &self,
        res: &mut GeneratorResult,
        cid: &str,
        candidate: IconCandidate,
        size: ImageSize,
        deliberate_upscale: bool,
    ) -> Result<bool> {
        let Some(gcid) = res.gcid_for_component(cid) else {
            res.add_hint(
                cid,
                Hint::with_vars("internal-error", &[("msg", "component has no GCID")]),
            );
            return Ok(false);
        };
        let Some(policy) = self.policy_for(size).copied() else {
            return Ok(false);
        };

        let fname = candidate.path.file_name().unwrap_or("icon");
        let Some(format) = IconFormat::from_filename(fname) else {
            res.add_hint(
                cid,
                Hint::with_vars("icon-format-unsupported", &[("fname", fname)]),
            );
            return Ok(false);
        };

        let data = match candidate.pkg.get_file_data(&candidate.path) {
            Ok(data) => data,
            Err(e) => {
                res.add_hint(
                    cid,
                    Hint::with_vars(
                        "pkg-extract-error",
                        &[("fname", candidate.path.as_str()), ("msg", &format!("{:#}", e))],
                    ),
                );
                return Ok(false);
            }
        };

        let img = match load_icon_image(&data, format, size) {
            Ok(img) => img,
            Err(e) => {
                res.add_hint(
                    cid,
                    Hint::with_vars(
                        "icon-format-unsupported",
                        &[("fname", fname), ("msg", &format!("{:#}", e))],
                    ),
                );
                return Ok(false);
            }
        };

        if !format.is_vector() {
            // XPM pixmaps below 48px are not worth processing at all.
            if format == IconFormat::Xpm && (img.width() < 48 || img.height() < 48) {
                res.add_hint(
                    cid,
                    Hint::with_vars("icon-too-small", &[("icon_name", fname)]),
                );
                return Ok(false);
            }
            if size == DEFAULT_ICON_SIZE && (img.width() < 48 || img.height() < 48) {
                res.add_hint(
                    cid,
                    Hint::with_vars("icon-too-small", &[("icon_name", fname)]),
                );
                return Ok(false);
            }
            let target_edge = size.width * size.scale;
            if img.width() < target_edge {
                if !deliberate_upscale {
                    // Quietly skip: a smaller source must not be blown up
                    // to satisfy a non-default size.
                    if size != DEFAULT_ICON_SIZE {
                        return Ok(false);
                    }
                }
                res.add_hint(
                    cid,
                    Hint::with_vars(
                        "icon-scaled-up",
                        &[
                            ("icon_name", fname),
                            ("icon_size", &format!("{}x{}", img.width(), img.height())),
                        ],
                    ),
                );
            }
        }
        let png = scale_to_png(&img, size)?;

        // Icon file names are made unique across components by a package
        // name prefix; synthetic packages skip it.
        let stem = candidate.path.file_stem().unwrap_or("icon");
        let target_name = if candidate.pkg.kind() == PackageKind::Fake {
            format!("{}.png", stem)
        } else {
            format!("{}_{}.png", candidate.pkg.name(), stem)
        };

        let size_dir = self
            .media_pool_dir
            .join(&gcid)
            .join("icons")
            .join(size.to_string());
        ensure_dir(&size_dir)?;
        let target = size_dir.join(&target_name);
        fs::write(&target, &png).with_context(|| format!("write icon {}", target))?;
        if self.optimize_png {
            optimize_png(&target);
        }

        let Some(cpt) = res.get_component_mut(cid) else {
            return Ok(false);
        };
        if policy.state.stores_cached() {
            cpt.icons.push(Icon::Cached {
                name: target_name.clone(),
                width: size.width,
                height: size.height,
                scale: size.scale,
            });
        }
        if policy.state.stores_remote() {
            cpt.icons.push(Icon::Remote {
                url: format!("{}/icons/{}/{}", gcid, size, target_name),
                width: size.width,
                height: size.height,
                scale: size.scale,
            });
        }
        tracing::debug!("stored icon {} at {} for {}", target_name, size, cid);
        Ok(true)
    }
}
