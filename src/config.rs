//! Run configuration, loaded once from a JSON file and immutable
//! afterwards. Shared across the engine and all workers as `Arc<Config>`.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

use crate::icons::render::optipng_available;
use crate::model::MetadataType;
use crate::utils::ImageSize;

/// Storage policy for one icon size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconState {
    Ignored,
    CachedOnly,
    RemoteOnly,
    CachedRemote,
}

impl IconState {
    pub fn stores_cached(self) -> bool {
        matches!(self, IconState::CachedOnly | IconState::CachedRemote)
    }

    pub fn stores_remote(self) -> bool {
        matches!(self, IconState::RemoteOnly | IconState::CachedRemote)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IconPolicyEntry {
    pub size: ImageSize,
    pub state: IconState,
}

/// The icon size every catalog entry must provide.
pub const DEFAULT_ICON_SIZE: ImageSize = ImageSize::square(64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Unpacked package trees with a JSON index (tests, small archives).
    Plain,
}

impl BackendKind {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | "plain" => Ok(BackendKind::Plain),
            other => bail!("unknown backend '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub sections: Vec<String>,
    pub architectures: Vec<String>,
    pub base_suite: Option<String>,
    pub icon_theme: Option<String>,
    pub data_priority: i32,
    pub immutable: bool,
    pub extra_metainfo_dir: Option<Utf8PathBuf>,
}

/// Optional behavior toggles, `Features` in the config file.
#[derive(Debug, Clone)]
pub struct Features {
    pub validate_metainfo: bool,
    pub process_desktop: bool,
    pub no_downloads: bool,
    pub store_screenshots: bool,
    pub optimize_png_size: bool,
    pub metadata_timestamps: bool,
    pub immutable_suites: bool,
    pub process_fonts: bool,
    pub allow_icon_upscaling: bool,
    pub process_gstreamer: bool,
    pub process_locale: bool,
    pub screenshot_videos: bool,
    pub propagate_metainfo_artifacts: bool,
    pub warn_no_metainfo: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            validate_metainfo: true,
            process_desktop: true,
            no_downloads: false,
            store_screenshots: true,
            optimize_png_size: true,
            metadata_timestamps: true,
            immutable_suites: true,
            process_fonts: true,
            allow_icon_upscaling: false,
            process_gstreamer: true,
            process_locale: true,
            screenshot_videos: true,
            propagate_metainfo_artifacts: false,
            warn_no_metainfo: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteJson {
    #[serde(default)]
    sections: Vec<String>,
    #[serde(default)]
    architectures: Vec<String>,
    #[serde(rename = "baseSuite")]
    base_suite: Option<String>,
    #[serde(rename = "useIconTheme")]
    use_icon_theme: Option<String>,
    #[serde(rename = "dataPriority", default)]
    data_priority: i32,
    #[serde(default)]
    immutable: bool,
    #[serde(rename = "extraMetainfoDir")]
    extra_metainfo_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IconFlagsJson {
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    remote: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExportDirsJson {
    #[serde(rename = "Media")]
    media: Option<String>,
    #[serde(rename = "Data")]
    data: Option<String>,
    #[serde(rename = "Hints")]
    hints: Option<String>,
    #[serde(rename = "Html")]
    html: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigJson {
    #[serde(rename = "ProjectName")]
    project_name: Option<String>,
    #[serde(rename = "WorkspaceDir")]
    workspace_dir: Option<String>,
    #[serde(rename = "ArchiveRoot")]
    archive_root: Option<String>,
    #[serde(rename = "MediaBaseUrl")]
    media_base_url: Option<String>,
    #[serde(rename = "HtmlBaseUrl")]
    html_base_url: Option<String>,
    #[serde(rename = "MetadataType")]
    metadata_type: Option<String>,
    #[serde(rename = "FormatVersion")]
    format_version: Option<String>,
    #[serde(rename = "Backend")]
    backend: Option<String>,
    #[serde(rename = "Suites", default)]
    suites: BTreeMap<String, SuiteJson>,
    #[serde(rename = "Oldsuites", default)]
    oldsuites: Vec<String>,
    #[serde(rename = "ExtraMetainfoDir")]
    extra_metainfo_dir: Option<String>,
    #[serde(rename = "ExportDirs", default)]
    export_dirs: ExportDirsJson,
    #[serde(rename = "Icons", default)]
    icons: BTreeMap<String, IconFlagsJson>,
    #[serde(rename = "MaxVideoFileSize")]
    max_video_file_size: Option<u64>,
    #[serde(rename = "AllowedCustomKeys", default)]
    allowed_custom_keys: Vec<String>,
    #[serde(rename = "CAInfo")]
    cainfo: Option<String>,
    #[serde(rename = "Features", default)]
    features: BTreeMap<String, bool>,
}

#[derive(Debug)]
pub struct Config {
    pub project_name: String,
    pub archive_root: Utf8PathBuf,
    pub media_base_url: String,
    pub html_base_url: String,
    pub metadata_type: MetadataType,
    pub format_version: String,
    pub backend: BackendKind,
    pub workspace_dir: Utf8PathBuf,
    pub db_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub export_dir: Utf8PathBuf,
    pub media_export_dir: Utf8PathBuf,
    pub data_export_dir: Utf8PathBuf,
    pub hints_export_dir: Utf8PathBuf,
    pub html_export_dir: Utf8PathBuf,
    pub suites: Vec<Suite>,
    pub oldsuites: Vec<String>,
    pub extra_metainfo_dir: Option<Utf8PathBuf>,
    pub allowed_custom_keys: HashSet<String>,
    pub max_video_file_size_mib: u64,
    pub cainfo: Option<String>,
    pub feature: Features,
    icon_policy: Vec<IconPolicyEntry>,
}

impl Config {
    #[context("loading configuration from {path}")]
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("read {}", path))?;
        let json: ConfigJson =
            serde_json::from_str(&data).with_context(|| format!("parse {}", path))?;
        let base_dir = path.parent().unwrap_or(Utf8Path::new(".")).to_path_buf();
        Self::from_json(json, &base_dir)
    }

    fn from_json(json: ConfigJson, base_dir: &Utf8Path) -> Result<Self> {
        let workspace_dir = match json.workspace_dir {
            Some(dir) => absolute_path(base_dir, &dir),
            None => base_dir.to_path_buf(),
        };

        let metadata_type = match json.metadata_type.as_deref() {
            None | Some("xml") | Some("XML") => MetadataType::Xml,
            Some("yaml") | Some("YAML") => MetadataType::Yaml,
            Some(other) => bail!("unknown metadata type '{}'", other),
        };

        let mut suites = Vec::new();
        for (name, sjson) in json.suites {
            // "pool" clashes with the media pool directory layout.
            if name == "pool" {
                bail!("the suite name 'pool' is reserved");
            }
            suites.push(Suite {
                name,
                sections: sjson.sections,
                architectures: sjson.architectures,
                base_suite: sjson.base_suite,
                icon_theme: sjson.use_icon_theme,
                data_priority: sjson.data_priority,
                immutable: sjson.immutable,
                extra_metainfo_dir: sjson
                    .extra_metainfo_dir
                    .map(|d| absolute_path(base_dir, &d)),
            });
        }

        let mut feature = Features::default();
        for (key, value) in &json.features {
            match key.as_str() {
                "validateMetainfo" => feature.validate_metainfo = *value,
                "processDesktop" => feature.process_desktop = *value,
                "noDownloads" => feature.no_downloads = *value,
                "createScreenshotsStore" => feature.store_screenshots = *value,
                "optimizePNGSize" => feature.optimize_png_size = *value,
                "metadataTimestamps" => feature.metadata_timestamps = *value,
                "immutableSuites" => feature.immutable_suites = *value,
                "processFonts" => feature.process_fonts = *value,
                "allowIconUpscaling" => feature.allow_icon_upscaling = *value,
                "processGStreamer" => feature.process_gstreamer = *value,
                "processLocale" => feature.process_locale = *value,
                "screenshotVideos" => feature.screenshot_videos = *value,
                "propagateMetaInfoArtifacts" => feature.propagate_metainfo_artifacts = *value,
                "warnNoMetaInfo" => feature.warn_no_metainfo = *value,
                other => tracing::warn!("unknown feature flag '{}' ignored", other),
            }
        }
        if feature.optimize_png_size && !optipng_available() {
            tracing::debug!("optipng not found, disabling PNG size optimization");
            feature.optimize_png_size = false;
        }

        let mut icon_policy = Vec::new();
        if json.icons.is_empty() {
            for edge in [48u32, 64, 128] {
                icon_policy.push(IconPolicyEntry {
                    size: ImageSize::square(edge),
                    state: IconState::CachedOnly,
                });
            }
        } else {
            for (size_str, flags) in &json.icons {
                let size = ImageSize::parse(size_str)
                    .with_context(|| format!("bad icon size key '{}'", size_str))?;
                let state = match (flags.cached, flags.remote) {
                    (true, true) => IconState::CachedRemote,
                    (true, false) => IconState::CachedOnly,
                    (false, true) => IconState::RemoteOnly,
                    (false, false) => IconState::Ignored,
                };
                icon_policy.push(IconPolicyEntry { size, state });
            }
        }
        // The default size must always exist with cached storage, the
        // catalog contract depends on it.
        match icon_policy
            .iter_mut()
            .find(|e| e.size == DEFAULT_ICON_SIZE)
        {
            Some(entry) => {
                if !entry.state.stores_cached() {
                    entry.state = match entry.state {
                        IconState::RemoteOnly => IconState::CachedRemote,
                        _ => IconState::CachedOnly,
                    };
                }
            }
            None => icon_policy.push(IconPolicyEntry {
                size: DEFAULT_ICON_SIZE,
                state: IconState::CachedOnly,
            }),
        }
        icon_policy.sort_by_key(|e| (e.size.width, e.size.scale));

        let export_dir = workspace_dir.join("export");
        let resolve_export = |over: &Option<String>, default: Utf8PathBuf| match over {
            Some(dir) => absolute_path(base_dir, dir),
            None => default,
        };
        let media_export_dir =
            resolve_export(&json.export_dirs.media, export_dir.join("media"));
        let data_export_dir = resolve_export(&json.export_dirs.data, export_dir.join("data"));
        let hints_export_dir =
            resolve_export(&json.export_dirs.hints, export_dir.join("hints"));
        let html_export_dir = resolve_export(&json.export_dirs.html, export_dir.join("html"));

        Ok(Self {
            project_name: json.project_name.unwrap_or_else(|| "Unknown".to_string()),
            archive_root: json
                .archive_root
                .map(|d| absolute_path(base_dir, &d))
                .unwrap_or_else(|| base_dir.join("archive")),
            media_base_url: json.media_base_url.unwrap_or_default(),
            html_base_url: json.html_base_url.unwrap_or_default(),
            metadata_type,
            format_version: json.format_version.unwrap_or_else(|| "0.16".to_string()),
            backend: BackendKind::from_name(json.backend.as_deref().unwrap_or_default())?,
            db_dir: workspace_dir.join("db"),
            cache_dir: workspace_dir.join("cache"),
            export_dir,
            media_export_dir,
            data_export_dir,
            hints_export_dir,
            html_export_dir,
            workspace_dir,
            suites,
            oldsuites: json.oldsuites,
            extra_metainfo_dir: json.extra_metainfo_dir.map(|d| absolute_path(base_dir, &d)),
            allowed_custom_keys: json.allowed_custom_keys.into_iter().collect(),
            max_video_file_size_mib: json.max_video_file_size.unwrap_or(512),
            cainfo: json.cainfo,
            feature,
            icon_policy,
        })
    }

    pub fn suite(&self, name: &str) -> Option<&Suite> {
        self.suites.iter().find(|s| s.name == name)
    }

    /// Icon policy entries, ascending by size; includes the mandatory
    /// 64x64 cached entry.
    pub fn icon_policy(&self) -> &[IconPolicyEntry] {
        &self.icon_policy
    }

    /// Sizes whose icons are packed into per-section tarballs.
    pub fn cached_icon_sizes(&self) -> Vec<ImageSize> {
        self.icon_policy
            .iter()
            .filter(|e| e.state.stores_cached())
            .map(|e| e.size)
            .collect()
    }

    /// Canonical content-addressed media location.
    pub fn media_pool_dir(&self) -> Utf8PathBuf {
        self.media_export_dir.join("pool")
    }

    /// Per-suite pinned media location.
    pub fn suite_media_dir(&self, suite: &str) -> Utf8PathBuf {
        self.media_export_dir.join(suite)
    }
}

fn absolute_path(base: &Utf8Path, value: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_config(json: &str) -> Result<Config> {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("asgen-config.json");
        fs::write(&path, json).unwrap();
        Config::load(Utf8Path::from_path(&path).unwrap())
    }

    #[test]
    fn test_minimal_config() {
        let config = load_config(
            r#"{
                "ProjectName": "TestDistro",
                "Backend": "plain",
                "Suites": {
                    "stable": {"sections": ["main"], "architectures": ["amd64"]}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.project_name, "TestDistro");
        assert_eq!(config.metadata_type, MetadataType::Xml);
        assert_eq!(config.format_version, "0.16");
        assert_eq!(config.backend, BackendKind::Plain);
        assert_eq!(config.suites.len(), 1);
        assert!(config.db_dir.ends_with("db"));
        // Default policy always contains the mandatory size as cached.
        assert!(
            config
                .icon_policy()
                .iter()
                .any(|e| e.size == DEFAULT_ICON_SIZE && e.state.stores_cached())
        );
    }

    #[test]
    fn test_pool_suite_rejected() {
        let err = load_config(r#"{"Suites": {"pool": {}}}"#).unwrap_err();
        assert!(err.to_string().contains("configuration"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(load_config(r#"{"Backend": "imaginary"}"#).is_err());
    }

    #[test]
    fn test_icon_policy_injection() {
        let config = load_config(
            r#"{
                "Icons": {
                    "128x128": {"cached": true, "remote": true},
                    "64x64": {"remote": true}
                }
            }"#,
        )
        .unwrap();
        let entry = config
            .icon_policy()
            .iter()
            .find(|e| e.size == DEFAULT_ICON_SIZE)
            .unwrap();
        // Remote-only on the default size gets cached storage added.
        assert_eq!(entry.state, IconState::CachedRemote);
        // Sorted ascending.
        assert!(config.icon_policy()[0].size.width <= config.icon_policy()[1].size.width);
    }

    #[test]
    fn test_yaml_metadata_type_and_features() {
        let config = load_config(
            r#"{
                "MetadataType": "yaml",
                "Features": {"validateMetainfo": false, "allowIconUpscaling": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.metadata_type, MetadataType::Yaml);
        assert!(!config.feature.validate_metainfo);
        assert!(config.feature.allow_icon_upscaling);
        // Untouched flags keep their defaults.
        assert!(config.feature.process_desktop);
    }
}
