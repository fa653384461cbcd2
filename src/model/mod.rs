//! The AppStream component object model produced by the extractor and
//! consumed by the XML/YAML serializers.

use std::collections::BTreeMap;

pub mod xml;
pub mod yaml;

pub type LocalizedText = BTreeMap<String, String>;

/// Locale key for untranslated values.
pub const LOCALE_C: &str = "C";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    Unknown,
    Generic,
    DesktopApp,
    ConsoleApp,
    WebApp,
    Addon,
    Font,
    Codec,
    InputMethod,
    OperatingSystem,
    Repository,
    Runtime,
    Driver,
    Firmware,
    Service,
    Localization,
    IconTheme,
}

impl ComponentKind {
    pub fn from_str(s: &str) -> Self {
        match s {
            // Legacy metainfo type names are folded into their modern kinds.
            "generic" | "" => ComponentKind::Generic,
            "desktop-application" | "desktop-app" | "desktop" => ComponentKind::DesktopApp,
            "console-application" | "console-app" | "console" => ComponentKind::ConsoleApp,
            "web-application" | "web-app" => ComponentKind::WebApp,
            "addon" => ComponentKind::Addon,
            "font" => ComponentKind::Font,
            "codec" => ComponentKind::Codec,
            "inputmethod" | "input-method" => ComponentKind::InputMethod,
            "operating-system" => ComponentKind::OperatingSystem,
            "repository" => ComponentKind::Repository,
            "runtime" => ComponentKind::Runtime,
            "driver" => ComponentKind::Driver,
            "firmware" => ComponentKind::Firmware,
            "service" => ComponentKind::Service,
            "localization" => ComponentKind::Localization,
            "icon-theme" => ComponentKind::IconTheme,
            _ => ComponentKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Unknown => "unknown",
            ComponentKind::Generic => "generic",
            ComponentKind::DesktopApp => "desktop-application",
            ComponentKind::ConsoleApp => "console-application",
            ComponentKind::WebApp => "web-application",
            ComponentKind::Addon => "addon",
            ComponentKind::Font => "font",
            ComponentKind::Codec => "codec",
            ComponentKind::InputMethod => "inputmethod",
            ComponentKind::OperatingSystem => "operating-system",
            ComponentKind::Repository => "repository",
            ComponentKind::Runtime => "runtime",
            ComponentKind::Driver => "driver",
            ComponentKind::Firmware => "firmware",
            ComponentKind::Service => "service",
            ComponentKind::Localization => "localization",
            ComponentKind::IconTheme => "icon-theme",
        }
    }

    /// Kinds that must resolve to an installable package to be useful in a
    /// catalog.
    pub fn needs_install_candidate(self) -> bool {
        !matches!(
            self,
            ComponentKind::WebApp | ComponentKind::OperatingSystem | ComponentKind::Repository
        )
    }

    /// Kinds whose catalog entry is required to carry an icon.
    pub fn requires_icon(self) -> bool {
        matches!(self, ComponentKind::DesktopApp | ComponentKind::WebApp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeKind {
    #[default]
    None,
    Replace,
    RemoveComponent,
}

impl MergeKind {
    pub fn from_str(s: &str) -> Self {
        match s {
            "replace" => MergeKind::Replace,
            "remove-component" => MergeKind::RemoveComponent,
            _ => MergeKind::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MergeKind::None => "none",
            MergeKind::Replace => "replace",
            MergeKind::RemoveComponent => "remove-component",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Icon {
    Stock {
        name: String,
    },
    Cached {
        name: String,
        width: u32,
        height: u32,
        scale: u32,
    },
    Remote {
        url: String,
        width: u32,
        height: u32,
        scale: u32,
    },
    /// Absolute path inside the originating package; only valid before
    /// icon processing ran.
    Local {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Release {
    pub version: String,
    pub date: Option<String>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageKind {
    #[default]
    Source,
    Thumbnail,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub kind: ImageKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Screenshot {
    pub default: bool,
    pub captions: LocalizedText,
    pub images: Vec<Image>,
}

/// One software catalog entry.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub kind: ComponentKind,
    pub cid: String,
    pub merge_kind: MergeKind,
    pub pkgname: Option<String>,
    pub source_pkgname: Option<String>,
    pub name: LocalizedText,
    pub summary: LocalizedText,
    /// Raw markup (paragraphs/lists) keyed by locale.
    pub description: LocalizedText,
    pub developer_name: Option<String>,
    pub project_license: Option<String>,
    pub project_group: Option<String>,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub icons: Vec<Icon>,
    /// Launchable entries, keyed by launchable type (`desktop-id`, ...).
    pub launchables: BTreeMap<String, Vec<String>>,
    pub urls: BTreeMap<String, String>,
    pub provided: Vec<String>,
    pub extends: Vec<String>,
    pub releases: Vec<Release>,
    pub screenshots: Vec<Screenshot>,
    /// Locale name -> completion percentage.
    pub languages: BTreeMap<String, i32>,
    pub custom: BTreeMap<String, String>,
}

impl Default for ComponentKind {
    fn default() -> Self {
        ComponentKind::Unknown
    }
}

impl Component {
    pub fn new(kind: ComponentKind, cid: &str) -> Self {
        Self {
            kind,
            cid: cid.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.get(LOCALE_C).map(String::as_str)
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.get(LOCALE_C).map(String::as_str)
    }

    pub fn set_name(&mut self, locale: &str, value: &str) {
        self.name.insert(locale.to_string(), value.to_string());
    }

    pub fn set_summary(&mut self, locale: &str, value: &str) {
        self.summary.insert(locale.to_string(), value.to_string());
    }

    /// The logical (stock) icon name, if any.
    pub fn stock_icon(&self) -> Option<&str> {
        self.icons.iter().find_map(|i| match i {
            Icon::Stock { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// The pre-processing local icon path, if any.
    pub fn local_icon(&self) -> Option<&str> {
        self.icons.iter().find_map(|i| match i {
            Icon::Local { path } => Some(path.as_str()),
            _ => None,
        })
    }

    pub fn has_stored_icon(&self) -> bool {
        self.icons
            .iter()
            .any(|i| matches!(i, Icon::Cached { .. } | Icon::Remote { .. }))
    }

    pub fn add_launchable(&mut self, ltype: &str, value: &str) {
        self.launchables
            .entry(ltype.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn launchables_of_type(&self, ltype: &str) -> &[String] {
        self.launchables
            .get(ltype)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataType {
    Xml,
    Yaml,
}

impl MetadataType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataType::Xml => "xml",
            MetadataType::Yaml => "yaml",
        }
    }
}

/// Serializes a single component to a collection-style document fragment
/// in the given format, trailing whitespace stripped.
pub fn serialize_component(cpt: &Component, format: MetadataType) -> anyhow::Result<String> {
    let doc = match format {
        MetadataType::Xml => xml::serialize_component_xml(cpt)?,
        MetadataType::Yaml => yaml::serialize_component_yaml(cpt)?,
    };
    Ok(doc.trim_end().to_string())
}

/// Parses a full collection document (catalog file or a stored fragment)
/// into components.
pub fn parse_collection(blob: &str, format: MetadataType) -> anyhow::Result<Vec<Component>> {
    match format {
        MetadataType::Xml => xml::parse_collection_xml(blob),
        MetadataType::Yaml => yaml::parse_collection_yaml(blob),
    }
}
