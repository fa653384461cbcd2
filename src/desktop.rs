//! Desktop-entry (`.desktop`) reading and merging into components.
//!
//! Desktop data never overrides values that already came from a metainfo
//! file; it only fills the gaps. Orphaned desktop files (no metainfo)
//! produce components of their own through the same path.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use configparser::ini::Ini;

use crate::model::{Component, ComponentKind, Icon, LOCALE_C};

const DESKTOP_GROUP: &str = "Desktop Entry";

/// Desktop categories that only describe toolkits or environments and
/// carry no meaning in a software catalog.
const BORING_CATEGORIES: &[&str] = &[
    "GTK",
    "Qt",
    "KDE",
    "GNOME",
    "Motif",
    "Java",
    "Application",
    "XFCE",
    "DDE",
];

/// Parsed key/value view of the `[Desktop Entry]` group.
#[derive(Debug, Default)]
pub struct DesktopEntry {
    fields: HashMap<String, String>,
}

impl DesktopEntry {
    pub fn parse(data: &str) -> Result<Self> {
        let mut ini = Ini::new_cs();
        ini.read(data.to_string())
            .map_err(|e| anyhow!("invalid desktop entry: {}", e))?;
        let map = ini.get_map_ref();
        let group = map
            .get(DESKTOP_GROUP)
            .ok_or_else(|| anyhow!("no [Desktop Entry] group found"))?;
        let fields = group
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn bool_field(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// All `key[locale]` variants for a base key, the unlocalized value
    /// under the "C" locale.
    fn localized(&self, base: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (key, value) in &self.fields {
            if key == base {
                out.push((LOCALE_C.to_string(), value.clone()));
            } else if let Some(rest) = key.strip_prefix(base) {
                if let Some(locale) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                    out.push((locale.to_string(), value.clone()));
                }
            }
        }
        out
    }

    fn list_field(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of merging a desktop entry into a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The entry asked to be hidden (NoDisplay/Hidden) and was skipped.
    Hidden,
    /// The entry does not describe a launchable application.
    NotAnApp,
}

/// Merges `.desktop` data into `cpt`, filling fields the metainfo did not
/// provide. `ignore_nodisplay` is used when the entry was explicitly
/// referenced through a launchable tag.
pub fn merge_desktop_data(
    cpt: &mut Component,
    data: &str,
    ignore_nodisplay: bool,
) -> Result<MergeOutcome> {
    let entry = DesktopEntry::parse(data)?;

    if let Some(etype) = entry.get("Type") {
        if !etype.eq_ignore_ascii_case("application") {
            return Ok(MergeOutcome::NotAnApp);
        }
    }
    if !ignore_nodisplay && (entry.bool_field("NoDisplay") || entry.bool_field("Hidden")) {
        return Ok(MergeOutcome::Hidden);
    }

    for (locale, value) in entry.localized("Name") {
        cpt.name.entry(locale).or_insert(value);
    }
    for (locale, value) in entry.localized("Comment") {
        cpt.summary.entry(locale).or_insert(value);
    }
    if cpt.categories.is_empty() {
        cpt.categories = entry
            .list_field("Categories")
            .into_iter()
            .filter(|c| !BORING_CATEGORIES.contains(&c.as_str()))
            .collect();
    }
    if cpt.keywords.is_empty() {
        cpt.keywords = entry.list_field("Keywords");
    }
    for mime in entry.list_field("MimeType") {
        let item = format!("mediatype:{}", mime);
        if !cpt.provided.contains(&item) {
            cpt.provided.push(item);
        }
    }
    if cpt.stock_icon().is_none() && cpt.local_icon().is_none() {
        if let Some(icon) = entry.get("Icon") {
            if !icon.is_empty() {
                if icon.starts_with('/') {
                    cpt.icons.push(Icon::Local {
                        path: icon.to_string(),
                    });
                } else {
                    // Icon names are logical; a file extension here is a
                    // packaging mistake we tolerate by stripping it.
                    let name = icon
                        .strip_suffix(".png")
                        .or_else(|| icon.strip_suffix(".svg"))
                        .or_else(|| icon.strip_suffix(".svgz"))
                        .or_else(|| icon.strip_suffix(".xpm"))
                        .unwrap_or(icon);
                    cpt.icons.push(Icon::Stock {
                        name: name.to_string(),
                    });
                }
            }
        }
    }

    Ok(MergeOutcome::Merged)
}

/// Builds a fresh component from an orphaned desktop file.
pub fn component_from_desktop_file(cid: &str, data: &str) -> Result<Option<Component>> {
    let mut cpt = Component::new(ComponentKind::DesktopApp, cid);
    match merge_desktop_data(&mut cpt, data, false)? {
        MergeOutcome::Merged => Ok(Some(cpt)),
        MergeOutcome::Hidden | MergeOutcome::NotAnApp => Ok(None),
    }
}

/// Component-id derived from a desktop file name: the basename, with a
/// trailing `.desktop` removed.
pub fn cid_from_desktop_filename(basename: &str) -> String {
    basename
        .strip_suffix(".desktop")
        .unwrap_or(basename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DESKTOP: &str = "[Desktop Entry]\n\
Type=Application\n\
Name=Foo\n\
Name[de]=Fu\n\
Comment=A sample application\n\
Icon=foo\n\
Categories=GTK;Utility;Development;\n\
Keywords=sample;demo;\n\
MimeType=text/plain;\n\
Exec=foo %f\n";

    #[test]
    fn test_parse_and_merge() {
        let mut cpt = Component::new(ComponentKind::DesktopApp, "org.example.Foo");
        let outcome = merge_desktop_data(&mut cpt, SAMPLE_DESKTOP, false).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(cpt.name(), Some("Foo"));
        assert_eq!(cpt.name.get("de").map(String::as_str), Some("Fu"));
        assert_eq!(cpt.summary(), Some("A sample application"));
        // Toolkit categories are dropped.
        assert_eq!(cpt.categories, vec!["Utility", "Development"]);
        assert_eq!(cpt.stock_icon(), Some("foo"));
        assert!(cpt.provided.contains(&"mediatype:text/plain".to_string()));
    }

    #[test]
    fn test_metainfo_data_wins() {
        let mut cpt = Component::new(ComponentKind::DesktopApp, "org.example.Foo");
        cpt.set_name("C", "Better Name");
        merge_desktop_data(&mut cpt, SAMPLE_DESKTOP, false).unwrap();
        assert_eq!(cpt.name(), Some("Better Name"));
        assert_eq!(cpt.name.get("de").map(String::as_str), Some("Fu"));
    }

    #[test]
    fn test_nodisplay() {
        let data = format!("{}NoDisplay=true\n", SAMPLE_DESKTOP);
        let mut cpt = Component::new(ComponentKind::DesktopApp, "org.example.Foo");
        assert_eq!(
            merge_desktop_data(&mut cpt, &data, false).unwrap(),
            MergeOutcome::Hidden
        );
        // Launchable-referenced entries ignore NoDisplay.
        assert_eq!(
            merge_desktop_data(&mut cpt, &data, true).unwrap(),
            MergeOutcome::Merged
        );
    }

    #[test]
    fn test_not_an_app() {
        let data = "[Desktop Entry]\nType=Link\nName=Somewhere\nURL=https://example.org\n";
        assert!(component_from_desktop_file("somewhere", data).unwrap().is_none());
    }

    #[test]
    fn test_icon_extension_stripped() {
        let data = "[Desktop Entry]\nType=Application\nName=Foo\nIcon=foo.png\n";
        let cpt = component_from_desktop_file("foo", data).unwrap().unwrap();
        assert_eq!(cpt.stock_icon(), Some("foo"));
    }

    #[test]
    fn test_cid_from_filename() {
        assert_eq!(
            cid_from_desktop_filename("org.example.Foo.desktop"),
            "org.example.Foo"
        );
        assert_eq!(cid_from_desktop_filename("plain"), "plain");
    }
}
