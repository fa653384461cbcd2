//! DEP-11 YAML reading and writing.
//!
//! Each component is one YAML document; a catalog file is a stream of
//! documents led by a `File: DEP-11` header document.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{
    Component, ComponentKind, Icon, Image, ImageKind, LOCALE_C, LocalizedText, MergeKind, Release,
    Screenshot,
};

fn str_value(s: &str) -> Value {
    Value::String(s.to_string())
}

fn localized_value(text: &LocalizedText) -> Value {
    let mut map = Mapping::new();
    for (locale, value) in text {
        map.insert(str_value(locale), str_value(value));
    }
    Value::Mapping(map)
}

fn localized_from_value(value: &Value) -> LocalizedText {
    let mut out = LocalizedText::new();
    if let Value::Mapping(map) = value {
        for (k, v) in map {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                out.insert(k.to_string(), v.to_string());
            }
        }
    } else if let Some(s) = value.as_str() {
        out.insert(LOCALE_C.to_string(), s.to_string());
    }
    out
}

fn image_value(img: &Image) -> Value {
    let mut map = Mapping::new();
    map.insert(str_value("url"), str_value(&img.url));
    if let Some(w) = img.width {
        map.insert(str_value("width"), Value::Number(w.into()));
    }
    if let Some(h) = img.height {
        map.insert(str_value("height"), Value::Number(h.into()));
    }
    Value::Mapping(map)
}

fn image_from_value(value: &Value, kind: ImageKind) -> Option<Image> {
    let map = value.as_mapping()?;
    Some(Image {
        kind,
        url: map.get(&str_value("url"))?.as_str()?.to_string(),
        width: map
            .get(&str_value("width"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        height: map
            .get(&str_value("height"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
    })
}

/// Serializes one component as a DEP-11 document (`---` prefixed).
pub fn serialize_component_yaml(cpt: &Component) -> Result<String> {
    let mut doc = Mapping::new();
    doc.insert(str_value("Type"), str_value(cpt.kind.as_str()));
    doc.insert(str_value("ID"), str_value(&cpt.cid));
    if cpt.merge_kind != MergeKind::None {
        doc.insert(str_value("Merge"), str_value(cpt.merge_kind.as_str()));
    }
    if let Some(pkgname) = &cpt.pkgname {
        doc.insert(str_value("Package"), str_value(pkgname));
    }
    if let Some(source_pkgname) = &cpt.source_pkgname {
        doc.insert(str_value("SourcePackage"), str_value(source_pkgname));
    }
    if !cpt.name.is_empty() {
        doc.insert(str_value("Name"), localized_value(&cpt.name));
    }
    if !cpt.summary.is_empty() {
        doc.insert(str_value("Summary"), localized_value(&cpt.summary));
    }
    if !cpt.description.is_empty() {
        doc.insert(str_value("Description"), localized_value(&cpt.description));
    }
    if let Some(license) = &cpt.project_license {
        doc.insert(str_value("ProjectLicense"), str_value(license));
    }
    if let Some(group) = &cpt.project_group {
        doc.insert(str_value("ProjectGroup"), str_value(group));
    }
    if let Some(dev) = &cpt.developer_name {
        doc.insert(str_value("DeveloperName"), str_value(dev));
    }
    if !cpt.categories.is_empty() {
        doc.insert(
            str_value("Categories"),
            Value::Sequence(cpt.categories.iter().map(|c| str_value(c)).collect()),
        );
    }
    if !cpt.keywords.is_empty() {
        let mut map = Mapping::new();
        map.insert(
            str_value(LOCALE_C),
            Value::Sequence(cpt.keywords.iter().map(|k| str_value(k)).collect()),
        );
        doc.insert(str_value("Keywords"), Value::Mapping(map));
    }
    if !cpt.urls.is_empty() {
        let mut map = Mapping::new();
        for (utype, url) in &cpt.urls {
            map.insert(str_value(utype), str_value(url));
        }
        doc.insert(str_value("Url"), Value::Mapping(map));
    }
    let mut icon_map = Mapping::new();
    let mut cached = Vec::new();
    let mut remote = Vec::new();
    for icon in &cpt.icons {
        match icon {
            Icon::Stock { name } => {
                icon_map.insert(str_value("stock"), str_value(name));
            }
            Icon::Cached {
                name,
                width,
                height,
                scale,
            } => {
                let mut map = Mapping::new();
                map.insert(str_value("name"), str_value(name));
                map.insert(str_value("width"), Value::Number((*width).into()));
                map.insert(str_value("height"), Value::Number((*height).into()));
                if *scale > 1 {
                    map.insert(str_value("scale"), Value::Number((*scale).into()));
                }
                cached.push(Value::Mapping(map));
            }
            Icon::Remote {
                url,
                width,
                height,
                scale,
            } => {
                let mut map = Mapping::new();
                map.insert(str_value("url"), str_value(url));
                map.insert(str_value("width"), Value::Number((*width).into()));
                map.insert(str_value("height"), Value::Number((*height).into()));
                if *scale > 1 {
                    map.insert(str_value("scale"), Value::Number((*scale).into()));
                }
                remote.push(Value::Mapping(map));
            }
            Icon::Local { .. } => {}
        }
    }
    if !cached.is_empty() {
        icon_map.insert(str_value("cached"), Value::Sequence(cached));
    }
    if !remote.is_empty() {
        icon_map.insert(str_value("remote"), Value::Sequence(remote));
    }
    if !icon_map.is_empty() {
        doc.insert(str_value("Icon"), Value::Mapping(icon_map));
    }
    if !cpt.launchables.is_empty() {
        let mut map = Mapping::new();
        for (ltype, entries) in &cpt.launchables {
            map.insert(
                str_value(ltype),
                Value::Sequence(entries.iter().map(|e| str_value(e)).collect()),
            );
        }
        doc.insert(str_value("Launchable"), Value::Mapping(map));
    }
    if !cpt.provided.is_empty() {
        let mut map = Mapping::new();
        for item in &cpt.provided {
            let (kind, value) = item.split_once(':').unwrap_or(("generic", item.as_str()));
            let entry = map
                .entry(str_value(kind))
                .or_insert_with(|| Value::Sequence(Vec::new()));
            if let Value::Sequence(seq) = entry {
                seq.push(str_value(value));
            }
        }
        doc.insert(str_value("Provides"), Value::Mapping(map));
    }
    if !cpt.extends.is_empty() {
        doc.insert(
            str_value("Extends"),
            Value::Sequence(cpt.extends.iter().map(|e| str_value(e)).collect()),
        );
    }
    if !cpt.releases.is_empty() {
        let releases = cpt
            .releases
            .iter()
            .map(|rel| {
                let mut map = Mapping::new();
                map.insert(str_value("version"), str_value(&rel.version));
                if let Some(ts) = rel.timestamp {
                    map.insert(str_value("unix-timestamp"), Value::Number(ts.into()));
                }
                if let Some(date) = &rel.date {
                    map.insert(str_value("date"), str_value(date));
                }
                Value::Mapping(map)
            })
            .collect();
        doc.insert(str_value("Releases"), Value::Sequence(releases));
    }
    if !cpt.screenshots.is_empty() {
        let shots = cpt
            .screenshots
            .iter()
            .map(|shot| {
                let mut map = Mapping::new();
                if shot.default {
                    map.insert(str_value("default"), Value::Bool(true));
                }
                if !shot.captions.is_empty() {
                    map.insert(str_value("caption"), localized_value(&shot.captions));
                }
                if let Some(src) = shot.images.iter().find(|i| i.kind == ImageKind::Source) {
                    map.insert(str_value("source-image"), image_value(src));
                }
                let thumbs: Vec<Value> = shot
                    .images
                    .iter()
                    .filter(|i| i.kind == ImageKind::Thumbnail)
                    .map(image_value)
                    .collect();
                if !thumbs.is_empty() {
                    map.insert(str_value("thumbnails"), Value::Sequence(thumbs));
                }
                Value::Mapping(map)
            })
            .collect();
        doc.insert(str_value("Screenshots"), Value::Sequence(shots));
    }
    if !cpt.languages.is_empty() {
        let langs = cpt
            .languages
            .iter()
            .map(|(locale, pct)| {
                let mut map = Mapping::new();
                map.insert(str_value("locale"), str_value(locale));
                map.insert(str_value("percentage"), Value::Number((*pct).into()));
                Value::Mapping(map)
            })
            .collect();
        doc.insert(str_value("Languages"), Value::Sequence(langs));
    }
    if !cpt.custom.is_empty() {
        let mut map = Mapping::new();
        for (key, value) in &cpt.custom {
            map.insert(str_value(key), str_value(value));
        }
        doc.insert(str_value("Custom"), Value::Mapping(map));
    }

    let body = serde_yaml::to_string(&Value::Mapping(doc)).context("serialize DEP-11 document")?;
    Ok(format!("---\n{}", body))
}

fn component_from_doc(doc: &Mapping) -> Result<Component> {
    let mut cpt = Component::default();
    let get = |key: &str| doc.get(&str_value(key));

    cpt.kind = match get("Type").and_then(Value::as_str) {
        Some(t) => ComponentKind::from_str(t),
        None => bail!("DEP-11 document without a Type key"),
    };
    cpt.cid = get("ID")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(merge) = get("Merge").and_then(Value::as_str) {
        cpt.merge_kind = MergeKind::from_str(merge);
    }
    cpt.pkgname = get("Package").and_then(Value::as_str).map(String::from);
    cpt.source_pkgname = get("SourcePackage")
        .and_then(Value::as_str)
        .map(String::from);
    if let Some(v) = get("Name") {
        cpt.name = localized_from_value(v);
    }
    if let Some(v) = get("Summary") {
        cpt.summary = localized_from_value(v);
    }
    if let Some(v) = get("Description") {
        cpt.description = localized_from_value(v);
    }
    cpt.project_license = get("ProjectLicense")
        .and_then(Value::as_str)
        .map(String::from);
    cpt.project_group = get("ProjectGroup")
        .and_then(Value::as_str)
        .map(String::from);
    cpt.developer_name = get("DeveloperName")
        .and_then(Value::as_str)
        .map(String::from);
    if let Some(Value::Sequence(seq)) = get("Categories") {
        cpt.categories = seq
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
    }
    if let Some(Value::Mapping(map)) = get("Keywords") {
        if let Some(Value::Sequence(seq)) = map.get(&str_value(LOCALE_C)) {
            cpt.keywords = seq
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
    }
    if let Some(Value::Mapping(map)) = get("Url") {
        for (k, v) in map {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                cpt.urls.insert(k.to_string(), v.to_string());
            }
        }
    }
    if let Some(Value::Mapping(map)) = get("Icon") {
        if let Some(stock) = map.get(&str_value("stock")).and_then(Value::as_str) {
            cpt.icons.push(Icon::Stock {
                name: stock.to_string(),
            });
        }
        for (key, listing) in [("cached", true), ("remote", false)] {
            let Some(Value::Sequence(seq)) = map.get(&str_value(key)) else {
                continue;
            };
            for entry in seq {
                let Some(emap) = entry.as_mapping() else {
                    continue;
                };
                let width = emap
                    .get(&str_value("width"))
                    .and_then(Value::as_u64)
                    .unwrap_or(64) as u32;
                let height = emap
                    .get(&str_value("height"))
                    .and_then(Value::as_u64)
                    .unwrap_or(64) as u32;
                let scale = emap
                    .get(&str_value("scale"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1) as u32;
                if listing {
                    if let Some(name) = emap.get(&str_value("name")).and_then(Value::as_str) {
                        cpt.icons.push(Icon::Cached {
                            name: name.to_string(),
                            width,
                            height,
                            scale,
                        });
                    }
                } else if let Some(url) = emap.get(&str_value("url")).and_then(Value::as_str) {
                    cpt.icons.push(Icon::Remote {
                        url: url.to_string(),
                        width,
                        height,
                        scale,
                    });
                }
            }
        }
    }
    if let Some(Value::Mapping(map)) = get("Launchable") {
        for (k, v) in map {
            let (Some(ltype), Some(seq)) = (k.as_str(), v.as_sequence()) else {
                continue;
            };
            for entry in seq.iter().filter_map(Value::as_str) {
                cpt.add_launchable(ltype, entry);
            }
        }
    }
    if let Some(Value::Mapping(map)) = get("Provides") {
        for (k, v) in map {
            let (Some(kind), Some(seq)) = (k.as_str(), v.as_sequence()) else {
                continue;
            };
            for entry in seq.iter().filter_map(Value::as_str) {
                cpt.provided.push(format!("{}:{}", kind, entry));
            }
        }
    }
    if let Some(Value::Sequence(seq)) = get("Extends") {
        cpt.extends = seq
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
    }
    if let Some(Value::Sequence(seq)) = get("Releases") {
        for entry in seq {
            let Some(emap) = entry.as_mapping() else {
                continue;
            };
            cpt.releases.push(Release {
                version: emap
                    .get(&str_value("version"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                timestamp: emap.get(&str_value("unix-timestamp")).and_then(Value::as_u64),
                date: emap
                    .get(&str_value("date"))
                    .and_then(Value::as_str)
                    .map(String::from),
            });
        }
    }
    if let Some(Value::Sequence(seq)) = get("Screenshots") {
        for entry in seq {
            let Some(emap) = entry.as_mapping() else {
                continue;
            };
            let mut shot = Screenshot {
                default: emap
                    .get(&str_value("default"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                ..Default::default()
            };
            if let Some(v) = emap.get(&str_value("caption")) {
                shot.captions = localized_from_value(v);
            }
            if let Some(img) = emap
                .get(&str_value("source-image"))
                .and_then(|v| image_from_value(v, ImageKind::Source))
            {
                shot.images.push(img);
            }
            if let Some(Value::Sequence(thumbs)) = emap.get(&str_value("thumbnails")) {
                shot.images.extend(
                    thumbs
                        .iter()
                        .filter_map(|v| image_from_value(v, ImageKind::Thumbnail)),
                );
            }
            cpt.screenshots.push(shot);
        }
    }
    if let Some(Value::Sequence(seq)) = get("Languages") {
        for entry in seq {
            let Some(emap) = entry.as_mapping() else {
                continue;
            };
            if let Some(locale) = emap.get(&str_value("locale")).and_then(Value::as_str) {
                let pct = emap
                    .get(&str_value("percentage"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0) as i32;
                cpt.languages.insert(locale.to_string(), pct);
            }
        }
    }
    if let Some(Value::Mapping(map)) = get("Custom") {
        for (k, v) in map {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                cpt.custom.insert(k.to_string(), v.to_string());
            }
        }
    }
    Ok(cpt)
}

/// Parses a DEP-11 document stream; the `File: DEP-11` header document is
/// skipped when present.
pub fn parse_collection_yaml(blob: &str) -> Result<Vec<Component>> {
    let mut cpts = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(blob) {
        let value = Value::deserialize(doc)?;
        let Value::Mapping(map) = value else {
            continue;
        };
        if map.contains_key(&str_value("File")) {
            continue;
        }
        if map.is_empty() {
            continue;
        }
        cpts.push(component_from_doc(&map)?);
    }
    Ok(cpts)
}
