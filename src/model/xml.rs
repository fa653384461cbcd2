//! AppStream XML reading and writing.
//!
//! Two input shapes are handled: upstream metainfo documents (one
//! `<component>` root) and collection documents (`<components>` root or a
//! concatenation of stored fragments). Output is always collection-style.

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, BytesText, Event};

use super::{
    Component, ComponentKind, Icon, Image, ImageKind, LOCALE_C, MergeKind, Release, Screenshot,
};

fn attr_value(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn locale_of(e: &BytesStart<'_>) -> Result<String> {
    Ok(attr_value(e, "xml:lang")?.unwrap_or_else(|| LOCALE_C.to_string()))
}

/// Collects the unescaped character data up to the closing tag of `end`.
/// Nested markup is not expected here and is skipped.
fn read_leaf_text(reader: &mut Reader<&[u8]>, end: &BytesStart<'_>) -> Result<String> {
    let mut out = String::new();
    let end_name = end.name().as_ref().to_vec();
    loop {
        match reader.read_event()? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(t) => out.push_str(std::str::from_utf8(&t)?),
            Event::Start(child) => {
                let name = child.name().as_ref().to_vec();
                reader.read_to_end(quick_xml::name::QName(&name))?;
            }
            Event::Empty(_) => {}
            Event::End(e) if e.name().as_ref() == end_name.as_slice() => break,
            Event::Eof => bail!("unexpected end of document"),
            _ => {}
        }
    }
    Ok(out.trim().to_string())
}

fn parse_icon(reader: &mut Reader<&[u8]>, e: &BytesStart<'_>, empty: bool) -> Result<Option<Icon>> {
    let itype = attr_value(e, "type")?.unwrap_or_else(|| "stock".to_string());
    let width = attr_value(e, "width")?.and_then(|v| v.parse().ok());
    let height = attr_value(e, "height")?.and_then(|v| v.parse().ok());
    let scale = attr_value(e, "scale")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let text = if empty {
        String::new()
    } else {
        read_leaf_text(reader, e)?
    };
    let icon = match itype.as_str() {
        "stock" => Icon::Stock { name: text },
        "cached" => Icon::Cached {
            name: text,
            width: width.unwrap_or(64),
            height: height.unwrap_or(64),
            scale,
        },
        "remote" => Icon::Remote {
            url: text,
            width: width.unwrap_or(64),
            height: height.unwrap_or(64),
            scale,
        },
        "local" => Icon::Local { path: text },
        _ => return Ok(None),
    };
    Ok(Some(icon))
}

fn parse_string_list(reader: &mut Reader<&[u8]>, end: &BytesStart<'_>) -> Result<Vec<String>> {
    let mut items = Vec::new();
    let end_name = end.name().as_ref().to_vec();
    loop {
        match reader.read_event()? {
            Event::Start(child) => {
                let text = read_leaf_text(reader, &child.to_owned())?;
                if !text.is_empty() {
                    items.push(text);
                }
            }
            Event::End(e) if e.name().as_ref() == end_name.as_slice() => break,
            Event::Eof => bail!("unexpected end of document"),
            _ => {}
        }
    }
    Ok(items)
}

fn parse_releases(reader: &mut Reader<&[u8]>, end: &BytesStart<'_>) -> Result<Vec<Release>> {
    let mut releases = Vec::new();
    let end_name = end.name().as_ref().to_vec();
    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"release" => {
                releases.push(Release {
                    version: attr_value(e, "version")?.unwrap_or_default(),
                    date: attr_value(e, "date")?,
                    timestamp: attr_value(e, "timestamp")?.and_then(|v| v.parse().ok()),
                });
                if matches!(event, Event::Start(_)) {
                    reader.read_to_end(quick_xml::name::QName(b"release"))?;
                }
            }
            Event::End(ref e) if e.name().as_ref() == end_name.as_slice() => break,
            Event::Eof => bail!("unexpected end of document"),
            _ => {}
        }
    }
    Ok(releases)
}

fn parse_screenshots(reader: &mut Reader<&[u8]>, end: &BytesStart<'_>) -> Result<Vec<Screenshot>> {
    let mut shots = Vec::new();
    let end_name = end.name().as_ref().to_vec();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"screenshot" => {
                let mut shot = Screenshot {
                    default: attr_value(&e, "type")?.as_deref() == Some("default"),
                    ..Default::default()
                };
                loop {
                    match reader.read_event()? {
                        Event::Start(child) => match child.name().as_ref() {
                            b"image" => {
                                let kind = match attr_value(&child, "type")?.as_deref() {
                                    Some("thumbnail") => ImageKind::Thumbnail,
                                    _ => ImageKind::Source,
                                };
                                let width =
                                    attr_value(&child, "width")?.and_then(|v| v.parse().ok());
                                let height =
                                    attr_value(&child, "height")?.and_then(|v| v.parse().ok());
                                let url = read_leaf_text(reader, &child.to_owned())?;
                                shot.images.push(Image {
                                    kind,
                                    url,
                                    width,
                                    height,
                                });
                            }
                            b"caption" => {
                                let locale = locale_of(&child)?;
                                let text = read_leaf_text(reader, &child.to_owned())?;
                                shot.captions.insert(locale, text);
                            }
                            _ => {
                                let name = child.name().as_ref().to_vec();
                                reader.read_to_end(quick_xml::name::QName(&name))?;
                            }
                        },
                        Event::End(e) if e.name().as_ref() == b"screenshot" => break,
                        Event::Eof => bail!("unexpected end of document"),
                        _ => {}
                    }
                }
                shots.push(shot);
            }
            Event::End(e) if e.name().as_ref() == end_name.as_slice() => break,
            Event::Eof => bail!("unexpected end of document"),
            _ => {}
        }
    }
    Ok(shots)
}

fn parse_component_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<Component> {
    let mut cpt = Component::default();
    cpt.kind = match attr_value(start, "type")? {
        Some(t) => ComponentKind::from_str(&t),
        None => ComponentKind::Generic,
    };
    if let Some(merge) = attr_value(start, "merge")? {
        cpt.merge_kind = MergeKind::from_str(&merge);
    }
    let root_name = start.name().as_ref().to_vec();

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let e = e.to_owned();
                match e.name().as_ref() {
                    b"id" => cpt.cid = read_leaf_text(reader, &e)?,
                    b"pkgname" => cpt.pkgname = Some(read_leaf_text(reader, &e)?),
                    b"source_pkgname" => cpt.source_pkgname = Some(read_leaf_text(reader, &e)?),
                    b"name" => {
                        let locale = locale_of(&e)?;
                        let text = read_leaf_text(reader, &e)?;
                        cpt.name.insert(locale, text);
                    }
                    b"summary" => {
                        let locale = locale_of(&e)?;
                        let text = read_leaf_text(reader, &e)?;
                        cpt.summary.insert(locale, text);
                    }
                    b"description" => {
                        let locale = locale_of(&e)?;
                        let raw = if is_empty {
                            String::new()
                        } else {
                            reader.read_text(e.name())?.trim().to_string()
                        };
                        cpt.description.insert(locale, raw);
                    }
                    b"icon" => {
                        // parse_icon consumes the element in all cases.
                        if let Some(icon) = parse_icon(reader, &e, is_empty)? {
                            cpt.icons.push(icon);
                        }
                    }
                    b"categories" => cpt.categories = parse_string_list(reader, &e)?,
                    b"keywords" => cpt.keywords = parse_string_list(reader, &e)?,
                    b"url" => {
                        let utype = attr_value(&e, "type")?.unwrap_or_else(|| "homepage".into());
                        let text = read_leaf_text(reader, &e)?;
                        cpt.urls.insert(utype, text);
                    }
                    b"project_license" => cpt.project_license = Some(read_leaf_text(reader, &e)?),
                    b"project_group" => cpt.project_group = Some(read_leaf_text(reader, &e)?),
                    b"developer_name" => cpt.developer_name = Some(read_leaf_text(reader, &e)?),
                    b"developer" => {
                        // Modern metainfo nests the name in a <developer> block.
                        if !is_empty {
                            let raw = reader.read_text(e.name())?;
                            let mut inner = Reader::from_str(&raw);
                            inner.trim_text(true);
                            loop {
                                match inner.read_event()? {
                                    Event::Start(n) if n.name().as_ref() == b"name" => {
                                        cpt.developer_name =
                                            Some(read_leaf_text(&mut inner, &n.to_owned())?);
                                    }
                                    Event::Eof => break,
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"launchable" => {
                        let ltype = attr_value(&e, "type")?.unwrap_or_else(|| "desktop-id".into());
                        let text = read_leaf_text(reader, &e)?;
                        if !text.is_empty() {
                            cpt.add_launchable(&ltype, &text);
                        }
                    }
                    b"provides" => {
                        if !is_empty {
                            let end_name = e.name().as_ref().to_vec();
                            loop {
                                match reader.read_event()? {
                                    Event::Start(child) => {
                                        let kind =
                                            String::from_utf8_lossy(child.name().as_ref())
                                                .into_owned();
                                        let text = read_leaf_text(reader, &child.to_owned())?;
                                        cpt.provided.push(format!("{}:{}", kind, text));
                                    }
                                    Event::End(end)
                                        if end.name().as_ref() == end_name.as_slice() =>
                                    {
                                        break;
                                    }
                                    Event::Eof => bail!("unexpected end of document"),
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"extends" => {
                        let text = read_leaf_text(reader, &e)?;
                        if !text.is_empty() {
                            cpt.extends.push(text);
                        }
                    }
                    b"releases" => {
                        if !is_empty {
                            cpt.releases = parse_releases(reader, &e)?;
                        }
                    }
                    b"screenshots" => {
                        if !is_empty {
                            cpt.screenshots = parse_screenshots(reader, &e)?;
                        }
                    }
                    b"languages" => {
                        if !is_empty {
                            let end_name = e.name().as_ref().to_vec();
                            loop {
                                match reader.read_event()? {
                                    Event::Start(child) if child.name().as_ref() == b"lang" => {
                                        let pct = attr_value(&child, "percentage")?
                                            .and_then(|v| v.parse().ok())
                                            .unwrap_or(0);
                                        let locale = read_leaf_text(reader, &child.to_owned())?;
                                        cpt.languages.insert(locale, pct);
                                    }
                                    Event::End(end)
                                        if end.name().as_ref() == end_name.as_slice() =>
                                    {
                                        break;
                                    }
                                    Event::Eof => bail!("unexpected end of document"),
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"custom" => {
                        if !is_empty {
                            let end_name = e.name().as_ref().to_vec();
                            loop {
                                match reader.read_event()? {
                                    Event::Start(child) if child.name().as_ref() == b"value" => {
                                        let key = attr_value(&child, "key")?.unwrap_or_default();
                                        let text = read_leaf_text(reader, &child.to_owned())?;
                                        if !key.is_empty() {
                                            cpt.custom.insert(key, text);
                                        }
                                    }
                                    Event::End(end)
                                        if end.name().as_ref() == end_name.as_slice() =>
                                    {
                                        break;
                                    }
                                    Event::Eof => bail!("unexpected end of document"),
                                    _ => {}
                                }
                            }
                        }
                    }
                    _ => {
                        // Unhandled block (content_rating, requires, ...).
                        if !is_empty {
                            reader.read_to_end(e.name())?;
                        }
                    }
                }
            }
            Event::End(ref e) if e.name().as_ref() == root_name.as_slice() => break,
            Event::Eof => bail!("unexpected end of document while reading component"),
            _ => {}
        }
    }
    Ok(cpt)
}

/// Parses one upstream metainfo document.
pub fn parse_metainfo(data: &str) -> Result<Component> {
    let mut reader = Reader::from_str(data);
    reader.trim_text(true);
    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(e) if e.name().as_ref() == b"component" => {
                return parse_component_element(&mut reader, &e.to_owned());
            }
            // Ancient documents use <application> as the root element.
            Event::Start(e) if e.name().as_ref() == b"application" => {
                let mut cpt = parse_component_element(&mut reader, &e.to_owned())?;
                if cpt.kind == ComponentKind::Generic {
                    cpt.kind = ComponentKind::DesktopApp;
                }
                return Ok(cpt);
            }
            Event::Eof => bail!("no <component> element found"),
            _ => {}
        }
    }
}

/// Parses a collection document or a concatenation of component fragments.
pub fn parse_collection_xml(blob: &str) -> Result<Vec<Component>> {
    let mut reader = Reader::from_str(blob);
    reader.trim_text(true);
    let mut cpts = Vec::new();
    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(e) if e.name().as_ref() == b"component" => {
                cpts.push(parse_component_element(&mut reader, &e.to_owned())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(cpts)
}

fn write_localized(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    values: &super::LocalizedText,
) -> Result<()> {
    for (locale, value) in values {
        let elem = writer.create_element(tag);
        if locale == LOCALE_C {
            elem.write_text_content(BytesText::new(value))?;
        } else {
            elem.with_attribute(("xml:lang", locale.as_str()))
                .write_text_content(BytesText::new(value))?;
        }
    }
    Ok(())
}

fn write_icon(writer: &mut Writer<Vec<u8>>, icon: &Icon) -> Result<()> {
    match icon {
        Icon::Stock { name } => {
            writer
                .create_element("icon")
                .with_attribute(("type", "stock"))
                .write_text_content(BytesText::new(name))?;
        }
        Icon::Cached {
            name,
            width,
            height,
            scale,
        } => {
            let mut elem = writer
                .create_element("icon")
                .with_attribute(("type", "cached"))
                .with_attribute(("width", width.to_string().as_str()))
                .with_attribute(("height", height.to_string().as_str()));
            if *scale > 1 {
                elem = elem.with_attribute(("scale", scale.to_string().as_str()));
            }
            elem.write_text_content(BytesText::new(name))?;
        }
        Icon::Remote {
            url,
            width,
            height,
            scale,
        } => {
            let mut elem = writer
                .create_element("icon")
                .with_attribute(("type", "remote"))
                .with_attribute(("width", width.to_string().as_str()))
                .with_attribute(("height", height.to_string().as_str()));
            if *scale > 1 {
                elem = elem.with_attribute(("scale", scale.to_string().as_str()));
            }
            elem.write_text_content(BytesText::new(url))?;
        }
        Icon::Local { path } => {
            writer
                .create_element("icon")
                .with_attribute(("type", "local"))
                .write_text_content(BytesText::new(path))?;
        }
    }
    Ok(())
}

/// Serializes one component as a collection-style `<component>` element.
pub fn serialize_component_xml(cpt: &Component) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut root = writer
        .create_element("component")
        .with_attribute(("type", cpt.kind.as_str()));
    if cpt.merge_kind != MergeKind::None {
        root = root.with_attribute(("merge", cpt.merge_kind.as_str()));
    }
    root.write_inner_content::<_, anyhow::Error>(|w| {
        w.create_element("id")
            .write_text_content(BytesText::new(&cpt.cid))?;
        if let Some(pkgname) = &cpt.pkgname {
            w.create_element("pkgname")
                .write_text_content(BytesText::new(pkgname))?;
        }
        if let Some(source_pkgname) = &cpt.source_pkgname {
            w.create_element("source_pkgname")
                .write_text_content(BytesText::new(source_pkgname))?;
        }
        write_localized(w, "name", &cpt.name)?;
        write_localized(w, "summary", &cpt.summary)?;
        for (locale, raw) in &cpt.description {
            let elem = w.create_element("description");
            let elem = if locale == LOCALE_C {
                elem
            } else {
                elem.with_attribute(("xml:lang", locale.as_str()))
            };
            elem.write_inner_content::<_, anyhow::Error>(|dw| {
                dw.write_event(Event::Text(BytesText::from_escaped(raw.as_str())))?;
                Ok(())
            })?;
        }
        if let Some(license) = &cpt.project_license {
            w.create_element("project_license")
                .write_text_content(BytesText::new(license))?;
        }
        if let Some(group) = &cpt.project_group {
            w.create_element("project_group")
                .write_text_content(BytesText::new(group))?;
        }
        if let Some(dev) = &cpt.developer_name {
            w.create_element("developer_name")
                .write_text_content(BytesText::new(dev))?;
        }
        if !cpt.categories.is_empty() {
            w.create_element("categories")
                .write_inner_content::<_, anyhow::Error>(|cw| {
                    for cat in &cpt.categories {
                        cw.create_element("category")
                            .write_text_content(BytesText::new(cat))?;
                    }
                    Ok(())
                })?;
        }
        if !cpt.keywords.is_empty() {
            w.create_element("keywords")
                .write_inner_content::<_, anyhow::Error>(|kw| {
                    for k in &cpt.keywords {
                        kw.create_element("keyword")
                            .write_text_content(BytesText::new(k))?;
                    }
                    Ok(())
                })?;
        }
        for (utype, url) in &cpt.urls {
            w.create_element("url")
                .with_attribute(("type", utype.as_str()))
                .write_text_content(BytesText::new(url))?;
        }
        for icon in &cpt.icons {
            // Pre-processing local paths never end up in a catalog.
            if !matches!(icon, Icon::Local { .. }) {
                write_icon(w, icon)?;
            }
        }
        for (ltype, entries) in &cpt.launchables {
            for entry in entries {
                w.create_element("launchable")
                    .with_attribute(("type", ltype.as_str()))
                    .write_text_content(BytesText::new(entry))?;
            }
        }
        if !cpt.provided.is_empty() {
            w.create_element("provides")
                .write_inner_content::<_, anyhow::Error>(|pw| {
                    for item in &cpt.provided {
                        let (kind, value) = item.split_once(':').unwrap_or(("generic", item));
                        pw.create_element(kind)
                            .write_text_content(BytesText::new(value))?;
                    }
                    Ok(())
                })?;
        }
        for ext in &cpt.extends {
            w.create_element("extends")
                .write_text_content(BytesText::new(ext))?;
        }
        if !cpt.releases.is_empty() {
            w.create_element("releases")
                .write_inner_content::<_, anyhow::Error>(|rw| {
                    for rel in &cpt.releases {
                        let mut elem = rw
                            .create_element("release")
                            .with_attribute(("version", rel.version.as_str()));
                        if let Some(ts) = rel.timestamp {
                            elem = elem.with_attribute(("timestamp", ts.to_string().as_str()));
                        }
                        if let Some(date) = &rel.date {
                            elem = elem.with_attribute(("date", date.as_str()));
                        }
                        elem.write_empty()?;
                    }
                    Ok(())
                })?;
        }
        if !cpt.screenshots.is_empty() {
            w.create_element("screenshots")
                .write_inner_content::<_, anyhow::Error>(|sw| {
                    for shot in &cpt.screenshots {
                        let elem = sw.create_element("screenshot");
                        let elem = if shot.default {
                            elem.with_attribute(("type", "default"))
                        } else {
                            elem
                        };
                        elem.write_inner_content::<_, anyhow::Error>(|xw| {
                            for (locale, caption) in &shot.captions {
                                let celem = xw.create_element("caption");
                                let celem = if locale == LOCALE_C {
                                    celem
                                } else {
                                    celem.with_attribute(("xml:lang", locale.as_str()))
                                };
                                celem.write_text_content(BytesText::new(caption))?;
                            }
                            for img in &shot.images {
                                let kind = match img.kind {
                                    ImageKind::Source => "source",
                                    ImageKind::Thumbnail => "thumbnail",
                                };
                                let mut ielem =
                                    xw.create_element("image").with_attribute(("type", kind));
                                if let Some(wd) = img.width {
                                    ielem = ielem
                                        .with_attribute(("width", wd.to_string().as_str()));
                                }
                                if let Some(ht) = img.height {
                                    ielem = ielem
                                        .with_attribute(("height", ht.to_string().as_str()));
                                }
                                ielem.write_text_content(BytesText::new(&img.url))?;
                            }
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
        }
        if !cpt.languages.is_empty() {
            w.create_element("languages")
                .write_inner_content::<_, anyhow::Error>(|lw| {
                    for (locale, pct) in &cpt.languages {
                        lw.create_element("lang")
                            .with_attribute(("percentage", pct.to_string().as_str()))
                            .write_text_content(BytesText::new(locale))?;
                    }
                    Ok(())
                })?;
        }
        if !cpt.custom.is_empty() {
            w.create_element("custom")
                .write_inner_content::<_, anyhow::Error>(|cw| {
                    for (key, value) in &cpt.custom {
                        cw.create_element("value")
                            .with_attribute(("key", key.as_str()))
                            .write_text_content(BytesText::new(value))?;
                    }
                    Ok(())
                })?;
        }
        Ok(())
    })?;

    String::from_utf8(writer.into_inner()).map_err(|e| anyhow!("non UTF-8 XML output: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_METAINFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<component type="desktop-application">
  <id>org.example.Foo</id>
  <metadata_license>FSFAP</metadata_license>
  <project_license>GPL-3.0-or-later</project_license>
  <name>Foo</name>
  <name xml:lang="de">Fu</name>
  <summary>A sample application</summary>
  <description>
    <p>Foo does things, and does them well.</p>
  </description>
  <icon type="stock">foo</icon>
  <categories>
    <category>Utility</category>
    <category>Development</category>
  </categories>
  <launchable type="desktop-id">org.example.Foo.desktop</launchable>
  <url type="homepage">https://example.org/foo</url>
  <provides>
    <binary>foo</binary>
  </provides>
  <releases>
    <release version="1.2" date="2024-03-01"/>
  </releases>
  <custom>
    <value key="Purism::form_factor">workstation</value>
  </custom>
</component>
"#;

    #[test]
    fn test_parse_metainfo() {
        let cpt = parse_metainfo(SAMPLE_METAINFO).unwrap();
        assert_eq!(cpt.kind, ComponentKind::DesktopApp);
        assert_eq!(cpt.cid, "org.example.Foo");
        assert_eq!(cpt.name(), Some("Foo"));
        assert_eq!(cpt.name.get("de").map(String::as_str), Some("Fu"));
        assert_eq!(cpt.summary(), Some("A sample application"));
        assert!(cpt.description.get("C").unwrap().contains("<p>"));
        assert_eq!(cpt.stock_icon(), Some("foo"));
        assert_eq!(cpt.categories, vec!["Utility", "Development"]);
        assert_eq!(
            cpt.launchables_of_type("desktop-id"),
            &["org.example.Foo.desktop".to_string()]
        );
        assert_eq!(cpt.provided, vec!["binary:foo"]);
        assert_eq!(cpt.releases.len(), 1);
        assert_eq!(cpt.releases[0].version, "1.2");
        assert_eq!(
            cpt.custom.get("Purism::form_factor").map(String::as_str),
            Some("workstation")
        );
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let cpt = parse_metainfo(SAMPLE_METAINFO).unwrap();
        let xml1 = serialize_component_xml(&cpt).unwrap();
        let reparsed = parse_collection_xml(&xml1).unwrap();
        assert_eq!(reparsed.len(), 1);
        let xml2 = serialize_component_xml(&reparsed[0]).unwrap();
        assert_eq!(xml1, xml2);
    }

    #[test]
    fn test_parse_collection_with_wrapper() {
        let blob = format!(
            "<components version=\"0.16\" origin=\"test\">{}{}</components>",
            serialize_component_xml(&parse_metainfo(SAMPLE_METAINFO).unwrap()).unwrap(),
            serialize_component_xml(&Component::new(ComponentKind::Generic, "org.example.Bar"))
                .unwrap()
        );
        let cpts = parse_collection_xml(&blob).unwrap();
        assert_eq!(cpts.len(), 2);
        assert_eq!(cpts[1].cid, "org.example.Bar");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_metainfo("<component><id>broken").is_err());
        assert!(parse_metainfo("<notacomponent/>").is_err());
    }

    #[test]
    fn test_cached_icon_attributes() {
        let mut cpt = Component::new(ComponentKind::DesktopApp, "org.example.Foo");
        cpt.set_name("C", "Foo");
        cpt.icons.push(Icon::Cached {
            name: "foo.png".into(),
            width: 128,
            height: 128,
            scale: 2,
        });
        let xml = serialize_component_xml(&cpt).unwrap();
        assert!(xml.contains("type=\"cached\""));
        assert!(xml.contains("width=\"128\""));
        assert!(xml.contains("scale=\"2\""));
        let cpts = parse_collection_xml(&xml).unwrap();
        assert_eq!(cpts[0].icons, cpt.icons);
    }
}
