//! Catalog, hint-report, CID-index and icon-tarball writing.
//!
//! Every export is written in compressed variants only: catalogs and
//! hint reports as `.gz` plus `.xz`, the CID index as `.gz`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use fn_error_context::context;
use xz2::write::XzEncoder;

use crate::config::{Config, Suite};
use crate::data_store::DataStore;
use crate::model::MetadataType;
use crate::utils::{
    ImageSize, cid_from_gcid, copy_dir_tree, current_timestamp_iso8601, ensure_dir,
};

/// Writes `<base>.gz` and optionally `<base>.xz`.
#[context("writing compressed variants of {base}")]
pub fn write_compressed(base: &Utf8Path, data: &[u8], with_xz: bool) -> Result<()> {
    if let Some(parent) = base.parent() {
        ensure_dir(parent)?;
    }
    let gz_path = Utf8PathBuf::from(format!("{}.gz", base));
    let file = fs::File::create(&gz_path).with_context(|| format!("create {}", gz_path))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;

    if with_xz {
        let xz_path = Utf8PathBuf::from(format!("{}.xz", base));
        let file = fs::File::create(&xz_path).with_context(|| format!("create {}", xz_path))?;
        let mut encoder = XzEncoder::new(file, 6);
        encoder.write_all(data)?;
        encoder.finish()?;
    }
    Ok(())
}

fn catalog_origin(config: &Config, suite: &Suite, section: &str) -> String {
    format!(
        "{}-{}-{}",
        config.project_name.to_lowercase(),
        suite.name,
        section
    )
}

/// The media base URL advertised in catalog headers; per-suite when media
/// pinning is active.
fn effective_media_base_url(config: &Config, suite: &Suite) -> Option<String> {
    if config.media_base_url.is_empty() {
        return None;
    }
    if config.feature.immutable_suites {
        Some(format!("{}/{}", config.media_base_url, suite.name))
    } else {
        Some(format!("{}/pool", config.media_base_url))
    }
}

/// Builds the collection catalog for one (suite, section, arch) from the
/// cached metadata of the given packages, preserving package order.
pub fn build_catalog(
    config: &Config,
    dstore: &DataStore,
    suite: &Suite,
    section: &str,
    pkids: &[String],
) -> Result<(String, Vec<String>)> {
    let origin = catalog_origin(config, suite, section);
    let media_url = effective_media_base_url(config, suite);
    let timestamp = config
        .feature
        .metadata_timestamps
        .then(current_timestamp_iso8601);

    let mut gcids = Vec::new();
    let mut blobs = Vec::new();
    for pkid in pkids {
        for gcid in dstore.get_gcids_for_package(pkid)? {
            match dstore.get_metadata(config.metadata_type, &gcid)? {
                Some(blob) => {
                    blobs.push(blob);
                    gcids.push(gcid);
                }
                None => {
                    tracing::error!("no cached metadata for {} of {}", gcid, pkid);
                }
            }
        }
    }

    let mut out = String::new();
    match config.metadata_type {
        MetadataType::Xml => {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
            out.push_str(&format!(
                "<components version=\"{}\" origin=\"{}\"",
                config.format_version, origin
            ));
            if suite.data_priority != 0 {
                out.push_str(&format!(" priority=\"{}\"", suite.data_priority));
            }
            if let Some(url) = &media_url {
                out.push_str(&format!(" media_baseurl=\"{}\"", url));
            }
            if let Some(time) = &timestamp {
                out.push_str(&format!(" time=\"{}\"", time));
            }
            out.push_str(">\n");
            for blob in &blobs {
                out.push_str(blob);
                out.push('\n');
            }
            out.push_str("</components>\n");
        }
        MetadataType::Yaml => {
            out.push_str("---\nFile: DEP-11\n");
            out.push_str(&format!("Version: '{}'\n", config.format_version));
            out.push_str(&format!("Origin: {}\n", origin));
            if let Some(url) = &media_url {
                out.push_str(&format!("MediaBaseUrl: {}\n", url));
            }
            if suite.data_priority != 0 {
                out.push_str(&format!("Priority: {}\n", suite.data_priority));
            }
            if let Some(time) = &timestamp {
                out.push_str(&format!("Time: {}\n", time));
            }
            for blob in &blobs {
                out.push_str(blob);
                if !blob.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
    }
    Ok((out, gcids))
}

/// Concatenates the per-package hint objects into one JSON array.
pub fn build_hints_report(dstore: &DataStore, pkids: &[String]) -> Result<String> {
    let mut entries = Vec::new();
    for pkid in pkids {
        if let Some(raw) = dstore.get_hints(pkid)? {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("stored hints for {} are not valid JSON", pkid))?;
            entries.push(value);
        }
    }
    Ok(serde_json::to_string_pretty(&serde_json::Value::Array(
        entries,
    ))?)
}

/// cid -> gcid map across the export set.
pub fn build_cid_index(dstore: &DataStore, pkids: &[String]) -> Result<String> {
    let mut map = BTreeMap::new();
    for pkid in pkids {
        for gcid in dstore.get_gcids_for_package(pkid)? {
            if let Some(cid) = cid_from_gcid(&gcid) {
                map.insert(cid, gcid);
            } else {
                tracing::warn!("malformed GCID '{}' in store for {}", gcid, pkid);
            }
        }
    }
    Ok(serde_json::to_string_pretty(&serde_json::json!(map))?)
}

/// Packs the cached icons of all referenced GCIDs into one tarball per
/// enabled size, with stable file ordering.
#[context("building icon tarballs for {section}/{arch}")]
pub fn export_icon_tarballs(
    config: &Config,
    suite: &Suite,
    section: &str,
    arch: &str,
    gcids: &[String],
) -> Result<()> {
    let export_dir = config
        .data_export_dir
        .join(&suite.name)
        .join(section);
    ensure_dir(&export_dir)?;

    let mut unique: Vec<&String> = gcids.iter().collect();
    unique.sort();
    unique.dedup();

    let pool = config.media_pool_dir();
    for size in config.cached_icon_sizes() {
        let tar_path = export_dir.join(format!("icons-{}.tar.gz", size));
        let file =
            fs::File::create(&tar_path).with_context(|| format!("create {}", tar_path))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut files: Vec<(String, Utf8PathBuf)> = Vec::new();
        for gcid in &unique {
            let icon_dir = pool.join(gcid).join("icons").join(size.to_string());
            if !icon_dir.is_dir() {
                continue;
            }
            for entry in icon_dir
                .read_dir_utf8()
                .with_context(|| format!("read {}", icon_dir))?
            {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.push((entry.file_name().to_string(), entry.into_path()));
                }
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));

        for (name, path) in files {
            builder
                .append_path_with_name(&path, &name)
                .with_context(|| format!("add {} to {}", path, tar_path))?;
        }
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .with_context(|| format!("finish {}", tar_path))?;
    }
    Ok(())
}

/// Mirrors every referenced GCID directory from the pool into the
/// suite-pinned media directory.
pub fn pin_suite_media(config: &Config, suite: &Suite, gcids: &[String]) -> Result<u32> {
    let pool = config.media_pool_dir();
    let suite_dir = config.suite_media_dir(&suite.name);
    let mut pinned = 0;
    for gcid in gcids {
        let src = pool.join(gcid);
        let dest = suite_dir.join(gcid);
        if !src.is_dir() || dest.is_dir() {
            continue;
        }
        copy_dir_tree(&src, &dest)?;
        pinned += 1;
    }
    Ok(pinned)
}

/// Writes the full export set for one (suite, section, arch).
#[context("exporting metadata for {section}/{arch}")]
pub fn export_data(
    config: &Config,
    dstore: &DataStore,
    suite: &Suite,
    section: &str,
    arch: &str,
    pkids: &[String],
) -> Result<Vec<String>> {
    let (catalog, gcids) = build_catalog(config, dstore, suite, section, pkids)?;
    let data_dir = config.data_export_dir.join(&suite.name).join(section);
    let catalog_ext = match config.metadata_type {
        MetadataType::Xml => "xml",
        MetadataType::Yaml => "yml",
    };
    write_compressed(
        &data_dir.join(format!("Components-{}.{}", arch, catalog_ext)),
        catalog.as_bytes(),
        true,
    )?;

    let cid_index = build_cid_index(dstore, pkids)?;
    write_compressed(
        &data_dir.join(format!("CID-Index-{}.json", arch)),
        cid_index.as_bytes(),
        false,
    )?;

    let hints_dir = config.hints_export_dir.join(&suite.name).join(section);
    let hints = build_hints_report(dstore, pkids)?;
    write_compressed(
        &hints_dir.join(format!("Hints-{}.json", arch)),
        hints.as_bytes(),
        true,
    )?;

    if config.feature.immutable_suites {
        let pinned = pin_suite_media(config, suite, &gcids)?;
        if pinned > 0 {
            tracing::info!("pinned {} media directories for suite {}", pinned, suite.name);
        }
    }

    export_icon_tarballs(config, suite, section, arch, &gcids)?;
    tracing::info!(
        "exported {} components for {}/{}/{}",
        gcids.len(),
        suite.name,
        section,
        arch
    );
    Ok(gcids)
}

/// Reads one `.gz` export back, for tests and the `publish` path.
pub fn read_gz(path: &Utf8Path) -> Result<Vec<u8>> {
    use std::io::Read;
    let file = fs::File::open(path).with_context(|| format!("open {}", path))?;
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Parses an `icons-<size>.tar.gz` name back into its size, used by the
/// cleanup pass.
pub fn icon_tarball_size(fname: &str) -> Option<ImageSize> {
    fname
        .strip_prefix("icons-")
        .and_then(|rest| rest.strip_suffix(".tar.gz"))
        .and_then(|size| ImageSize::parse(size).ok())
}
