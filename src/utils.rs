use std::collections::HashSet;
use std::fs;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};

/// Top-level domains recognized when deciding whether a component-id is
/// reverse-domain shaped. Derived from the IANA list, trimmed to entries
/// that plausibly occur in software ids.
const KNOWN_TLDS: &str = include_str!("../data/tlds.txt");

fn tld_set() -> &'static HashSet<&'static str> {
    static TLDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    TLDS.get_or_init(|| {
        KNOWN_TLDS
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect()
    })
}

/// Order-sensitive MD5 chain: every update replaces the state with
/// `md5(previous_state || data)`. The empty chain hashes the first block
/// directly.
#[derive(Debug, Clone, Default)]
pub struct HashChain {
    state: Vec<u8>,
}

impl HashChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut md5 = Md5::new();
        md5.update(&self.state);
        md5.update(data);
        self.state = md5.finalize().to_vec();
    }

    pub fn hexdigest(&self) -> String {
        hex::encode(&self.state)
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Directory layout prefix for a component-id inside the media pool.
///
/// Reverse-domain ids (`org.example.Foo`) map to `org/example/Foo`, other
/// ids to `<first letter>/<first two letters>/<id>`.
pub fn cid_folder_structure(cid: &str) -> String {
    let parts: Vec<&str> = cid.split('.').collect();
    if parts.len() > 2 && tld_set().contains(parts[0]) {
        let rest = parts[2..].join(".");
        return format!("{}/{}/{}", parts[0], parts[1], rest);
    }
    let mut chars = cid.chars();
    let first: String = chars.by_ref().take(1).collect();
    let second: String = first.chars().chain(chars.take(1)).collect();
    format!("{}/{}/{}", first, second, cid)
}

/// Builds a global component id from a component-id and its content hash.
pub fn build_gcid(cid: &str, checksum: &str) -> String {
    format!("{}/{}", cid_folder_structure(cid), checksum)
}

/// Recovers the component-id from a GCID path.
pub fn cid_from_gcid(gcid: &str) -> Option<String> {
    let parts: Vec<&str> = gcid.split('/').collect();
    if parts.len() != 4 {
        return None;
    }
    if tld_set().contains(parts[0]) {
        Some(format!("{}.{}.{}", parts[0], parts[1], parts[2]))
    } else {
        Some(parts[2].to_string())
    }
}

/// Current time as ISO-8601 (seconds precision, Zulu).
pub fn current_timestamp_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Current unix time in seconds.
pub fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Modification time of a file in unix seconds.
pub fn file_mtime(path: &Utf8Path) -> Result<u64> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path))?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(mtime)
}

pub fn ensure_dir(path: &Utf8Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path))
}

/// Copies a directory tree, hardlinking file content where possible.
pub fn copy_dir_tree(src: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    ensure_dir(dest)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src.as_std_path())
            .expect("walkdir yields children of its root");
        let target = dest.as_std_path().join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if target.exists() {
                continue;
            }
            if fs::hard_link(entry.path(), &target).is_err() {
                fs::copy(entry.path(), &target)
                    .with_context(|| format!("copy {} failed", entry.path().display()))?;
            }
        }
    }
    Ok(())
}

/// Removes empty parent directories of `path` up to (excluding) `stop`.
pub fn prune_empty_parents(path: &Utf8Path, stop: &Utf8Path) -> Result<()> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        match fs::remove_dir(dir) {
            Ok(()) => {}
            // Not empty or already gone, either way we stop climbing.
            Err(_) => break,
        }
        current = dir.parent();
    }
    Ok(())
}

/// Per-run scratch directory, created lazily exactly once and removed by
/// `Engine` during cleanup.
pub struct ScratchDir {
    root: Utf8PathBuf,
    dir: OnceLock<Utf8PathBuf>,
}

impl ScratchDir {
    pub fn new(cache_root: &Utf8Path) -> Self {
        Self {
            root: cache_root.join("tmp"),
            dir: OnceLock::new(),
        }
    }

    /// Path of the scratch directory, creating `<cache>/tmp/asgen-<rand>`
    /// on first use.
    pub fn get(&self) -> Result<&Utf8Path> {
        if let Some(dir) = self.dir.get() {
            return Ok(dir.as_path());
        }
        fs::create_dir_all(&self.root)?;
        let tmp = tempfile::Builder::new()
            .prefix("asgen-")
            .tempdir_in(&self.root)?
            .keep();
        let tmp = Utf8PathBuf::from_path_buf(tmp)
            .map_err(|p| anyhow::anyhow!("non UTF-8 scratch path: {}", p.display()))?;
        // A concurrent initializer may have won the race; drop ours then.
        match self.dir.set(tmp.clone()) {
            Ok(()) => {}
            Err(_) => {
                let _ = fs::remove_dir_all(&tmp);
            }
        }
        Ok(self.dir.get().expect("scratch dir initialized").as_path())
    }

    pub fn cleanup(&self) -> Result<()> {
        if let Some(dir) = self.dir.get() {
            if dir.exists() {
                fs::remove_dir_all(dir).with_context(|| format!("remove scratch dir {}", dir))?;
            }
        }
        Ok(())
    }
}

/// Size descriptor for icons, parsed from and printed as `WxH[@S]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32, scale: u32) -> Self {
        Self {
            width,
            height,
            scale,
        }
    }

    pub const fn square(edge: u32) -> Self {
        Self::new(edge, edge, 1)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (dims, scale) = match s.split_once('@') {
            Some((d, sc)) => (d, sc.parse::<u32>().context("bad icon scale factor")?),
            None => (s, 1),
        };
        let (w, h) = match dims.split_once('x') {
            Some((w, h)) => (w, h),
            None => bail!("malformed icon size string '{}'", s),
        };
        let size = Self::new(
            w.parse().context("bad icon width")?,
            h.parse().context("bad icon height")?,
            scale,
        );
        if size.scale == 0 || size.width == 0 || size.height == 0 {
            bail!("icon size '{}' contains a zero dimension", s);
        }
        Ok(size)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 1 {
            write!(f, "{}x{}", self.width, self.height)
        } else {
            write!(f, "{}x{}@{}", self.width, self.height, self.scale)
        }
    }
}
