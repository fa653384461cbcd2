//! Parsed XDG icon-theme index, used to resolve logical icon names to
//! candidate file paths.

use anyhow::{Result, anyhow};
use configparser::ini::Ini;

use crate::utils::ImageSize;

/// Lookup extension order for themed icons.
pub const THEME_ICON_EXTENSIONS: &[&str] = &["png", "svgz", "svg", "xpm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryType {
    Fixed,
    Scalable,
    Threshold,
}

#[derive(Debug, Clone)]
pub struct ThemeDirectory {
    pub path: String,
    pub dtype: DirectoryType,
    pub size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub threshold: u32,
    pub scale: u32,
}

/// One parsed `index.theme`.
#[derive(Debug, Clone)]
pub struct Theme {
    name: String,
    directories: Vec<ThemeDirectory>,
}

impl Theme {
    pub fn new(name: &str, index_data: &str) -> Result<Self> {
        let mut ini = Ini::new_cs();
        ini.read(index_data.to_string())
            .map_err(|e| anyhow!("invalid theme index for '{}': {}", name, e))?;
        let map = ini.get_map_ref();

        let mut directories = Vec::new();
        for (section, fields) in map {
            if section == "Icon Theme" {
                continue;
            }
            // Symbolic icons carry no color information and are useless
            // for catalogs.
            if section.starts_with("symbolic/") {
                continue;
            }
            let get = |key: &str| fields.get(key).and_then(|v| v.clone());
            let Some(size) = get("Size").and_then(|v| v.parse::<u32>().ok()) else {
                continue;
            };
            let dtype = match get("Type").as_deref() {
                Some("Fixed") => DirectoryType::Fixed,
                Some("Scalable") => DirectoryType::Scalable,
                // Threshold is the XDG default for unlabeled directories.
                _ => DirectoryType::Threshold,
            };
            directories.push(ThemeDirectory {
                path: section.clone(),
                dtype,
                size,
                min_size: get("MinSize")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(size),
                max_size: get("MaxSize")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(size),
                threshold: get("Threshold").and_then(|v| v.parse().ok()).unwrap_or(2),
                scale: get("Scale").and_then(|v| v.parse().ok()).unwrap_or(1),
            });
        }
        directories.sort_by_key(|d| d.size);

        Ok(Self {
            name: name.to_string(),
            directories,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory_matches_size(
        dir: &ThemeDirectory,
        size: ImageSize,
        relaxed: bool,
    ) -> bool {
        if dir.scale != size.scale {
            return false;
        }
        let want = size.width;
        match dir.dtype {
            DirectoryType::Fixed => dir.size == want,
            DirectoryType::Scalable => dir.min_size <= want && want <= dir.max_size,
            DirectoryType::Threshold => {
                if relaxed {
                    dir.size >= want
                } else {
                    dir.size.abs_diff(want) <= dir.threshold
                }
            }
        }
    }

    /// Candidate absolute paths for an icon name at the given size, in
    /// directory-then-extension order.
    pub fn matching_icon_filenames(
        &self,
        icon_name: &str,
        size: ImageSize,
        relaxed: bool,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for dir in &self.directories {
            if !Self::directory_matches_size(dir, size, relaxed) {
                continue;
            }
            for ext in THEME_ICON_EXTENSIONS {
                out.push(format!(
                    "/usr/share/icons/{}/{}/{}.{}",
                    self.name, dir.path, icon_name, ext
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INDEX: &str = "[Icon Theme]\n\
Name=Test\n\
Directories=48x48/apps,64x64/apps,64x64@2/apps,scalable/apps,symbolic/apps\n\
\n\
[48x48/apps]\n\
Size=48\n\
Type=Fixed\n\
\n\
[64x64/apps]\n\
Size=64\n\
\n\
[64x64@2/apps]\n\
Size=64\n\
Scale=2\n\
\n\
[scalable/apps]\n\
Size=128\n\
Type=Scalable\n\
MinSize=8\n\
MaxSize=256\n\
\n\
[symbolic/apps]\n\
Size=16\n\
Type=Scalable\n\
MinSize=8\n\
MaxSize=512\n";

    fn theme() -> Theme {
        Theme::new("Test", SAMPLE_INDEX).unwrap()
    }

    #[test]
    fn test_parse_directories() {
        let theme = theme();
        // symbolic/ is skipped, the other four are kept sorted by size.
        assert_eq!(theme.directories.len(), 4);
        assert_eq!(theme.directories[0].size, 48);
        assert_eq!(theme.directories[0].dtype, DirectoryType::Fixed);
        assert_eq!(theme.directories.last().unwrap().size, 128);
    }

    #[test]
    fn test_fixed_match() {
        let theme = theme();
        let dir = &theme.directories[0];
        assert!(Theme::directory_matches_size(dir, ImageSize::square(48), false));
        assert!(!Theme::directory_matches_size(dir, ImageSize::square(64), false));
        assert!(!Theme::directory_matches_size(
            dir,
            ImageSize::new(48, 48, 2),
            false
        ));
    }

    #[test]
    fn test_threshold_match() {
        let theme = theme();
        let dir = theme
            .directories
            .iter()
            .find(|d| d.path == "64x64/apps")
            .unwrap();
        assert_eq!(dir.dtype, DirectoryType::Threshold);
        assert!(Theme::directory_matches_size(dir, ImageSize::square(64), false));
        assert!(Theme::directory_matches_size(dir, ImageSize::square(62), false));
        assert!(!Theme::directory_matches_size(dir, ImageSize::square(32), false));
        // Relaxed accepts any directory at least as large as the target.
        assert!(Theme::directory_matches_size(dir, ImageSize::square(32), true));
        assert!(!Theme::directory_matches_size(dir, ImageSize::square(128), true));
    }

    #[test]
    fn test_scalable_match() {
        let theme = theme();
        let dir = theme
            .directories
            .iter()
            .find(|d| d.dtype == DirectoryType::Scalable)
            .unwrap();
        assert!(Theme::directory_matches_size(dir, ImageSize::square(64), false));
        assert!(Theme::directory_matches_size(dir, ImageSize::square(256), false));
        assert!(!Theme::directory_matches_size(dir, ImageSize::square(257), false));
    }

    #[test]
    fn test_matching_filenames_order() {
        let theme = theme();
        let names = theme.matching_icon_filenames("foo", ImageSize::square(64), false);
        // 64x64/apps (threshold) and scalable/apps match; png comes first.
        assert_eq!(names[0], "/usr/share/icons/Test/64x64/apps/foo.png");
        assert_eq!(names[1], "/usr/share/icons/Test/64x64/apps/foo.svgz");
        assert_eq!(names[2], "/usr/share/icons/Test/64x64/apps/foo.svg");
        assert_eq!(names[3], "/usr/share/icons/Test/64x64/apps/foo.xpm");
        assert!(names[4].starts_with("/usr/share/icons/Test/scalable/apps/"));
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn test_scale_matching() {
        let theme = theme();
        let names = theme.matching_icon_filenames("foo", ImageSize::new(64, 64, 2), false);
        assert_eq!(names.len(), 4);
        assert!(names[0].contains("64x64@2/apps"));
    }

    #[test]
    fn test_bundled_hicolor_index_parses() {
        let theme = Theme::new("hicolor", include_str!("../../data/hicolor-index.theme")).unwrap();
        assert!(!theme
            .matching_icon_filenames("foo", ImageSize::square(64), false)
            .is_empty());
    }
}
