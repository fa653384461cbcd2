//! Icon pixel work: decoding rasters, rasterizing SVG, scaling and PNG
//! encoding.

use std::io::Cursor;
use std::io::Read;
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow, bail};
use camino::Utf8Path;
use image::DynamicImage;
use image::imageops::FilterType;

use crate::utils::ImageSize;

/// Source formats accepted for icons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconFormat {
    Png,
    Jpeg,
    Svg,
    Svgz,
    Xpm,
}

impl IconFormat {
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.').map(|(_, e)| e)?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(IconFormat::Png),
            "jpg" | "jpeg" => Some(IconFormat::Jpeg),
            "svg" => Some(IconFormat::Svg),
            "svgz" => Some(IconFormat::Svgz),
            "xpm" => Some(IconFormat::Xpm),
            _ => None,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, IconFormat::Svg | IconFormat::Svgz)
    }
}

/// Decodes icon data into pixels. Vector sources are rendered onto a
/// canvas of `(width * scale, height * scale)`.
pub fn load_icon_image(data: &[u8], format: IconFormat, canvas: ImageSize) -> Result<DynamicImage> {
    match format {
        IconFormat::Png => image::load_from_memory_with_format(data, image::ImageFormat::Png)
            .context("decode PNG icon"),
        IconFormat::Jpeg => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .context("decode JPEG icon"),
        IconFormat::Svg => render_svg(data, canvas),
        IconFormat::Svgz => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut raw = Vec::new();
            decoder
                .read_to_end(&mut raw)
                .context("decompress svgz icon")?;
            render_svg(&raw, canvas)
        }
        IconFormat::Xpm => decode_xpm(data),
    }
}

fn render_svg(data: &[u8], canvas: ImageSize) -> Result<DynamicImage> {
    let opt = resvg::usvg::Options::default();
    let fontdb = resvg::usvg::fontdb::Database::new();
    let tree = resvg::usvg::Tree::from_data(data, &opt, &fontdb)
        .map_err(|e| anyhow!("parse SVG: {}", e))?;

    let width = canvas.width * canvas.scale;
    let height = canvas.height * canvas.scale;
    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| anyhow!("invalid SVG canvas {}x{}", width, height))?;
    let svg_size = tree.size();
    if svg_size.width() <= 0.0 || svg_size.height() <= 0.0 {
        bail!("SVG has a zero-sized viewport");
    }
    let transform = resvg::tiny_skia::Transform::from_scale(
        width as f32 / svg_size.width(),
        height as f32 / svg_size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    let png = pixmap
        .encode_png()
        .map_err(|e| anyhow!("encode rasterized SVG: {}", e))?;
    image::load_from_memory_with_format(&png, image::ImageFormat::Png)
        .context("reload rasterized SVG")
}

fn xpm_named_color(name: &str) -> Option<[u8; 4]> {
    match name.to_ascii_lowercase().as_str() {
        "none" | "transparent" => Some([0, 0, 0, 0]),
        "black" => Some([0, 0, 0, 255]),
        "white" => Some([255, 255, 255, 255]),
        "red" => Some([255, 0, 0, 255]),
        "green" => Some([0, 255, 0, 255]),
        "blue" => Some([0, 0, 255, 255]),
        "gray" | "grey" => Some([128, 128, 128, 255]),
        _ => None,
    }
}

fn xpm_hex_color(value: &str) -> Option<[u8; 4]> {
    let digits = value.strip_prefix('#')?;
    if !digits.is_ascii() {
        return None;
    }
    let expand = |s: &str| u8::from_str_radix(s, 16).ok();
    match digits.len() {
        3 => {
            let bytes: Vec<u8> = digits
                .chars()
                .filter_map(|c| expand(&format!("{}{}", c, c)))
                .collect();
            (bytes.len() == 3).then(|| [bytes[0], bytes[1], bytes[2], 255])
        }
        6 => {
            let bytes: Vec<u8> = (0..3).filter_map(|i| expand(&digits[i * 2..i * 2 + 2])).collect();
            (bytes.len() == 3).then(|| [bytes[0], bytes[1], bytes[2], 255])
        }
        // Some XPMs carry 16-bit channels; take the high byte.
        12 => {
            let bytes: Vec<u8> = (0..3).filter_map(|i| expand(&digits[i * 4..i * 4 + 2])).collect();
            (bytes.len() == 3).then(|| [bytes[0], bytes[1], bytes[2], 255])
        }
        _ => None,
    }
}

/// Minimal XPM3 decoder. The format only appears for ancient pixmaps;
/// anything this cannot read is rejected with an error and ends up as an
/// icon hint.
fn decode_xpm(data: &[u8]) -> Result<DynamicImage> {
    let text = std::str::from_utf8(data).context("XPM is not UTF-8")?;
    // Pull out the C string literals that make up the image.
    let mut strings = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('"') else { break };
        strings.push(&after[..end]);
        rest = &after[end + 1..];
    }
    if strings.is_empty() {
        bail!("no XPM data strings found");
    }

    let header: Vec<u32> = strings[0]
        .split_whitespace()
        .take(4)
        .filter_map(|v| v.parse().ok())
        .collect();
    if header.len() < 4 {
        bail!("malformed XPM header '{}'", strings[0]);
    }
    let (width, height, ncolors, cpp) = (
        header[0] as usize,
        header[1] as usize,
        header[2] as usize,
        header[3] as usize,
    );
    if width == 0 || height == 0 || cpp == 0 || strings.len() < 1 + ncolors + height {
        bail!("truncated XPM image");
    }

    let mut palette = std::collections::HashMap::new();
    for def in &strings[1..1 + ncolors] {
        if def.len() < cpp {
            bail!("malformed XPM color definition '{}'", def);
        }
        let (chars, spec) = def.split_at(cpp);
        let mut color = [0, 0, 0, 0];
        let mut tokens = spec.split_whitespace().peekable();
        while let Some(token) = tokens.next() {
            if token == "c" {
                if let Some(value) = tokens.next() {
                    color = xpm_hex_color(value)
                        .or_else(|| xpm_named_color(value))
                        .unwrap_or([0, 0, 0, 0]);
                }
                break;
            }
            // Skip the value of non-color keys (m, g, g4, s).
            tokens.next();
        }
        palette.insert(chars.to_string(), color);
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in &strings[1 + ncolors..1 + ncolors + height] {
        if row.len() < width * cpp {
            bail!("truncated XPM pixel row");
        }
        for x in 0..width {
            let key = &row[x * cpp..(x + 1) * cpp];
            let color = palette.get(key).copied().unwrap_or([0, 0, 0, 0]);
            pixels.extend_from_slice(&color);
        }
    }

    let img = image::RgbaImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| anyhow!("XPM dimensions do not match pixel data"))?;
    Ok(DynamicImage::ImageRgba8(img))
}

/// Scales an image to the exact target size (including the scale factor)
/// and encodes it as PNG.
pub fn scale_to_png(img: &DynamicImage, size: ImageSize) -> Result<Vec<u8>> {
    let width = size.width * size.scale;
    let height = size.height * size.scale;
    let scaled = if img.width() == width && img.height() == height {
        img.clone()
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };
    let mut buf = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .context("encode PNG")?;
    Ok(buf)
}

fn optipng_binary() -> Option<&'static Utf8Path> {
    static OPTIPNG: OnceLock<Option<camino::Utf8PathBuf>> = OnceLock::new();
    OPTIPNG
        .get_or_init(|| {
            which::which("optipng")
                .ok()
                .and_then(|p| camino::Utf8PathBuf::from_path_buf(p).ok())
        })
        .as_deref()
}

pub fn optipng_available() -> bool {
    optipng_binary().is_some()
}

/// Runs optipng on a stored PNG; failures only log, the unoptimized file
/// is perfectly usable.
pub fn optimize_png(path: &Utf8Path) {
    let Some(optipng) = optipng_binary() else {
        return;
    };
    match Command::new(optipng).arg("-quiet").arg(path).output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            tracing::warn!(
                "optipng failed for {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(e) => tracing::warn!("could not run optipng: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XPM: &str = r#"/* XPM */
static char * sample_xpm[] = {
"4 2 2 1",
"  c None",
". c #FF0000",
" .. ",
".  ."};
"#;

    #[test]
    fn test_format_from_filename() {
        assert_eq!(IconFormat::from_filename("foo.png"), Some(IconFormat::Png));
        assert_eq!(IconFormat::from_filename("foo.JPG"), Some(IconFormat::Jpeg));
        assert_eq!(IconFormat::from_filename("foo.svgz"), Some(IconFormat::Svgz));
        assert_eq!(IconFormat::from_filename("foo.ico"), None);
        assert_eq!(IconFormat::from_filename("noext"), None);
        assert!(IconFormat::Svg.is_vector());
        assert!(!IconFormat::Png.is_vector());
    }

    #[test]
    fn test_decode_xpm() {
        let img = decode_xpm(SAMPLE_XPM.as_bytes()).unwrap();
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 2);
        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(rgba.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_xpm_truncated() {
        assert!(decode_xpm(b"\"4 2 2 1\"").is_err());
        assert!(decode_xpm(b"not xpm at all").is_err());
    }

    #[test]
    fn test_png_roundtrip_and_scale() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            128,
            128,
            image::Rgba([10, 20, 30, 255]),
        ));
        let png = scale_to_png(&img, ImageSize::square(64)).unwrap();
        let reloaded =
            image::load_from_memory_with_format(&png, image::ImageFormat::Png).unwrap();
        assert_eq!(reloaded.width(), 64);
        assert_eq!(reloaded.height(), 64);

        // Scale factor multiplies the pixel dimensions.
        let png = scale_to_png(&img, ImageSize::new(64, 64, 2)).unwrap();
        let reloaded =
            image::load_from_memory_with_format(&png, image::ImageFormat::Png).unwrap();
        assert_eq!(reloaded.width(), 128);
    }

    #[test]
    fn test_render_svg() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16">
<rect width="16" height="16" fill="#ff0000"/></svg>"##;
        let img = load_icon_image(svg.as_bytes(), IconFormat::Svg, ImageSize::square(64)).unwrap();
        assert_eq!(img.width(), 64);
        assert_eq!(img.height(), 64);
        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(32, 32).0, [255, 0, 0, 255]);
    }
}
