use std::fmt;
use std::fs;
use std::path::Path;

use font_core::{FontError, FontIdentity, FontResult};
use font_normalizer::FontNormalizer;
use ttf_parser::{name_id, Face};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

/// Font file format, detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontFormat {
    Ttf,
    Otf,
    Ttc,
    Woff,
    Woff2,
    Other,
}

impl FontFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FontFormat::Ttf => "ttf",
            FontFormat::Otf => "otf",
            FontFormat::Ttc => "ttc",
            FontFormat::Woff => "woff",
            FontFormat::Woff2 => "woff2",
            FontFormat::Other => "bin",
        }
    }

    /// Formats that can be dropped into a system font directory
    pub fn is_installable(&self) -> bool {
        matches!(self, FontFormat::Ttf | FontFormat::Otf | FontFormat::Ttc)
    }
}

impl fmt::Display for FontFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontFormat::Ttf => write!(f, "TTF"),
            FontFormat::Otf => write!(f, "OTF"),
            FontFormat::Ttc => write!(f, "TTC"),
            FontFormat::Woff => write!(f, "WOFF"),
            FontFormat::Woff2 => write!(f, "WOFF2"),
            FontFormat::Other => write!(f, "Other"),
        }
    }
}

/// Metadata of one face inside a font file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    /// Typographic family (name ID 16), falling back to the legacy family (ID 1)
    pub family: String,

    /// Typographic subfamily (ID 17), falling back to the legacy subfamily (ID 2)
    pub subfamily: Option<String>,

    pub postscript_name: Option<String>,

    /// Has an `fvar` table
    pub variable: bool,

    pub format: FontFormat,

    /// Index inside a collection, 0 for single fonts
    pub face_index: u32,
}

impl FontFace {
    pub fn identity(&self, normalizer: &FontNormalizer) -> FontIdentity {
        normalizer.normalize_name(&self.family, self.subfamily.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FontParser;

impl FontParser {
    /// Read a font file from disk and return every face in it
    pub fn parse_font_file<P: AsRef<Path>>(&self, path: P) -> FontResult<Vec<FontFace>> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        self.parse_font_bytes(&data).map_err(|e| FontError::FontMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Parse raw bytes. Anything that is not an installable sfnt font is an
    /// `InvalidFontFile` error.
    pub fn parse_font_bytes(&self, data: &[u8]) -> FontResult<Vec<FontFace>> {
        let format = self.validate_container(data)?;

        let face_count = match format {
            FontFormat::Ttc => {
                let count = ttf_parser::fonts_in_collection(data)
                    .ok_or_else(|| FontError::InvalidFontFile("malformed font collection".to_string()))?;
                // Each face needs a 4-byte offset after the 12-byte header
                if count as usize > (data.len() - 12) / 4 {
                    return Err(FontError::InvalidFontFile(format!(
                        "collection claims {} faces in {} bytes",
                        count,
                        data.len()
                    )));
                }
                count
            }
            _ => 1,
        };

        let mut faces = Vec::new();
        for index in 0..face_count {
            let face = Face::parse(data, index)
                .map_err(|e| FontError::InvalidFontFile(format!("failed to parse font: {}", e)))?;
            faces.push(self.describe(&face, format, index));
        }
        if faces.is_empty() {
            return Err(FontError::InvalidFontFile("font collection is empty".to_string()));
        }
        Ok(faces)
    }

    /// Cheap pre-checks before handing bytes to ttf-parser
    fn validate_container(&self, data: &[u8]) -> FontResult<FontFormat> {
        if data.len() < 12 {
            return Err(FontError::InvalidFontFile(format!(
                "file too short ({} bytes)",
                data.len()
            )));
        }
        if looks_like_markup(data) {
            return Err(FontError::InvalidFontFile(
                "received an HTML/text page instead of a font".to_string(),
            ));
        }
        match determine_format(data) {
            format if format.is_installable() => Ok(format),
            FontFormat::Woff | FontFormat::Woff2 => Err(FontError::UnsupportedFormat),
            _ => Err(FontError::InvalidFontFile("unrecognized font signature".to_string())),
        }
    }

    fn describe(&self, face: &Face, format: FontFormat, face_index: u32) -> FontFace {
        let family = self
            .extract_string(face, name_id::TYPOGRAPHIC_FAMILY)
            .or_else(|| self.extract_string(face, name_id::FAMILY))
            .unwrap_or_else(|| "Unknown".to_string());
        let subfamily = self
            .extract_string(face, name_id::TYPOGRAPHIC_SUBFAMILY)
            .or_else(|| self.extract_string(face, name_id::SUBFAMILY));
        let postscript_name = self.extract_string(face, name_id::POST_SCRIPT_NAME);

        FontFace {
            family,
            subfamily,
            postscript_name,
            variable: face.is_variable(),
            format,
            face_index,
        }
    }

    fn extract_string(&self, face: &Face, name_id: u16) -> Option<String> {
        face.names()
            .into_iter()
            .filter(|name| name.name_id == name_id)
            .find_map(|name| name.to_string())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Detect a format from the first four bytes
pub fn determine_format(data: &[u8]) -> FontFormat {
    if data.len() < 4 {
        return FontFormat::Other;
    }
    match &data[0..4] {
        b"OTTO" => FontFormat::Otf,
        b"ttcf" => FontFormat::Ttc,
        b"wOFF" => FontFormat::Woff,
        b"wOF2" => FontFormat::Woff2,
        b"true" => FontFormat::Ttf,
        [0x00, 0x01, 0x00, 0x00] => FontFormat::Ttf,
        _ => FontFormat::Other,
    }
}

/// Error pages, redirects and captchas come back as markup with a 200 status
fn looks_like_markup(data: &[u8]) -> bool {
    let head = &data[..data.len().min(512)];
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    if head.get(start) == Some(&b'<') {
        return true;
    }
    let lowered = head.to_ascii_lowercase();
    lowered.windows(5).any(|w| w == b"<html") || lowered.windows(9).any(|w| w == b"<!doctype")
}

/// True for file names the installer and index care about
pub fn is_font_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext_lower = ext.to_string_lossy().to_lowercase();
        matches!(ext_lower.as_str(), "ttf" | "otf" | "ttc")
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_font, variable_font};

    #[test]
    fn reads_family_and_subfamily() {
        let data = minimal_font("Obscure Display", "Bold");
        let faces = FontParser.parse_font_bytes(&data).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].family, "Obscure Display");
        assert_eq!(faces[0].subfamily.as_deref(), Some("Bold"));
        assert_eq!(faces[0].format, FontFormat::Ttf);
        assert!(!faces[0].variable);
        assert_eq!(
            faces[0].identity(&FontNormalizer),
            FontIdentity::new("obscure display", "bold")
        );
    }

    #[test]
    fn detects_variable_fonts() {
        let data = variable_font("Inter");
        let faces = FontParser.parse_font_bytes(&data).unwrap();
        assert!(faces[0].variable);
    }

    #[test]
    fn rejects_html_error_pages() {
        let page = b"<!DOCTYPE html><html><body>Rate limited</body></html>";
        assert!(matches!(
            FontParser.parse_font_bytes(page),
            Err(FontError::InvalidFontFile(_))
        ));
    }

    #[test]
    fn rejects_truncated_downloads() {
        let data = minimal_font("Arial", "Regular");
        let truncated = &data[..data.len() / 2];
        assert!(FontParser.parse_font_bytes(truncated).is_err());
    }

    #[test]
    fn rejects_collection_with_impossible_face_count() {
        let mut data = b"ttcf\x00\x01\x00\x00\xFF\xFF\xFF\xFF".to_vec();
        data.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            FontParser.parse_font_bytes(&data),
            Err(FontError::InvalidFontFile(_))
        ));
    }

    #[test]
    fn rejects_web_only_formats() {
        let mut data = b"wOF2".to_vec();
        data.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            FontParser.parse_font_bytes(&data),
            Err(FontError::UnsupportedFormat)
        ));
    }
}
