//! Fusion `.setting` files.
//!
//! Text+ tools serialize their inputs as
//! `Font = Input { Value = "Open Sans", }` and `Style = Input { Value = "Bold", }`.
//! The scan works on raw bytes, so binary blobs and odd encodings elsewhere in
//! the file are harmless.

use std::path::Path;

use font_core::{FontReference, SourceFileKind};
use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    static ref INPUT_FIELD: Regex = Regex::new(
        r#"(?s-u)\b(Font|Style)\s*=\s*Input\s*\{[^}]*?\bValue\s*=\s*"((?:[^"\\]|\\.)*)""#
    )
    .unwrap();
    static ref INPUTS_BLOCK: Regex = Regex::new(r"(?-u)\bInputs\s*=\s*\{").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Font,
    Style,
}

/// Extract every font reference in `data`.
///
/// Styles pair with fonts inside the same `Inputs = { … }` block only. Within
/// a block each style value belongs to the closest font marker before it; a
/// style that appears before any font goes to the block's first font.
pub fn scan_bytes(data: &[u8], source_file: &Path, kind: SourceFileKind) -> Vec<FontReference> {
    let block_starts: Vec<usize> = INPUTS_BLOCK.find_iter(data).map(|m| m.start()).collect();

    let mut fonts: Vec<(String, Option<String>)> = Vec::new();
    let mut current_block: Option<usize> = None;
    let mut block_first_font = 0;
    let mut orphan_style: Option<String> = None;

    for caps in INPUT_FIELD.captures_iter(data) {
        let start = caps.get(0).map_or(0, |m| m.start());
        let block = block_starts.partition_point(|&b| b <= start);
        if current_block != Some(block) {
            current_block = Some(block);
            block_first_font = fonts.len();
            orphan_style = None;
        }

        let field = match &caps[1] {
            b"Font" => Field::Font,
            _ => Field::Style,
        };
        let value = decode_value(&caps[2]);
        if value.is_empty() {
            continue;
        }
        match field {
            Field::Font => {
                let style = if fonts.len() == block_first_font {
                    orphan_style.take()
                } else {
                    None
                };
                fonts.push((value, style));
            }
            Field::Style if fonts.len() > block_first_font => {
                if let Some((_, style @ None)) = fonts.last_mut() {
                    *style = Some(value);
                }
            }
            Field::Style => {
                orphan_style.get_or_insert(value);
            }
        }
    }

    let mut references: Vec<FontReference> = Vec::with_capacity(fonts.len());
    for (name, style) in fonts {
        let duplicate = references
            .iter()
            .any(|r| r.raw_name == name && r.style_hint == style);
        if !duplicate {
            references.push(FontReference::new(name, style, source_file, kind));
        }
    }
    references
}

/// UTF-8 when valid, Latin-1 otherwise; unescapes `\"` and `\\`
fn decode_value(raw: &[u8]) -> String {
    let text = match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    };
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_PLUS: &str = r#"{
	Tools = ordered() {
		Title = TextPlus {
			Inputs = {
				StyledText = Input { Value = "Hello", },
				Font = Input { Value = "Open Sans", },
				Style = Input { Value = "Bold", },
				Size = Input { Value = 0.08, },
			},
		},
		Subtitle = TextPlus {
			Inputs = {
				Font = Input { Value = "Obscure Display", },
			},
		},
	},
}"#;

    fn scan(data: &[u8]) -> Vec<(String, Option<String>)> {
        scan_bytes(data, Path::new("t.setting"), SourceFileKind::SettingFile)
            .into_iter()
            .map(|r| (r.raw_name, r.style_hint))
            .collect()
    }

    #[test]
    fn pairs_fonts_with_their_styles() {
        assert_eq!(
            scan(TEXT_PLUS.as_bytes()),
            vec![
                ("Open Sans".to_string(), Some("Bold".to_string())),
                ("Obscure Display".to_string(), None),
            ]
        );
    }

    #[test]
    fn style_before_font_is_attributed_forward() {
        let data = br#"Style = Input { Value = "Italic", }, Font = Input { Value = "Lora", },"#;
        assert_eq!(scan(data), vec![("Lora".to_string(), Some("Italic".to_string()))]);
    }

    #[test]
    fn styles_stay_inside_their_tool() {
        let data = br#"Tools = ordered() {
            Title = TextPlus { Inputs = {
                Font = Input { Value = "Arial", },
            }, },
            Credits = TextPlus { Inputs = {
                Style = Input { Value = "Bold", },
                Font = Input { Value = "Lato", },
            }, },
        }"#;
        assert_eq!(
            scan(data),
            vec![
                ("Arial".to_string(), None),
                ("Lato".to_string(), Some("Bold".to_string())),
            ]
        );
    }

    #[test]
    fn survives_binary_noise_and_latin1() {
        let mut data = vec![0xFF, 0x00, 0xFE, 0x81];
        data.extend_from_slice(b"Font = Input { Value = \"Caf");
        data.push(0xE9); // Latin-1 e-acute
        data.extend_from_slice(b"\", },");
        data.extend_from_slice(&[0x00, 0x9F]);
        assert_eq!(scan(&data), vec![("Café".to_string(), None)]);
    }

    #[test]
    fn collapses_duplicates_and_skips_empty_values() {
        let data = br#"
            Font = Input { Value = "Lato", },
            Font = Input { Value = "", },
            Font = Input { Value = "Lato", },
        "#;
        assert_eq!(scan(data), vec![("Lato".to_string(), None)]);
    }

    #[test]
    fn escaped_quotes_are_kept() {
        let data = br#"Font = Input { Value = "Bob\"s Font", },"#;
        assert_eq!(scan(data), vec![("Bob\"s Font".to_string(), None)]);
    }
}
