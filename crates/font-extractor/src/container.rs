//! `.drfx` bundles: zip archives holding `.setting` presets, XML/plist
//! metadata and sometimes the fonts themselves.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use font_core::{FontReference, SourceFileKind};
use font_parser::{is_font_file, FontParser};
use roxmltree::{Document, Node, ParsingOptions};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::{setting, BundledFont, ScanError};

/// Entries larger than this are not decompressed
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

const BINARY_PLIST_MAGIC: &[u8] = b"bplist";

pub(crate) struct ContainerContents {
    pub references: Vec<FontReference>,
    pub bundled: Vec<BundledFont>,
}

pub(crate) fn scan_container(path: &Path, parser: &FontParser) -> Result<ContainerContents, ScanError> {
    let file = File::open(path)?;
    scan_archive(file, path, parser)
}

pub(crate) fn scan_archive<R: Read + Seek>(
    reader: R,
    path: &Path,
    parser: &FontParser,
) -> Result<ContainerContents, ScanError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut contents = ContainerContents {
        references: Vec::new(),
        bundled: Vec::new(),
    };

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let lower = name.to_lowercase();
        let wanted = lower.ends_with(".setting")
            || lower.ends_with(".xml")
            || lower.ends_with(".plist")
            || is_font_file(Path::new(&lower));
        if !wanted {
            continue;
        }
        if entry.size() > MAX_ENTRY_BYTES {
            warn!("{}: skipping oversized entry {} ({} bytes)", path.display(), name, entry.size());
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;

        if lower.ends_with(".setting") {
            let found = setting::scan_bytes(&data, path, SourceFileKind::ContainerProject);
            debug!("{}!{}: {} font references", path.display(), name, found.len());
            contents.references.extend(found);
        } else if lower.ends_with(".xml") || lower.ends_with(".plist") {
            if data.starts_with(BINARY_PLIST_MAGIC) {
                debug!("{}!{}: binary plist, skipped", path.display(), name);
                continue;
            }
            match scan_metadata(&data, path) {
                Ok(found) => {
                    debug!("{}!{}: {} font declarations", path.display(), name, found.len());
                    contents.references.extend(found);
                }
                Err(reason) => warn!("{}!{}: skipping unreadable metadata: {}", path.display(), name, reason),
            }
        } else {
            match parser.parse_font_bytes(&data) {
                Ok(faces) => contents.bundled.extend(faces.into_iter().map(|face| BundledFont {
                    entry_name: name.clone(),
                    family: face.family,
                    subfamily: face.subfamily,
                })),
                Err(e) => warn!("{}: bundled font {} is unreadable: {}", path.display(), name, e),
            }
        }
    }

    Ok(contents)
}

const FONT_ELEMENTS: &[&str] = &["font", "fontfamily"];
const INSTANCE_ELEMENTS: &[&str] = &["instance", "namedinstance", "style"];
const FAMILY_ATTRS: &[&str] = &["family", "fontfamily", "name", "value"];
const STYLE_ATTRS: &[&str] = &["style", "fontstyle", "subfamily"];
const INSTANCE_ATTRS: &[&str] = &["name", "style", "value"];
const PLIST_FONT_KEYS: &[&str] = &["font", "fontname", "fontfamily"];
const PLIST_STYLE_KEYS: &[&str] = &["style", "fontstyle"];

/// Read font declarations out of an XML or plist metadata entry.
///
/// Element form: `<Font family="Inter" style="Bold"/>`, or a `<Font>` with
/// `<Instance name="…"/>` children for variable fonts (one reference per
/// instance). Plist form: `<key>FontFamily</key><string>Inter</string>`
/// optionally followed by a `FontStyle` key.
pub(crate) fn scan_metadata(data: &[u8], source_file: &Path) -> Result<Vec<FontReference>, String> {
    let text = String::from_utf8_lossy(data);
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(&text, options).map_err(|e| format!("malformed XML: {}", e))?;

    let mut found: Vec<(String, Option<String>)> = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        let tag = tag_name(node);
        if FONT_ELEMENTS.contains(&tag.as_str()) {
            font_element(node, &mut found);
        } else if tag == "dict" {
            plist_dict(node, &mut found);
        }
    }

    let mut references: Vec<FontReference> = Vec::with_capacity(found.len());
    for (family, style) in found {
        if !references
            .iter()
            .any(|r| r.raw_name == family && r.style_hint == style)
        {
            references.push(FontReference::new(
                family,
                style,
                source_file,
                SourceFileKind::ContainerProject,
            ));
        }
    }
    Ok(references)
}

/// A font element; variable fonts expand to one entry per named instance
fn font_element(node: Node<'_, '_>, out: &mut Vec<(String, Option<String>)>) {
    let family = attr_value(node, FAMILY_ATTRS).or_else(|| own_text(node));
    let Some(family) = family else {
        return;
    };

    let mut instances: Vec<String> = Vec::new();
    for child in node.descendants().skip(1).filter(|n| n.is_element()) {
        if !INSTANCE_ELEMENTS.contains(&tag_name(child).as_str()) || owning_font(child) != Some(node) {
            continue;
        }
        if let Some(instance) = attr_value(child, INSTANCE_ATTRS).or_else(|| own_text(child)) {
            if !instances.contains(&instance) {
                instances.push(instance);
            }
        }
    }

    if instances.is_empty() {
        out.push((family, attr_value(node, STYLE_ATTRS)));
    } else {
        out.extend(instances.into_iter().map(|i| (family.clone(), Some(i))));
    }
}

/// `<key>`/`<string>` pairs of one plist dictionary
fn plist_dict(node: Node<'_, '_>, out: &mut Vec<(String, Option<String>)>) {
    let mut current: Option<(String, Option<String>)> = None;
    let mut key = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match tag_name(child).as_str() {
            "key" => key = child.text().unwrap_or_default().trim().to_lowercase(),
            "string" => {
                let value = child.text().unwrap_or_default().trim().to_string();
                if PLIST_FONT_KEYS.contains(&key.as_str()) && !value.is_empty() {
                    if let Some(done) = current.replace((value, None)) {
                        out.push(done);
                    }
                } else if PLIST_STYLE_KEYS.contains(&key.as_str()) {
                    if let Some((_, style @ None)) = current.as_mut() {
                        *style = Some(value).filter(|v| !v.is_empty());
                    }
                }
                key.clear();
            }
            _ => key.clear(),
        }
    }
    out.extend(current);
}

fn tag_name(node: Node<'_, '_>) -> String {
    node.tag_name().name().to_ascii_lowercase()
}

/// Closest enclosing font element
fn owning_font<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    node.ancestors()
        .skip(1)
        .find(|n| n.is_element() && FONT_ELEMENTS.contains(&tag_name(*n).as_str()))
}

/// Text directly inside the element, ignoring child elements
fn own_text(node: Node<'_, '_>) -> Option<String> {
    let text: String = node.children().filter_map(|n| n.is_text().then(|| n.text()).flatten()).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// First non-empty attribute whose lowercase name is in `keys`, honoring
/// the order of `keys`
fn attr_value(node: Node<'_, '_>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        node.attributes()
            .find(|a| a.name().eq_ignore_ascii_case(key))
            .map(|a| a.value().trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    fn refs(xml: &str) -> Vec<(String, Option<String>)> {
        scan_metadata(xml.as_bytes(), Path::new("pack.drfx"))
            .unwrap()
            .into_iter()
            .map(|r| (r.raw_name, r.style_hint))
            .collect()
    }

    #[test]
    fn variable_font_instances_expand() {
        let xml = r#"<?xml version="1.0"?>
            <Template>
              <Fonts>
                <Font family="Inter" variable="true">
                  <Instance name="Light"/>
                  <Instance name="Bold"/>
                  <NamedInstance>Bold Condensed</NamedInstance>
                </Font>
              </Fonts>
            </Template>"#;
        assert_eq!(
            refs(xml),
            vec![
                ("Inter".to_string(), Some("Light".to_string())),
                ("Inter".to_string(), Some("Bold".to_string())),
                ("Inter".to_string(), Some("Bold Condensed".to_string())),
            ]
        );
    }

    #[test]
    fn element_and_text_forms() {
        let xml = r#"<Root>
              <Font family="Lato" style="Italic"/>
              <FontFamily>Merriweather</FontFamily>
            </Root>"#;
        assert_eq!(
            refs(xml),
            vec![
                ("Lato".to_string(), Some("Italic".to_string())),
                ("Merriweather".to_string(), None),
            ]
        );
    }

    #[test]
    fn plist_key_value_pairs() {
        let xml = r#"<plist version="1.0"><array>
              <dict>
                <key>FontFamily</key><string>Roboto Slab</string>
                <key>FontStyle</key><string>Bold</string>
              </dict>
              <dict>
                <key>FontName</key><string>Anton</string>
              </dict>
            </array></plist>"#;
        assert_eq!(
            refs(xml),
            vec![
                ("Roboto Slab".to_string(), Some("Bold".to_string())),
                ("Anton".to_string(), None),
            ]
        );
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(scan_metadata(b"<Font family=\"A\"></Fnot>", Path::new("x.drfx")).is_err());
    }

    #[test]
    fn archive_entries_are_dispatched() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = FileOptions::default();
            zip.start_file("Templates/Title.setting", options).unwrap();
            zip.write_all(br#"Font = Input { Value = "Oswald", }, Style = Input { Value = "Bold", },"#)
                .unwrap();
            zip.start_file("meta/fonts.xml", options).unwrap();
            zip.write_all(br#"<Fonts><Font family="Lato"/></Fonts>"#).unwrap();
            zip.start_file("Fonts/Bundled-Regular.ttf", options).unwrap();
            zip.write_all(&font_parser::test_support::minimal_font("Bundled", "Regular"))
                .unwrap();
            zip.start_file("readme.txt", options).unwrap();
            zip.write_all(b"Font = Input { Value = \"Ignored\", },").unwrap();
            zip.finish().unwrap();
        }
        cursor.set_position(0);

        let contents = scan_archive(cursor, Path::new("pack.drfx"), &FontParser).unwrap();
        let names: Vec<&str> = contents.references.iter().map(|r| r.raw_name.as_str()).collect();
        assert_eq!(names, vec!["Oswald", "Lato"]);
        assert!(contents
            .references
            .iter()
            .all(|r| r.source_file_kind == SourceFileKind::ContainerProject));
        assert_eq!(contents.bundled.len(), 1);
        assert_eq!(contents.bundled[0].family, "Bundled");
    }

    #[test]
    fn unreadable_metadata_does_not_hide_setting_references() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = FileOptions::default();
            zip.start_file("Title.setting", options).unwrap();
            zip.write_all(br#"Font = Input { Value = "Oswald", },"#).unwrap();
            zip.start_file("Info.plist", options).unwrap();
            zip.write_all(b"bplist00\xd1\x01\x02\x53Key\x55Value\x08\x0b").unwrap();
            zip.start_file("broken.xml", options).unwrap();
            zip.write_all(b"<Fonts><Font family=\"Lato\"></Fonts>").unwrap();
            zip.finish().unwrap();
        }
        cursor.set_position(0);

        let contents = scan_archive(cursor, Path::new("pack.drfx"), &FontParser).unwrap();
        let names: Vec<&str> = contents.references.iter().map(|r| r.raw_name.as_str()).collect();
        assert_eq!(names, vec!["Oswald"]);
    }
}
