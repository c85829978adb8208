//! Synthesized fonts for tests.
//!
//! Produces the smallest sfnt files ttf-parser accepts: `head`, `hhea`,
//! `maxp` and a Windows/Unicode `name` table, plus `fvar` for variable fonts.

/// A static font with the given family and subfamily name records
pub fn minimal_font(family: &str, subfamily: &str) -> Vec<u8> {
    build(family, subfamily, false)
}

/// A variable font (one `wght` axis) with subfamily "Regular"
pub fn variable_font(family: &str) -> Vec<u8> {
    build(family, "Regular", true)
}

fn build(family: &str, subfamily: &str, variable: bool) -> Vec<u8> {
    let full_name = format!("{} {}", family, subfamily);
    let postscript: String = format!("{}-{}", family, subfamily)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut tables: Vec<([u8; 4], Vec<u8>)> = vec![
        (*b"head", head()),
        (*b"hhea", hhea()),
        (*b"maxp", maxp()),
        (
            *b"name",
            name(&[(1, family), (2, subfamily), (4, &full_name), (6, &postscript)]),
        ),
    ];
    if variable {
        tables.push((*b"fvar", fvar()));
    }
    sfnt(tables)
}

fn sfnt(mut tables: Vec<([u8; 4], Vec<u8>)>) -> Vec<u8> {
    // Table records must be sorted by tag
    tables.sort_by(|a, b| a.0.cmp(&b.0));

    let num_tables = tables.len() as u16;
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&[0u8; 6]); // searchRange, entrySelector, rangeShift

    let mut offset = 12 + 16 * tables.len();
    let mut body = Vec::new();
    for (tag, data) in &tables {
        out.extend_from_slice(tag);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());

        body.extend_from_slice(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
        offset = 12 + 16 * tables.len() + body.len();
    }
    out.extend_from_slice(&body);
    out
}

fn head() -> Vec<u8> {
    let mut t = Vec::with_capacity(54);
    t.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // version
    t.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // fontRevision
    t.extend_from_slice(&0u32.to_be_bytes()); // checkSumAdjustment
    t.extend_from_slice(&0x5F0F_3CF5u32.to_be_bytes()); // magicNumber
    t.extend_from_slice(&0u16.to_be_bytes()); // flags
    t.extend_from_slice(&1000u16.to_be_bytes()); // unitsPerEm
    t.extend_from_slice(&[0u8; 16]); // created, modified
    t.extend_from_slice(&[0u8; 8]); // xMin, yMin, xMax, yMax
    t.extend_from_slice(&0u16.to_be_bytes()); // macStyle
    t.extend_from_slice(&8u16.to_be_bytes()); // lowestRecPPEM
    t.extend_from_slice(&2i16.to_be_bytes()); // fontDirectionHint
    t.extend_from_slice(&0u16.to_be_bytes()); // indexToLocFormat
    t.extend_from_slice(&0u16.to_be_bytes()); // glyphDataFormat
    t
}

fn hhea() -> Vec<u8> {
    let mut t = Vec::with_capacity(36);
    t.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    t.extend_from_slice(&800i16.to_be_bytes()); // ascender
    t.extend_from_slice(&(-200i16).to_be_bytes()); // descender
    t.extend_from_slice(&0i16.to_be_bytes()); // lineGap
    t.extend_from_slice(&[0u8; 24]);
    t.extend_from_slice(&0u16.to_be_bytes()); // numberOfHMetrics
    t
}

fn maxp() -> Vec<u8> {
    let mut t = Vec::with_capacity(6);
    t.extend_from_slice(&0x0000_5000u32.to_be_bytes());
    t.extend_from_slice(&1u16.to_be_bytes()); // numGlyphs
    t
}

fn name(records: &[(u16, &str)]) -> Vec<u8> {
    let header_len = 6 + 12 * records.len();
    let mut t = Vec::new();
    t.extend_from_slice(&0u16.to_be_bytes()); // format
    t.extend_from_slice(&(records.len() as u16).to_be_bytes());
    t.extend_from_slice(&(header_len as u16).to_be_bytes());

    let mut storage = Vec::new();
    for (name_id, value) in records {
        let encoded: Vec<u8> = value.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        t.extend_from_slice(&3u16.to_be_bytes()); // Windows
        t.extend_from_slice(&1u16.to_be_bytes()); // Unicode BMP
        t.extend_from_slice(&0x0409u16.to_be_bytes()); // en-US
        t.extend_from_slice(&name_id.to_be_bytes());
        t.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        t.extend_from_slice(&(storage.len() as u16).to_be_bytes());
        storage.extend_from_slice(&encoded);
    }
    t.extend_from_slice(&storage);
    t
}

fn fvar() -> Vec<u8> {
    let mut t = Vec::with_capacity(36);
    t.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    t.extend_from_slice(&16u16.to_be_bytes()); // axesArrayOffset
    t.extend_from_slice(&2u16.to_be_bytes()); // reserved
    t.extend_from_slice(&1u16.to_be_bytes()); // axisCount
    t.extend_from_slice(&20u16.to_be_bytes()); // axisSize
    t.extend_from_slice(&0u16.to_be_bytes()); // instanceCount
    t.extend_from_slice(&8u16.to_be_bytes()); // instanceSize
    t.extend_from_slice(b"wght");
    t.extend_from_slice(&(100i32 << 16).to_be_bytes()); // min
    t.extend_from_slice(&(400i32 << 16).to_be_bytes()); // default
    t.extend_from_slice(&(900i32 << 16).to_be_bytes()); // max
    t.extend_from_slice(&0u16.to_be_bytes()); // flags
    t.extend_from_slice(&256u16.to_be_bytes()); // axisNameID
    t
}
