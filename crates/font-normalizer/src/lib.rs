use font_core::{FontIdentity, FontReference};
use lazy_static::lazy_static;
use regex::Regex;

/// Canonicalizes raw font names into comparable [`FontIdentity`] keys.
///
/// The mapping is total and idempotent: feeding an identity's family and
/// style back in yields the same identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FontNormalizer;

/// Modifiers only count as style when a weight or width word follows them
const MODIFIERS: &[&str] = &["extra", "ultra", "semi", "demi"];

const STYLE_WORDS: &[&str] = &[
    "condensed", "expanded", "hairline", "oblique", "regular", "italic", "medium", "narrow",
    "normal", "black", "heavy", "light", "bold", "book", "thin", "wide",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Weight {
    Thin,
    ExtraLight,
    Light,
    Regular,
    Medium,
    SemiBold,
    Bold,
    ExtraBold,
    Black,
}

impl Weight {
    fn as_str(&self) -> &'static str {
        match self {
            Weight::Thin => "thin",
            Weight::ExtraLight => "extralight",
            Weight::Light => "light",
            Weight::Regular => "regular",
            Weight::Medium => "medium",
            Weight::SemiBold => "semibold",
            Weight::Bold => "bold",
            Weight::ExtraBold => "extrabold",
            Weight::Black => "black",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    ExtraCondensed,
    SemiCondensed,
    Condensed,
    SemiExpanded,
    Expanded,
    ExtraExpanded,
}

impl Width {
    fn as_str(&self) -> &'static str {
        match self {
            Width::ExtraCondensed => "extracondensed",
            Width::SemiCondensed => "semicondensed",
            Width::Condensed => "condensed",
            Width::SemiExpanded => "semiexpanded",
            Width::Expanded => "expanded",
            Width::ExtraExpanded => "extraexpanded",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Style {
    weight: Option<Weight>,
    width: Option<Width>,
    italic: bool,
}

impl Style {
    /// Later values win, except that an explicit "regular" never erases a
    /// weight that the font name already spelled out.
    fn merge(self, hint: Style) -> Style {
        let weight = match (self.weight, hint.weight) {
            (Some(own), Some(Weight::Regular)) => Some(own),
            (own, None) => own,
            (_, theirs) => theirs,
        };
        Style {
            weight,
            width: hint.width.or(self.width),
            italic: self.italic || hint.italic,
        }
    }

    fn canonical(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(weight) = self.weight {
            if weight != Weight::Regular {
                parts.push(weight.as_str());
            }
        }
        if let Some(width) = self.width {
            parts.push(width.as_str());
        }
        if self.italic {
            parts.push("italic");
        }
        if parts.is_empty() {
            "regular".to_string()
        } else {
            parts.join(" ")
        }
    }
}

impl FontNormalizer {
    /// Normalize a scanned reference
    pub fn normalize(&self, reference: &FontReference) -> FontIdentity {
        self.normalize_name(&reference.raw_name, reference.style_hint.as_deref())
    }

    /// Normalize a name plus an optional separate style string.
    ///
    /// Trailing style words are peeled off the name ("Helvetica-Bold" ->
    /// helvetica / bold) and merged with the hint.
    pub fn normalize_name(&self, raw_name: &str, style_hint: Option<&str>) -> FontIdentity {
        let without_subset = Self::remove_subset_prefix(raw_name);
        let tokens = Self::tokenize(&without_subset);

        let split = Self::style_suffix_start(&tokens);
        let family = tokens[..split].join(" ");
        let name_atoms: Vec<&str> = tokens[split..]
            .iter()
            .flat_map(|t| Self::decompose(t).unwrap_or_default())
            .collect();
        let mut style = Self::parse_atoms(&name_atoms);

        if let Some(hint) = style_hint {
            let hint_tokens = Self::tokenize(hint);
            let hint_atoms: Vec<&str> = hint_tokens
                .iter()
                .filter_map(|t| Self::decompose(t))
                .flatten()
                .collect();
            style = style.merge(Self::parse_atoms(&hint_atoms));
        }

        FontIdentity {
            family,
            style: style.canonical(),
        }
    }

    /// Canonical style string for a style label alone ("Bold Italic" -> "bold italic").
    /// Unparseable labels come back as "regular".
    pub fn normalize_style(&self, style: &str) -> String {
        let tokens = Self::tokenize(style);
        let atoms: Vec<&str> = tokens
            .iter()
            .filter_map(|t| Self::decompose(t))
            .flatten()
            .collect();
        Self::parse_atoms(&atoms).canonical()
    }

    /// Canonical family key for a bare family name, without peeling styles
    pub fn normalize_family(&self, family: &str) -> String {
        Self::tokenize(&Self::remove_subset_prefix(family)).join(" ")
    }

    fn remove_subset_prefix(name: &str) -> String {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^[A-Z]{6}\+").unwrap();
        }
        RE.replace(name, "").to_string()
    }

    /// Split on separators, drop PostScript vendor suffixes, split camel case,
    /// then case-fold. Every non-alphanumeric character is a separator.
    fn tokenize(name: &str) -> Vec<String> {
        lazy_static! {
            static ref VENDOR_SUFFIX: Regex = Regex::new(r"^(.*[a-z])(?:PSMT|MT|PS)$").unwrap();
        }
        let mut tokens = Vec::new();
        for segment in name.split(|c: char| !c.is_alphanumeric()) {
            if segment.is_empty() {
                continue;
            }
            let segment = match VENDOR_SUFFIX.captures(segment) {
                Some(caps) => caps[1].to_string(),
                None => segment.to_string(),
            };
            for word in Self::split_camel_case(&segment) {
                tokens.push(word.to_lowercase());
            }
        }
        tokens
    }

    /// "TimesNewRoman" -> Times New Roman, "IBMPlex" -> IBM Plex
    fn split_camel_case(segment: &str) -> Vec<String> {
        let chars: Vec<char> = segment.chars().collect();
        let mut words = Vec::new();
        let mut current = String::new();

        for i in 0..chars.len() {
            let c = chars[i];
            if i > 0 && !current.is_empty() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
                let boundary = (prev.is_lowercase() && c.is_uppercase())
                    || (prev.is_uppercase() && c.is_uppercase() && next_is_lower);
                if boundary {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
        words
    }

    /// Break a lowercase token into style atoms, or `None` if any part is not one
    fn decompose(token: &str) -> Option<Vec<&'static str>> {
        if let Ok(value) = token.parse::<u16>() {
            return NUMERIC_WEIGHTS
                .iter()
                .find(|(n, _)| *n == value)
                .map(|(_, atom)| vec![*atom]);
        }

        let mut atoms = Vec::new();
        let mut rest = token;
        while !rest.is_empty() {
            let atom = MODIFIERS
                .iter()
                .chain(STYLE_WORDS.iter())
                .filter(|w| rest.starts_with(**w))
                .max_by_key(|w| w.len())?;
            atoms.push(*atom);
            rest = &rest[atom.len()..];
        }
        if atoms.is_empty() {
            None
        } else {
            Some(atoms)
        }
    }

    /// Index where the trailing style words start. At least one token is
    /// always left for the family.
    fn style_suffix_start(tokens: &[String]) -> usize {
        let mut start = tokens.len();
        while start > 1 {
            let candidate = &tokens[start - 1..];
            let atoms: Option<Vec<&str>> = candidate
                .iter()
                .map(|t| Self::decompose(t))
                .collect::<Option<Vec<_>>>()
                .map(|v| v.into_iter().flatten().collect());
            match atoms {
                Some(atoms) if Self::atoms_well_formed(&atoms) => start -= 1,
                _ => break,
            }
        }
        start
    }

    fn atoms_well_formed(atoms: &[&str]) -> bool {
        atoms.iter().enumerate().all(|(i, atom)| {
            if MODIFIERS.contains(atom) {
                atoms
                    .get(i + 1)
                    .map_or(false, |next| Self::modified(atom, next).is_some())
            } else {
                true
            }
        })
    }

    fn modified(modifier: &str, word: &str) -> Option<&'static str> {
        let strong = matches!(modifier, "extra" | "ultra");
        match word {
            "bold" if strong => Some("extrabold"),
            "bold" => Some("semibold"),
            "light" if strong => Some("extralight"),
            "condensed" | "narrow" if strong => Some("extracondensed"),
            "condensed" | "narrow" => Some("semicondensed"),
            "expanded" | "wide" if strong => Some("extraexpanded"),
            "expanded" | "wide" => Some("semiexpanded"),
            _ => None,
        }
    }

    fn parse_atoms(atoms: &[&str]) -> Style {
        let mut style = Style::default();
        let mut i = 0;
        while i < atoms.len() {
            let mut word = atoms[i];
            if MODIFIERS.contains(&word) {
                match atoms.get(i + 1).and_then(|next| Self::modified(word, next)) {
                    Some(combined) => {
                        word = combined;
                        i += 1;
                    }
                    None => {
                        i += 1;
                        continue;
                    }
                }
            }
            match word {
                "thin" | "hairline" => style.weight = Some(Weight::Thin),
                "extralight" => style.weight = Some(Weight::ExtraLight),
                "light" => style.weight = Some(Weight::Light),
                "regular" | "normal" | "book" => {
                    style.weight.get_or_insert(Weight::Regular);
                }
                "medium" => style.weight = Some(Weight::Medium),
                "semibold" => style.weight = Some(Weight::SemiBold),
                "bold" => style.weight = Some(Weight::Bold),
                "extrabold" => style.weight = Some(Weight::ExtraBold),
                "black" | "heavy" => style.weight = Some(Weight::Black),
                "italic" | "oblique" => style.italic = true,
                "condensed" | "narrow" => style.width = Some(Width::Condensed),
                "semicondensed" => style.width = Some(Width::SemiCondensed),
                "extracondensed" => style.width = Some(Width::ExtraCondensed),
                "expanded" | "wide" => style.width = Some(Width::Expanded),
                "semiexpanded" => style.width = Some(Width::SemiExpanded),
                "extraexpanded" => style.width = Some(Width::ExtraExpanded),
                _ => {}
            }
            i += 1;
        }
        style
    }
}

const NUMERIC_WEIGHTS: &[(u16, &str)] = &[
    (100, "thin"),
    (200, "extralight"),
    (300, "light"),
    (400, "regular"),
    (500, "medium"),
    (600, "semibold"),
    (700, "bold"),
    (800, "extrabold"),
    (900, "black"),
    (950, "black"),
];

/// Numeric weight for a canonical style (e.g. for catalog variant names)
pub fn style_weight(style: &str) -> u16 {
    style
        .split(' ')
        .find_map(|word| {
            NUMERIC_WEIGHTS
                .iter()
                .find(|(_, name)| *name == word)
                .map(|(n, _)| *n)
        })
        .unwrap_or(400)
}
