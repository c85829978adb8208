use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[cfg(target_os = "windows")]
use winreg::enums::*;
#[cfg(target_os = "windows")]
use winreg::RegKey;
use walkdir::WalkDir;
use font_core::{FontError, FontIdentity, FontResult, InstalledFontEntry};
use font_normalizer::FontNormalizer;
use font_parser::{is_font_file, FontParser};
use tracing::{debug, info, warn};

/// Read-only lookup over the fonts present on the host, built once per run
#[derive(Debug, Default, Clone)]
pub struct InstalledFontIndex {
    entries: Vec<InstalledFontEntry>,
    by_identity: HashMap<FontIdentity, Vec<usize>>,
    by_family: HashMap<String, Vec<usize>>,
}

impl InstalledFontIndex {
    /// Index every font file under `dirs` (recursively). Each file is opened
    /// and identified by its name table; unreadable files are skipped.
    pub fn build<P: AsRef<Path>>(dirs: &[P]) -> Self {
        let parser = FontParser;
        let normalizer = FontNormalizer;
        let mut index = Self::default();

        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.exists() {
                debug!("font directory {} does not exist", dir.display());
                continue;
            }
            for entry in WalkDir::new(dir).follow_links(true).into_iter().filter_map(Result::ok) {
                let path = entry.path();
                if entry.file_type().is_file() && is_font_file(path) {
                    index.add_file(path, &parser, &normalizer);
                }
            }
        }

        info!("indexed {} installed font faces", index.len());
        index
    }

    /// Index the platform's font directories, plus the registry on Windows
    pub fn build_system() -> Self {
        #[allow(unused_mut)]
        let mut index = Self::build(&system_font_dirs());

        #[cfg(target_os = "windows")]
        {
            let parser = FontParser;
            let normalizer = FontNormalizer;
            for path in registry_font_files() {
                if !index.contains_path(&path) {
                    index.add_file(&path, &parser, &normalizer);
                }
            }
        }

        index
    }

    pub fn from_entries<I: IntoIterator<Item = InstalledFontEntry>>(entries: I) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    fn add_file(&mut self, path: &Path, parser: &FontParser, normalizer: &FontNormalizer) {
        match parser.parse_font_file(path) {
            Ok(faces) => {
                for face in faces {
                    self.insert(InstalledFontEntry {
                        identity: face.identity(normalizer),
                        file_path: path.to_path_buf(),
                        variable: face.variable,
                    });
                }
            }
            Err(e) => warn!("skipping unreadable font {}: {}", path.display(), e),
        }
    }

    pub fn insert(&mut self, entry: InstalledFontEntry) {
        let duplicate = self.by_identity.get(&entry.identity).map_or(false, |slots| {
            slots.iter().any(|&i| self.entries[i].file_path == entry.file_path)
        });
        if duplicate {
            return;
        }

        let slot = self.entries.len();
        self.by_identity.entry(entry.identity.clone()).or_default().push(slot);
        self.by_family.entry(entry.identity.family.clone()).or_default().push(slot);
        self.entries.push(entry);
    }

    /// Find an installed face for `identity`.
    ///
    /// Exact identity first, then a variable font of the same family. When
    /// the reference only named a family, any installed style of it counts,
    /// regular preferred.
    pub fn lookup(&self, identity: &FontIdentity, family_level: bool) -> Option<&InstalledFontEntry> {
        if let Some(&slot) = self.by_identity.get(identity).and_then(|slots| slots.first()) {
            return Some(&self.entries[slot]);
        }

        let family = self.family_entries(&identity.family);
        if let Some(variable) = family.clone().find(|e| e.variable) {
            return Some(variable);
        }

        if family_level {
            return family
                .clone()
                .find(|e| e.identity.style == "regular")
                .or_else(|| family.clone().next());
        }
        None
    }

    fn family_entries<'a>(&'a self, family: &str) -> impl Iterator<Item = &'a InstalledFontEntry> + Clone + 'a {
        self.by_family
            .get(family)
            .map(|slots| slots.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.entries[i])
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.file_path == path)
    }

    pub fn entries(&self) -> &[InstalledFontEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Font directories for the current operating system, existing or not
pub fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs_found: Vec<PathBuf> = Vec::new();

    #[cfg(target_os = "windows")]
    {
        let windir = std::env::var("WINDIR").unwrap_or_else(|_| "C:\\Windows".to_string());
        dirs_found.push(PathBuf::from(windir).join("Fonts"));
        if let Some(local) = dirs::data_local_dir() {
            dirs_found.push(local.join("Microsoft\\Windows\\Fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs_found.push(PathBuf::from("/Library/Fonts"));
        dirs_found.push(PathBuf::from("/System/Library/Fonts"));
        if let Some(home) = dirs::home_dir() {
            dirs_found.push(home.join("Library/Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs_found.push(PathBuf::from("/usr/share/fonts"));
        dirs_found.push(PathBuf::from("/usr/local/share/fonts"));
        if let Some(home) = dirs::home_dir() {
            dirs_found.push(home.join(".local/share/fonts"));
            dirs_found.push(home.join(".fonts"));
        }
    }

    dirs_found
}

/// Per-user directory new fonts are installed into
pub fn default_install_dir() -> FontResult<PathBuf> {
    let dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir().map(|local| local.join("Microsoft").join("Windows").join("Fonts"))
    } else if cfg!(target_os = "macos") {
        dirs::home_dir().map(|home| home.join("Library").join("Fonts"))
    } else if cfg!(target_os = "linux") {
        dirs::data_dir().map(|data| data.join("fonts"))
    } else {
        return Err(FontError::PlatformNotSupported(std::env::consts::OS.to_string()));
    };
    dir.ok_or_else(|| FontError::PlatformNotSupported("no per-user data directory".to_string()))
}

/// Font files registered under HKLM and HKCU, resolved to absolute paths
#[cfg(target_os = "windows")]
fn registry_font_files() -> Vec<PathBuf> {
    let key_path = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Fonts";
    let mut files = Vec::new();

    for root in [HKEY_LOCAL_MACHINE, HKEY_CURRENT_USER] {
        let Ok(font_key) = RegKey::predef(root).open_subkey(key_path) else {
            continue;
        };
        for (_name, value) in font_key.enum_values().filter_map(|x| x.ok()) {
            let raw = value.to_string();
            let raw = raw.trim().trim_matches('"');
            if raw.is_empty() {
                continue;
            }
            let path = resolve_windows_font_path(raw);
            if path.exists() && is_font_file(&path) {
                files.push(path);
            }
        }
    }
    files
}

#[cfg(target_os = "windows")]
fn resolve_windows_font_path(raw: &str) -> PathBuf {
    let font_path = PathBuf::from(raw);
    if font_path.is_absolute() {
        return font_path;
    }

    let windir = std::env::var("WINDIR").unwrap_or_else(|_| "C:\\Windows".to_string());
    let candidates = [PathBuf::from(windir).join("Fonts"), PathBuf::from("C:\\Windows\\Fonts")];
    for dir in candidates {
        let full_path = dir.join(&font_path);
        if full_path.exists() {
            return full_path;
        }
    }
    font_path
}
