//! Font requirement extraction from DaVinci Resolve/Fusion project files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use font_core::{FontReference, ScanScope, SourceFileKind};
use font_parser::FontParser;
use tracing::{debug, warn};
use walkdir::WalkDir;

mod container;
pub mod roots;
pub mod setting;

pub use roots::{default_project_roots, existing_template_roots, resolve_template_roots};

/// Errors that make a whole input file unusable
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// A font file shipped inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledFont {
    /// Path of the entry inside the archive
    pub entry_name: String,
    pub family: String,
    pub subfamily: Option<String>,
}

/// References found in one file. Consumed once; scanning again means
/// calling [`ProjectFileScanner::scan`] again.
#[derive(Debug)]
pub struct FontReferences {
    inner: std::vec::IntoIter<FontReference>,
    bundled: Vec<BundledFont>,
}

impl FontReferences {
    fn new(references: Vec<FontReference>, bundled: Vec<BundledFont>) -> Self {
        Self {
            inner: references.into_iter(),
            bundled,
        }
    }

    /// Fonts the container ships itself
    pub fn bundled(&self) -> &[BundledFont] {
        &self.bundled
    }

    pub fn take_bundled(&mut self) -> Vec<BundledFont> {
        std::mem::take(&mut self.bundled)
    }
}

impl Iterator for FontReferences {
    type Item = FontReference;

    fn next(&mut self) -> Option<FontReference> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for FontReferences {}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectFileScanner {
    parser: FontParser,
}

impl ProjectFileScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the font references of one input file.
    ///
    /// Any error means the file contributed nothing; callers record it and
    /// move on to the next file.
    pub fn scan(&self, path: &Path, kind: SourceFileKind) -> Result<FontReferences, ScanError> {
        match kind {
            SourceFileKind::SettingFile => {
                let data = fs::read(path)?;
                let references = setting::scan_bytes(&data, path, kind);
                debug!("{}: {} font references", path.display(), references.len());
                Ok(FontReferences::new(references, Vec::new()))
            }
            SourceFileKind::ContainerProject => {
                let contents = container::scan_container(path, &self.parser)?;
                debug!(
                    "{}: {} font references, {} bundled fonts",
                    path.display(),
                    contents.references.len(),
                    contents.bundled.len()
                );
                Ok(FontReferences::new(contents.references, contents.bundled))
            }
        }
    }
}

/// An input file selected for scanning
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputFile {
    pub path: PathBuf,
    pub kind: SourceFileKind,
}

/// Collect the `.drfx` and `.setting` files under `roots` that the scope
/// admits. Roots that are files are taken as-is when their kind matches.
pub fn discover_inputs<P: AsRef<Path>>(roots: &[P], scope: ScanScope) -> Vec<InputFile> {
    let mut found: BTreeSet<PathBuf> = BTreeSet::new();

    for root in roots {
        let root = root.as_ref();
        if !root.exists() {
            warn!("input path does not exist: {}", root.display());
            continue;
        }
        if root.is_file() {
            found.insert(root.to_path_buf());
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                found.insert(entry.into_path());
            }
        }
    }

    found
        .into_iter()
        .filter_map(|path| {
            let kind = SourceFileKind::from_path(&path)?;
            scope.includes(kind).then_some(InputFile { path, kind })
        })
        .collect()
}
