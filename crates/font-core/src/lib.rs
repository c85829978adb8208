use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of project file a font reference was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFileKind {
    /// `.drfx` bundle: a zip archive with settings and metadata inside
    ContainerProject,
    /// Flat `.setting` file
    SettingFile,
}

impl SourceFileKind {
    /// Classify a path by its extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "drfx" => Some(SourceFileKind::ContainerProject),
            "setting" => Some(SourceFileKind::SettingFile),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFileKind::ContainerProject => write!(f, "container project"),
            SourceFileKind::SettingFile => write!(f, "setting file"),
        }
    }
}

/// Which input kinds a run should scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanScope {
    ContainersOnly,
    SettingsOnly,
    #[default]
    Both,
}

impl ScanScope {
    pub fn includes(&self, kind: SourceFileKind) -> bool {
        match self {
            ScanScope::ContainersOnly => kind == SourceFileKind::ContainerProject,
            ScanScope::SettingsOnly => kind == SourceFileKind::SettingFile,
            ScanScope::Both => true,
        }
    }
}

/// A font token found inside a project file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontReference {
    /// Font name exactly as written in the file (e.g. "Helvetica-Bold")
    pub raw_name: String,

    /// Style written next to the name (e.g. "Bold", "Italic", a variable instance label)
    pub style_hint: Option<String>,

    /// File the token came from
    pub source_file: PathBuf,

    pub source_file_kind: SourceFileKind,
}

impl FontReference {
    pub fn new(
        raw_name: impl Into<String>,
        style_hint: Option<String>,
        source_file: impl Into<PathBuf>,
        source_file_kind: SourceFileKind,
    ) -> Self {
        Self {
            raw_name: raw_name.into(),
            style_hint,
            source_file: source_file.into(),
            source_file_kind,
        }
    }

    /// True when the file only names a family, with no style next to it
    pub fn is_family_level(&self) -> bool {
        self.style_hint.is_none()
    }
}

/// Normalized (family, style) comparison key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FontIdentity {
    pub family: String,
    pub style: String,
}

impl FontIdentity {
    pub fn new(family: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            style: style.into(),
        }
    }

    pub fn is_italic(&self) -> bool {
        self.style.split(' ').any(|w| w == "italic")
    }
}

impl fmt::Display for FontIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.family, self.style)
    }
}

/// One face found in a host font directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFontEntry {
    pub identity: FontIdentity,
    pub file_path: PathBuf,
    /// Variable fonts cover every style of their family
    pub variable: bool,
}

/// Remote provider a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceName {
    GoogleFonts,
    #[serde(rename = "1001fonts")]
    OneThousandOneFonts,
    DaFont,
    FreeFonts,
}

impl SourceName {
    pub const ALL: [SourceName; 4] = [
        SourceName::GoogleFonts,
        SourceName::OneThousandOneFonts,
        SourceName::DaFont,
        SourceName::FreeFonts,
    ];

    pub fn is_primary(&self) -> bool {
        matches!(self, SourceName::GoogleFonts)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceName::GoogleFonts => write!(f, "Google Fonts"),
            SourceName::OneThousandOneFonts => write!(f, "1001Fonts"),
            SourceName::DaFont => write!(f, "DaFont"),
            SourceName::FreeFonts => write!(f, "FreeFonts.io"),
        }
    }
}

impl FromStr for SourceName {
    type Err = FontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "google" | "googlefonts" => Ok(SourceName::GoogleFonts),
            "1001fonts" | "1001" => Ok(SourceName::OneThousandOneFonts),
            "dafont" => Ok(SourceName::DaFont),
            "freefonts" | "freefontsio" => Ok(SourceName::FreeFonts),
            _ => Err(FontError::Config(format!("unknown font source: {}", s))),
        }
    }
}

/// How closely a source's hit matches the requested identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Family and style confirmed
    Exact,
    /// Fuzzy or partial match
    Approximate,
}

/// A downloadable file offered by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCandidate {
    pub identity: FontIdentity,
    pub url: String,
    pub source: SourceName,
    pub confidence: Confidence,
}

/// What happened when one provider was consulted for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Candidate(Confidence),
    NoMatch,
    /// Provider failed after `attempts` tries
    Failed { error: String, attempts: u32 },
    /// Candidate was found but the installer refused it
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: SourceName,
    pub outcome: AttemptOutcome,
}

/// Terminal state of one identity in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    AlreadyInstalled { path: PathBuf },
    /// Shipped inside the container that referenced it
    Bundled,
    Resolved { source: SourceName, path: PathBuf },
    /// Dry run: everything up to the final write succeeded
    WouldInstall { source: SourceName, path: PathBuf },
    NotFound,
    DownloadFailed { source: SourceName, reason: String },
    InvalidFontFile { source: SourceName, reason: String },
}

impl OutcomeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::NotFound
                | OutcomeStatus::DownloadFailed { .. }
                | OutcomeStatus::InvalidFontFile { .. }
        )
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::AlreadyInstalled { path } => {
                write!(f, "already installed ({})", path.display())
            }
            OutcomeStatus::Bundled => write!(f, "bundled with project"),
            OutcomeStatus::Resolved { source, path } => {
                write!(f, "installed from {} ({})", source, path.display())
            }
            OutcomeStatus::WouldInstall { source, path } => {
                write!(f, "would install from {} ({})", source, path.display())
            }
            OutcomeStatus::NotFound => write!(f, "not found on any source"),
            OutcomeStatus::DownloadFailed { source, reason } => {
                write!(f, "download from {} failed: {}", source, reason)
            }
            OutcomeStatus::InvalidFontFile { source, reason } => {
                write!(f, "invalid font file from {}: {}", source, reason)
            }
        }
    }
}

/// One entry per unique identity per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub identity: FontIdentity,
    pub status: OutcomeStatus,
    /// Project files that referenced this identity
    pub referenced_by: Vec<PathBuf>,
    /// Provider log, in query order
    pub attempts: Vec<SourceAttempt>,
}

/// An input file that could not be scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParseFailure {
    pub path: PathBuf,
    pub kind: SourceFileKind,
    pub reason: String,
}

/// Everything a run produced, for the reporting layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Sorted by identity
    pub outcomes: Vec<ResolutionOutcome>,
    pub file_errors: Vec<FileParseFailure>,
    pub warnings: Vec<String>,
    pub aborted: bool,
}

impl PipelineReport {
    pub fn outcome_for(&self, identity: &FontIdentity) -> Option<&ResolutionOutcome> {
        self.outcomes.iter().find(|o| &o.identity == identity)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResolutionOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Run-mode inputs handed to the pipeline by the driver
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scope: ScanScope,

    /// Stop short of writing into the font directory
    pub dry_run: bool,

    /// Parallel file scans
    pub scan_workers: usize,

    /// Parallel identity resolutions; keep small, remote sites rate limit
    pub resolve_workers: usize,

    pub retry: RetryPolicy,

    /// Host font directories; empty means the platform defaults
    pub font_dirs: Vec<PathBuf>,

    /// Where new fonts are written; `None` means the platform default
    pub install_dir: Option<PathBuf>,

    pub abort: AbortFlag,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scope: ScanScope::Both,
            dry_run: false,
            scan_workers: 4,
            resolve_workers: 3,
            retry: RetryPolicy::default(),
            font_dirs: Vec::new(),
            install_dir: None,
            abort: AbortFlag::default(),
        }
    }
}

/// Shared stop request, honored between units of work
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse {path}: {reason}")]
    FileParse { path: PathBuf, reason: String },

    #[error("Unreadable font file {path}: {reason}")]
    FontMetadata { path: PathBuf, reason: String },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid font file: {0}")]
    InvalidFontFile(String),

    #[error("Unsupported font format")]
    UnsupportedFormat,

    #[error("No credential for the primary font catalog and no fallback source configured")]
    MissingCredential,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),
}

/// Result type for font operations
pub type FontResult<T> = Result<T, FontError>;
