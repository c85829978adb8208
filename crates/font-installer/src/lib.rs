//! Download, validate and place font files.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use font_acquisition::{retry_with_backoff, HttpFetch};
use font_core::{DownloadCandidate, FontError, FontIdentity, RetryPolicy};
use font_normalizer::FontNormalizer;
use font_parser::{is_font_file, FontFace, FontParser};
use font_scanner::InstalledFontIndex;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const MAX_ARCHIVE_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(PathBuf),
    /// Dry run: everything up to the write succeeded
    WouldInstall(PathBuf),
    /// The validated font is already on the host
    AlreadyInstalled(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("download failed after {attempts} attempt(s): {reason}")]
    DownloadFailed { reason: String, attempts: u32 },

    #[error("invalid font file: {0}")]
    InvalidFontFile(String),

    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated font ready to be written
#[derive(Debug, Clone)]
struct ValidatedFont {
    data: Vec<u8>,
    face: FontFace,
    identity: FontIdentity,
}

enum DownloadAttemptError {
    Retry(String),
    Fatal(String),
}

impl fmt::Display for DownloadAttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadAttemptError::Retry(reason) | DownloadAttemptError::Fatal(reason) => write!(f, "{}", reason),
        }
    }
}

pub struct Installer {
    http: Arc<dyn HttpFetch>,
    install_dir: PathBuf,
    retry: RetryPolicy,
    dry_run: bool,
    parser: FontParser,
    normalizer: FontNormalizer,
    path_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Installer {
    pub fn new(http: Arc<dyn HttpFetch>, install_dir: PathBuf, retry: RetryPolicy, dry_run: bool) -> Self {
        Self {
            http,
            install_dir,
            retry,
            dry_run,
            parser: FontParser,
            normalizer: FontNormalizer,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Download `candidate`, validate it, and write it into the install
    /// directory unless `index` or the directory already has it.
    pub async fn install(
        &self,
        candidate: &DownloadCandidate,
        index: &InstalledFontIndex,
    ) -> Result<InstallOutcome, InstallError> {
        let data = self.download(&candidate.url).await?;
        let font = self.validate(data, &candidate.identity)?;

        if let Some(existing) = index.lookup(&font.identity, false) {
            info!("{} is already installed at {}", font.identity, existing.file_path.display());
            return Ok(InstallOutcome::AlreadyInstalled(existing.file_path.clone()));
        }

        let target = self.install_dir.join(file_name_for(&font.face));
        let lock = self.lock_for(&target);
        let _guard = lock.lock().await;

        if target.exists() {
            debug!("{} already exists", target.display());
            return Ok(InstallOutcome::AlreadyInstalled(target));
        }
        if self.dry_run {
            info!("dry run: would install {} to {}", font.identity, target.display());
            return Ok(InstallOutcome::WouldInstall(target));
        }

        let dir = self.install_dir.clone();
        let write_target = target.clone();
        let written = tokio::task::spawn_blocking(move || write_font(&dir, &write_target, &font.data))
            .await
            .map_err(|e| InstallError::Write {
                path: target.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })??;

        if written {
            info!("installed {} from {}", target.display(), candidate.source);
            Ok(InstallOutcome::Installed(target))
        } else {
            Ok(InstallOutcome::AlreadyInstalled(target))
        }
    }

    fn lock_for(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.path_locks
            .lock()
            .entry(target.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, InstallError> {
        let http = self.http.as_ref();
        let retried = retry_with_backoff(
            &self.retry,
            url,
            move || async move {
                match http.get(url, None).await {
                    Ok(response) if response.is_success() => Ok(response.body),
                    Ok(response) if response.status == 429 || response.status >= 500 => {
                        Err(DownloadAttemptError::Retry(format!("HTTP {}", response.status)))
                    }
                    Ok(response) => Err(DownloadAttemptError::Fatal(format!("HTTP {}", response.status))),
                    Err(e) => Err(DownloadAttemptError::Retry(e.to_string())),
                }
            },
            |e| matches!(e, DownloadAttemptError::Retry(_)),
        )
        .await;

        retried.result.map_err(|e| InstallError::DownloadFailed {
            reason: e.to_string(),
            attempts: retried.attempts,
        })
    }

    /// Accept a bare font or a zip of fonts. From an archive, the face closest
    /// to `wanted` wins.
    fn validate(&self, data: Vec<u8>, wanted: &FontIdentity) -> Result<ValidatedFont, InstallError> {
        if data.starts_with(b"PK\x03\x04") {
            return self.pick_from_archive(&data, wanted);
        }

        let faces = self.parser.parse_font_bytes(&data).map_err(invalid)?;
        let face = faces
            .into_iter()
            .next()
            .ok_or_else(|| InstallError::InvalidFontFile("no faces".to_string()))?;
        let identity = face.identity(&self.normalizer);
        Ok(ValidatedFont { data, face, identity })
    }

    fn pick_from_archive(&self, data: &[u8], wanted: &FontIdentity) -> Result<ValidatedFont, InstallError> {
        let mut archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| InstallError::InvalidFontFile(format!("corrupt archive: {}", e)))?;

        let mut best: Option<(u8, ValidatedFont)> = None;
        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable archive entry {}: {}", i, e);
                    continue;
                }
            };
            let name = entry.name().to_string();
            if entry.is_dir()
                || name.starts_with("__MACOSX")
                || !is_font_file(Path::new(&name))
                || entry.size() > MAX_ARCHIVE_ENTRY_BYTES
            {
                continue;
            }

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            if let Err(e) = entry.read_to_end(&mut bytes) {
                warn!("skipping archive entry {}: {}", name, e);
                continue;
            }
            let face = match self.parser.parse_font_bytes(&bytes) {
                Ok(faces) => match faces.into_iter().next() {
                    Some(face) => face,
                    None => continue,
                },
                Err(e) => {
                    debug!("archive entry {} is not a usable font: {}", name, e);
                    continue;
                }
            };

            let identity = face.identity(&self.normalizer);
            let rank = if &identity == wanted {
                0
            } else if identity.family == wanted.family && face.variable {
                1
            } else if identity.family == wanted.family {
                2
            } else {
                3
            };
            if best.as_ref().map_or(true, |(r, _)| rank < *r) {
                best = Some((rank, ValidatedFont { data: bytes, face, identity }));
            }
            if rank == 0 {
                break;
            }
        }

        best.map(|(_, font)| font)
            .ok_or_else(|| InstallError::InvalidFontFile("archive contains no usable font".to_string()))
    }
}

fn invalid(e: FontError) -> InstallError {
    InstallError::InvalidFontFile(e.to_string())
}

/// `<Family>-<Style>.<ext>` with whitespace and path-hostile characters removed
pub fn file_name_for(face: &FontFace) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    };
    let family = match clean(&face.family) {
        f if f.is_empty() => "Font".to_string(),
        f => f,
    };
    let style = match face.subfamily.as_deref().map(clean) {
        Some(s) if !s.is_empty() => s,
        _ => "Regular".to_string(),
    };
    format!("{}-{}.{}", family, style, face.format.extension())
}

/// Write through a temp file in the target directory so a failure never
/// leaves a partial font behind. Returns false if the target appeared first.
fn write_font(dir: &Path, target: &Path, data: &[u8]) -> Result<bool, InstallError> {
    let write_err = |source: std::io::Error| InstallError::Write {
        path: target.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(data).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    match temp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(write_err(e.error)),
    }
}
