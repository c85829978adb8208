use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use font_acquisition::{FontSource, HttpFetch};
use font_core::{
    FileParseFailure, FontError, FontIdentity, FontReference, FontResult, OutcomeStatus, PipelineReport,
    ResolutionOutcome, RunOptions, SourceName,
};
use font_extractor::{discover_inputs, InputFile, ProjectFileScanner};
use font_installer::{InstallError, InstallOutcome, Installer};
use font_normalizer::FontNormalizer;
use font_scanner::{default_install_dir, system_font_dirs, InstalledFontIndex};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::chain::ResolutionChain;

/// What scanning one input produced
struct ScannedFile {
    input: InputFile,
    result: Result<ScannedReferences, String>,
}

struct ScannedReferences {
    references: Vec<FontReference>,
    /// Identities the file ships itself
    bundled: Vec<FontIdentity>,
}

/// Every reference to one identity across the run
#[derive(Debug, Default)]
struct IdentityGroup {
    referenced_by: BTreeSet<PathBuf>,
    /// Only family names were written, never a style
    family_level: bool,
    /// References not covered by a font shipped in the same container
    unbundled: usize,
}

/// Drives one run: discover, scan, index, group, resolve, install.
pub struct PipelineOrchestrator {
    sources: Vec<Arc<dyn FontSource>>,
    installer: Installer,
    options: RunOptions,
    scanner: ProjectFileScanner,
    normalizer: FontNormalizer,
}

impl PipelineOrchestrator {
    pub fn new(sources: Vec<Arc<dyn FontSource>>, http: Arc<dyn HttpFetch>, options: RunOptions) -> FontResult<Self> {
        let install_dir = match &options.install_dir {
            Some(dir) => dir.clone(),
            None => default_install_dir()?,
        };
        let installer = Installer::new(http, install_dir, options.retry, options.dry_run);
        Ok(Self {
            sources,
            installer,
            options,
            scanner: ProjectFileScanner::new(),
            normalizer: FontNormalizer,
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.sources.iter().map(|s| s.name())
    }

    pub fn install_dir(&self) -> &Path {
        self.installer.install_dir()
    }

    /// Process every project file under `roots` and report per identity.
    ///
    /// Only configuration problems fail the run; everything else ends up in
    /// the report.
    pub async fn run<P: AsRef<Path>>(&self, roots: &[P]) -> FontResult<PipelineReport> {
        let mut report = PipelineReport::default();
        self.check_sources(&mut report)?;

        let roots: Vec<PathBuf> = roots.iter().map(|r| r.as_ref().to_path_buf()).collect();
        let scope = self.options.scope;
        let inputs = tokio::task::spawn_blocking(move || discover_inputs(&roots, scope))
            .await
            .map_err(|e| FontError::Config(format!("input discovery panicked: {}", e)))?;
        info!("Found {} project file(s) to scan", inputs.len());
        if inputs.is_empty() {
            report.warnings.push("no project files found".to_string());
        }

        let (scanned, index) = tokio::join!(self.scan_all(inputs), self.build_index());
        let index = index?;

        let groups = self.group(scanned, &mut report);
        info!("{} unique font identities referenced", groups.len());

        let abort = self.options.abort.clone();
        let index = &index;
        let mut outcomes: Vec<ResolutionOutcome> = stream::iter(groups)
            .map(|(identity, group)| {
                let abort = abort.clone();
                async move {
                    if abort.is_aborted() {
                        debug!("skipping {} after abort", identity);
                        return None;
                    }
                    Some(self.resolve_identity(identity, group, index).await)
                }
            })
            .buffer_unordered(self.options.resolve_workers.max(1))
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;

        outcomes.sort_by(|a, b| a.identity.cmp(&b.identity));
        report.outcomes = outcomes;
        report.aborted = abort.is_aborted();
        Ok(report)
    }

    /// The run cannot resolve anything when the primary catalog is the only
    /// source and it has no credential.
    fn check_sources(&self, report: &mut PipelineReport) -> FontResult<()> {
        let unconfigured: Vec<SourceName> = self
            .sources
            .iter()
            .filter(|s| !s.is_configured())
            .map(|s| s.name())
            .collect();
        if unconfigured.is_empty() {
            return Ok(());
        }
        if unconfigured.len() == self.sources.len() && unconfigured.iter().any(|s| s.is_primary()) {
            return Err(FontError::MissingCredential);
        }
        for name in unconfigured {
            warn!("{} has no credential; relying on the other sources", name);
            report
                .warnings
                .push(format!("{} has no credential; results come from the other sources", name));
        }
        Ok(())
    }

    async fn scan_all(&self, inputs: Vec<InputFile>) -> Vec<ScannedFile> {
        let scanner = self.scanner;
        let normalizer = self.normalizer;
        let abort = self.options.abort.clone();

        let mut scanned: Vec<ScannedFile> = stream::iter(inputs)
            .filter(|_| {
                let aborted = abort.is_aborted();
                async move { !aborted }
            })
            .map(|input| {
                let path = input.path.clone();
                let kind = input.kind;
                let task = tokio::task::spawn_blocking(move || {
                    scanner.scan(&path, kind).map(|mut references| {
                        let bundled = references
                            .take_bundled()
                            .into_iter()
                            .map(|b| normalizer.normalize_name(&b.family, b.subfamily.as_deref()))
                            .collect();
                        ScannedReferences {
                            references: references.collect(),
                            bundled,
                        }
                    })
                });
                async move {
                    let result = match task.await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(e) => Err(format!("scan task failed: {}", e)),
                    };
                    ScannedFile { input, result }
                }
            })
            .buffer_unordered(self.options.scan_workers.max(1))
            .collect()
            .await;

        scanned.sort_by(|a, b| a.input.path.cmp(&b.input.path));
        scanned
    }

    async fn build_index(&self) -> FontResult<InstalledFontIndex> {
        let mut dirs = self.options.font_dirs.clone();
        let use_system = dirs.is_empty();
        if use_system {
            dirs = system_font_dirs();
        }
        // Fonts installed by earlier runs must count as installed
        let install_dir = self.installer.install_dir().to_path_buf();
        if !dirs.contains(&install_dir) {
            dirs.push(install_dir);
        }

        tokio::task::spawn_blocking(move || {
            let mut index = if use_system && cfg!(windows) {
                InstalledFontIndex::build_system()
            } else {
                InstalledFontIndex::default()
            };
            for entry in InstalledFontIndex::build(&dirs).entries() {
                index.insert(entry.clone());
            }
            index
        })
        .await
        .map_err(|e| FontError::Config(format!("font index build panicked: {}", e)))
    }

    fn group(&self, scanned: Vec<ScannedFile>, report: &mut PipelineReport) -> BTreeMap<FontIdentity, IdentityGroup> {
        let mut groups: BTreeMap<FontIdentity, IdentityGroup> = BTreeMap::new();

        for file in scanned {
            let scanned = match file.result {
                Ok(scanned) => scanned,
                Err(reason) => {
                    warn!("Skipping {}: {}", file.input.path.display(), reason);
                    report.file_errors.push(FileParseFailure {
                        path: file.input.path,
                        kind: file.input.kind,
                        reason,
                    });
                    continue;
                }
            };
            debug!(
                "{}: {} reference(s), {} bundled font(s)",
                file.input.path.display(),
                scanned.references.len(),
                scanned.bundled.len()
            );

            let bundled: HashSet<&FontIdentity> = scanned.bundled.iter().collect();
            let bundled_families: HashSet<&str> = scanned.bundled.iter().map(|i| i.family.as_str()).collect();

            for reference in &scanned.references {
                let identity = self.normalizer.normalize(reference);
                let family_level = reference.is_family_level() && identity.style == "regular";
                let is_bundled = bundled.contains(&identity)
                    || (family_level && bundled_families.contains(identity.family.as_str()));

                let fresh = !groups.contains_key(&identity);
                let group = groups.entry(identity).or_default();
                group.family_level = if fresh { family_level } else { group.family_level && family_level };
                group.referenced_by.insert(reference.source_file.clone());
                if !is_bundled {
                    group.unbundled += 1;
                }
            }
        }
        groups
    }

    async fn resolve_identity(
        &self,
        identity: FontIdentity,
        group: IdentityGroup,
        index: &InstalledFontIndex,
    ) -> ResolutionOutcome {
        let referenced_by: Vec<PathBuf> = group.referenced_by.into_iter().collect();
        let outcome = |status: OutcomeStatus, attempts| ResolutionOutcome {
            identity: identity.clone(),
            status,
            referenced_by: referenced_by.clone(),
            attempts,
        };

        if group.unbundled == 0 {
            debug!("{} ships with its project", identity);
            return outcome(OutcomeStatus::Bundled, Vec::new());
        }
        if let Some(entry) = index.lookup(&identity, group.family_level) {
            debug!("{} found at {}", identity, entry.file_path.display());
            return outcome(
                OutcomeStatus::AlreadyInstalled {
                    path: entry.file_path.clone(),
                },
                Vec::new(),
            );
        }

        let mut chain = ResolutionChain::new(identity.clone(), &self.sources, self.options.retry);
        let mut last_failure: Option<OutcomeStatus> = None;

        while let Some(candidate) = chain.next_candidate().await {
            info!("{}: trying {} ({:?})", identity, candidate.source, candidate.confidence);
            match self.installer.install(&candidate, index).await {
                Ok(installed) => {
                    let status = match installed {
                        InstallOutcome::Installed(path) => {
                            info!("Installed {} from {} to {}", identity, candidate.source, path.display());
                            OutcomeStatus::Resolved {
                                source: candidate.source,
                                path,
                            }
                        }
                        InstallOutcome::WouldInstall(path) => OutcomeStatus::WouldInstall {
                            source: candidate.source,
                            path,
                        },
                        InstallOutcome::AlreadyInstalled(path) => OutcomeStatus::AlreadyInstalled { path },
                    };
                    return outcome(status, chain.into_attempts());
                }
                Err(e) => {
                    let reason = e.to_string();
                    last_failure = Some(match e {
                        InstallError::InvalidFontFile(reason) => OutcomeStatus::InvalidFontFile {
                            source: candidate.source,
                            reason,
                        },
                        InstallError::DownloadFailed { .. } | InstallError::Write { .. } => {
                            OutcomeStatus::DownloadFailed {
                                source: candidate.source,
                                reason: reason.clone(),
                            }
                        }
                    });
                    chain.reject(reason);
                }
            }
        }

        let status = last_failure.unwrap_or_else(|| {
            warn!("{} not found on any source", identity);
            OutcomeStatus::NotFound
        });
        outcome(status, chain.into_attempts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::{fast_retry, ScriptedSource};
    use font_acquisition::{HttpResponse, SourceError, StaticFetcher};
    use font_core::{AttemptOutcome, Confidence, ScanScope};
    use font_parser::test_support::minimal_font;
    use std::fs;
    use tempfile::TempDir;

    struct Harness {
        _root: TempDir,
        projects: PathBuf,
        fonts: PathBuf,
        install: PathBuf,
    }

    fn harness() -> Harness {
        let root = TempDir::new().unwrap();
        let projects = root.path().join("projects");
        let fonts = root.path().join("fonts");
        let install = root.path().join("install");
        for dir in [&projects, &fonts, &install] {
            fs::create_dir_all(dir).unwrap();
        }
        Harness {
            projects,
            fonts,
            install,
            _root: root,
        }
    }

    fn options(h: &Harness) -> RunOptions {
        RunOptions {
            retry: fast_retry(),
            font_dirs: vec![h.fonts.clone()],
            install_dir: Some(h.install.clone()),
            ..RunOptions::default()
        }
    }

    fn write_setting(dir: &Path, name: &str, fonts: &[&str]) {
        let body: String = fonts
            .iter()
            .map(|f| format!("Font = Input {{ Value = \"{}\", }},\n", f))
            .collect();
        fs::write(dir.join(name), format!("{{\n Tools = {{\n{}}}\n}}\n", body)).unwrap();
    }

    #[tokio::test]
    async fn installed_and_downloaded_fonts_are_reported_in_identity_order() {
        let h = harness();
        fs::write(h.fonts.join("Arial.ttf"), minimal_font("Arial", "Regular")).unwrap();
        write_setting(&h.projects, "title.setting", &["Obscure Display", "Arial"]);

        let fetcher = StaticFetcher::new().route(
            "https://dafont/font.zip",
            HttpResponse::ok(minimal_font("Obscure Display", "Regular")),
        );
        let sources: Vec<Arc<dyn FontSource>> = vec![
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(None)]),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]),
        ];
        let pipeline = PipelineOrchestrator::new(sources, Arc::new(fetcher), options(&h)).unwrap();

        let report = pipeline.run(&[&h.projects]).await.unwrap();
        let identities: Vec<&str> = report.outcomes.iter().map(|o| o.identity.family.as_str()).collect();
        assert_eq!(identities, vec!["arial", "obscure display"]);
        assert!(matches!(report.outcomes[0].status, OutcomeStatus::AlreadyInstalled { .. }));
        match &report.outcomes[1].status {
            OutcomeStatus::Resolved { source, path } => {
                assert_eq!(*source, SourceName::DaFont);
                assert!(path.starts_with(&h.install));
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(report.outcomes[1].attempts.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_references_resolve_once() {
        let h = harness();
        write_setting(&h.projects, "a.setting", &["Obscure Display"]);
        write_setting(&h.projects, "b.setting", &["obscure-display"]);

        let dafont = ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]);
        let fetcher = StaticFetcher::new().route(
            "https://dafont/font.zip",
            HttpResponse::ok(minimal_font("Obscure Display", "Regular")),
        );
        let pipeline =
            PipelineOrchestrator::new(vec![dafont.clone() as Arc<dyn FontSource>], Arc::new(fetcher), options(&h))
                .unwrap();

        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].referenced_by.len(), 2);
        assert_eq!(dafont.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_download_falls_through_to_the_next_source() {
        let h = harness();
        write_setting(&h.projects, "title.setting", &["Obscure Display"]);

        let fetcher = StaticFetcher::new()
            .route("https://google-fonts/font.zip", HttpResponse::ok(b"<html>blocked</html>".to_vec()))
            .route("https://freefonts/font.zip", HttpResponse::ok(minimal_font("Obscure Display", "Regular")));
        let sources: Vec<Arc<dyn FontSource>> = vec![
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(Some(Confidence::Exact))]),
            ScriptedSource::new(SourceName::FreeFonts, vec![Ok(Some(Confidence::Exact))]),
        ];
        let pipeline = PipelineOrchestrator::new(sources, Arc::new(fetcher), options(&h)).unwrap();

        let report = pipeline.run(&[&h.projects]).await.unwrap();
        let outcome = &report.outcomes[0];
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Resolved {
                source: SourceName::FreeFonts,
                ..
            }
        ));
        assert!(outcome
            .attempts
            .iter()
            .any(|a| matches!(a.outcome, AttemptOutcome::Rejected(_))));
    }

    #[tokio::test]
    async fn last_install_failure_is_reported_when_every_source_fails() {
        let h = harness();
        write_setting(&h.projects, "title.setting", &["Obscure Display"]);

        let fetcher = StaticFetcher::new().route("https://dafont/font.zip", HttpResponse::ok(b"not a font".to_vec()));
        let sources: Vec<Arc<dyn FontSource>> = vec![
            ScriptedSource::new(SourceName::GoogleFonts, vec![Err(SourceError::Parse("bad json".into()))]),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]),
        ];
        let pipeline = PipelineOrchestrator::new(sources, Arc::new(fetcher), options(&h)).unwrap();

        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert!(matches!(
            report.outcomes[0].status,
            OutcomeStatus::InvalidFontFile {
                source: SourceName::DaFont,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn nothing_found_is_not_found() {
        let h = harness();
        write_setting(&h.projects, "title.setting", &["Obscure Display"]);
        let sources: Vec<Arc<dyn FontSource>> = vec![ScriptedSource::new(SourceName::DaFont, vec![Ok(None)])];
        let pipeline = PipelineOrchestrator::new(sources, Arc::new(StaticFetcher::new()), options(&h)).unwrap();

        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert_eq!(report.outcomes[0].status, OutcomeStatus::NotFound);
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn unreadable_files_are_reported_without_stopping_the_run() {
        let h = harness();
        fs::write(h.fonts.join("Arial.ttf"), minimal_font("Arial", "Regular")).unwrap();
        fs::write(h.projects.join("broken.drfx"), b"PK\x03\x04 truncated").unwrap();
        write_setting(&h.projects, "ok.setting", &["Arial"]);

        let pipeline = PipelineOrchestrator::new(Vec::new(), Arc::new(StaticFetcher::new()), options(&h)).unwrap();
        let report = pipeline.run(&[&h.projects]).await.unwrap();

        assert_eq!(report.file_errors.len(), 1);
        assert!(report.file_errors[0].path.ends_with("broken.drfx"));
        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(report.outcomes[0].status, OutcomeStatus::AlreadyInstalled { .. }));
    }

    #[tokio::test]
    async fn scope_limits_which_files_are_scanned() {
        let h = harness();
        write_setting(&h.projects, "title.setting", &["Obscure Display"]);
        let mut opts = options(&h);
        opts.scope = ScanScope::ContainersOnly;

        let pipeline = PipelineOrchestrator::new(Vec::new(), Arc::new(StaticFetcher::new()), opts).unwrap();
        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.warnings, vec!["no project files found".to_string()]);
    }

    #[tokio::test]
    async fn missing_primary_credential_without_fallbacks_fails_the_run() {
        let h = harness();
        let http: Arc<dyn HttpFetch> = Arc::new(StaticFetcher::new());
        let sources = font_acquisition::build_sources(&[SourceName::GoogleFonts], http.clone(), None);
        let pipeline = PipelineOrchestrator::new(sources, http.clone(), options(&h)).unwrap();
        assert!(matches!(
            pipeline.run(&[&h.projects]).await,
            Err(FontError::MissingCredential)
        ));

        let sources =
            font_acquisition::build_sources(&[SourceName::GoogleFonts, SourceName::DaFont], http.clone(), None);
        let pipeline = PipelineOrchestrator::new(sources, http, options(&h)).unwrap();
        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert_eq!(report.warnings.len(), 2);
    }

    #[tokio::test]
    async fn abort_before_resolution_skips_remaining_identities() {
        let h = harness();
        write_setting(&h.projects, "title.setting", &["Obscure Display"]);
        let opts = options(&h);
        opts.abort.abort();

        let dafont = ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]);
        let pipeline =
            PipelineOrchestrator::new(vec![dafont.clone() as Arc<dyn FontSource>], Arc::new(StaticFetcher::new()), opts)
                .unwrap();
        let report = pipeline.run(&[&h.projects]).await.unwrap();
        assert!(report.aborted);
        assert!(report.outcomes.is_empty());
        assert_eq!(dafont.calls(), 0);
    }
}
