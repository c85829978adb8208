use std::sync::Arc;

use font_acquisition::{retry_with_backoff, FontSource, SourceError};
use font_core::{AttemptOutcome, Confidence, DownloadCandidate, FontIdentity, RetryPolicy, SourceAttempt};
use tracing::{debug, warn};

/// Where a chain is in its walk over the providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    Querying { source_index: usize },
    /// A candidate is waiting for the installer's verdict
    Found {
        candidate: DownloadCandidate,
        source_index: usize,
    },
    Exhausted,
}

/// Walks the ordered providers for one identity.
///
/// Providers are asked strictly in order. An exact candidate stops the walk;
/// approximate ones are set aside and used, earliest provider first, only
/// once every provider has been asked. A candidate the installer rejects
/// resumes the walk at the next provider.
pub struct ResolutionChain<'a> {
    identity: FontIdentity,
    sources: &'a [Arc<dyn FontSource>],
    retry: RetryPolicy,
    state: ChainState,
    /// Approximate candidates in provider order
    approximate: Vec<(usize, DownloadCandidate)>,
    attempts: Vec<SourceAttempt>,
}

impl<'a> ResolutionChain<'a> {
    pub fn new(identity: FontIdentity, sources: &'a [Arc<dyn FontSource>], retry: RetryPolicy) -> Self {
        Self {
            identity,
            sources,
            retry,
            state: ChainState::Pending,
            approximate: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn identity(&self) -> &FontIdentity {
        &self.identity
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn attempts(&self) -> &[SourceAttempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<SourceAttempt> {
        self.attempts
    }

    /// Advance to the next candidate, or `None` once every provider is spent
    pub async fn next_candidate(&mut self) -> Option<DownloadCandidate> {
        loop {
            match &self.state {
                ChainState::Pending => {
                    self.state = ChainState::Querying { source_index: 0 };
                }
                ChainState::Querying { source_index } if *source_index >= self.sources.len() => {
                    if self.approximate.is_empty() {
                        debug!("{}: all {} sources exhausted", self.identity, self.sources.len());
                        self.state = ChainState::Exhausted;
                        return None;
                    }
                    let (index, candidate) = self.approximate.remove(0);
                    debug!("{}: settling for approximate match from {}", self.identity, candidate.source);
                    self.state = ChainState::Found {
                        candidate: candidate.clone(),
                        source_index: index,
                    };
                    return Some(candidate);
                }
                ChainState::Querying { source_index } => {
                    let index = *source_index;
                    if let Some(candidate) = self.query(index).await {
                        self.state = ChainState::Found {
                            candidate: candidate.clone(),
                            source_index: index,
                        };
                        return Some(candidate);
                    }
                    self.state = ChainState::Querying {
                        source_index: index + 1,
                    };
                }
                ChainState::Found { candidate, .. } => return Some(candidate.clone()),
                ChainState::Exhausted => return None,
            }
        }
    }

    /// The installer refused the current candidate; move past its provider
    pub fn reject(&mut self, reason: impl Into<String>) {
        let ChainState::Found { candidate, source_index } = &self.state else {
            return;
        };
        let reason = reason.into();
        warn!("{}: candidate from {} rejected: {}", self.identity, candidate.source, reason);
        self.attempts.push(SourceAttempt {
            source: candidate.source,
            outcome: AttemptOutcome::Rejected(reason),
        });

        let resume_at = if candidate.confidence == Confidence::Exact {
            source_index + 1
        } else {
            // Approximate candidates are only handed out after the walk ended
            self.sources.len()
        };
        self.state = ChainState::Querying { source_index: resume_at };
    }

    /// Ask one provider, with retries. Returns an exact candidate; stores an
    /// approximate one.
    async fn query(&mut self, index: usize) -> Option<DownloadCandidate> {
        let source = &self.sources[index];
        let identity = &self.identity;
        let label = format!("{} search for {}", source.name(), identity);

        let retried = retry_with_backoff(
            &self.retry,
            &label,
            || source.search(identity),
            |e: &SourceError| e.is_retryable(),
        )
        .await;

        let outcome = match retried.result {
            Ok(Some(candidate)) => {
                let confidence = candidate.confidence;
                match confidence {
                    Confidence::Exact => {
                        self.attempts.push(SourceAttempt {
                            source: source.name(),
                            outcome: AttemptOutcome::Candidate(confidence),
                        });
                        return Some(candidate);
                    }
                    Confidence::Approximate => {
                        self.approximate.push((index, candidate));
                    }
                }
                AttemptOutcome::Candidate(confidence)
            }
            Ok(None) => AttemptOutcome::NoMatch,
            Err(e) => {
                warn!("{} failed after {} attempt(s): {}", label, retried.attempts, e);
                AttemptOutcome::Failed {
                    error: e.to_string(),
                    attempts: retried.attempts,
                }
            }
        };
        self.attempts.push(SourceAttempt {
            source: source.name(),
            outcome,
        });
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use font_core::SourceName;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) type Scripted = Result<Option<Confidence>, SourceError>;

    /// Replays a fixed list of answers; the last one repeats
    pub(crate) struct ScriptedSource {
        name: SourceName,
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub(crate) fn new(name: SourceName, script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FontSource for ScriptedSource {
        fn name(&self) -> SourceName {
            self.name
        }

        async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            match next.unwrap_or(Ok(None))? {
                Some(confidence) => Ok(Some(DownloadCandidate {
                    identity: identity.clone(),
                    url: format!("https://{}/font.zip", host(self.name)),
                    source: self.name,
                    confidence,
                })),
                None => Ok(None),
            }
        }
    }

    fn host(name: SourceName) -> &'static str {
        match name {
            SourceName::GoogleFonts => "google-fonts",
            SourceName::OneThousandOneFonts => "1001fonts",
            SourceName::DaFont => "dafont",
            SourceName::FreeFonts => "freefonts",
        }
    }

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    fn obscure() -> FontIdentity {
        FontIdentity::new("obscure display", "bold")
    }

    fn as_sources(sources: &[Arc<ScriptedSource>]) -> Vec<Arc<dyn FontSource>> {
        sources.iter().map(|s| s.clone() as Arc<dyn FontSource>).collect()
    }

    #[tokio::test]
    async fn first_exact_match_in_priority_order_wins() {
        let scripted = [
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(None)]),
            ScriptedSource::new(
                SourceName::OneThousandOneFonts,
                vec![Err(SourceError::Unavailable("HTTP 503".into()))],
            ),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]),
            ScriptedSource::new(SourceName::FreeFonts, vec![Ok(Some(Confidence::Exact))]),
        ];
        let sources = as_sources(&scripted);
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());

        let candidate = chain.next_candidate().await.unwrap();
        assert_eq!(candidate.source, SourceName::DaFont);
        assert_eq!(scripted[1].calls(), 3, "transient failures are retried");
        assert_eq!(scripted[3].calls(), 0, "later sources are not asked");
        assert!(matches!(chain.state(), ChainState::Found { source_index: 2, .. }));

        let log: Vec<_> = chain.attempts().iter().map(|a| a.source).collect();
        assert_eq!(
            log,
            vec![SourceName::GoogleFonts, SourceName::OneThousandOneFonts, SourceName::DaFont]
        );
    }

    #[tokio::test]
    async fn approximate_candidates_wait_for_later_exact_ones() {
        let scripted = [
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(Some(Confidence::Approximate))]),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(Some(Confidence::Exact))]),
        ];
        let sources = as_sources(&scripted);
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());

        let candidate = chain.next_candidate().await.unwrap();
        assert_eq!(candidate.source, SourceName::DaFont);
        assert_eq!(candidate.confidence, Confidence::Exact);
    }

    #[tokio::test]
    async fn earliest_approximate_is_used_when_nothing_exact_exists() {
        let scripted = [
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(None)]),
            ScriptedSource::new(SourceName::OneThousandOneFonts, vec![Ok(Some(Confidence::Approximate))]),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(None)]),
            ScriptedSource::new(SourceName::FreeFonts, vec![Ok(Some(Confidence::Approximate))]),
        ];
        let sources = as_sources(&scripted);
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());

        let first = chain.next_candidate().await.unwrap();
        assert_eq!(first.source, SourceName::OneThousandOneFonts);
        assert_eq!(first.confidence, Confidence::Approximate);

        chain.reject("HTML instead of a font");
        let second = chain.next_candidate().await.unwrap();
        assert_eq!(second.source, SourceName::FreeFonts);

        chain.reject("truncated");
        assert!(chain.next_candidate().await.is_none());
        assert_eq!(chain.state(), &ChainState::Exhausted);
    }

    #[tokio::test]
    async fn authentication_failures_are_not_retried_and_do_not_block_fallbacks() {
        let scripted = [
            ScriptedSource::new(
                SourceName::GoogleFonts,
                vec![Err(SourceError::Authentication("HTTP 403".into()))],
            ),
            ScriptedSource::new(SourceName::FreeFonts, vec![Ok(Some(Confidence::Exact))]),
        ];
        let sources = as_sources(&scripted);
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());

        let candidate = chain.next_candidate().await.unwrap();
        assert_eq!(candidate.source, SourceName::FreeFonts);
        assert_eq!(scripted[0].calls(), 1);
        assert!(matches!(
            chain.attempts()[0].outcome,
            AttemptOutcome::Failed { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn rejected_exact_candidate_resumes_at_next_source() {
        let scripted = [
            ScriptedSource::new(SourceName::GoogleFonts, vec![Ok(Some(Confidence::Exact))]),
            ScriptedSource::new(SourceName::DaFont, vec![Ok(None)]),
            ScriptedSource::new(SourceName::FreeFonts, vec![Ok(Some(Confidence::Exact))]),
        ];
        let sources = as_sources(&scripted);
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());

        assert_eq!(chain.next_candidate().await.unwrap().source, SourceName::GoogleFonts);
        chain.reject("invalid font file");
        assert_eq!(chain.next_candidate().await.unwrap().source, SourceName::FreeFonts);
        assert_eq!(scripted[0].calls(), 1);
        assert!(chain
            .attempts()
            .iter()
            .any(|a| a.source == SourceName::GoogleFonts && matches!(a.outcome, AttemptOutcome::Rejected(_))));
    }

    #[tokio::test]
    async fn no_sources_means_exhausted() {
        let sources: Vec<Arc<dyn FontSource>> = Vec::new();
        let mut chain = ResolutionChain::new(obscure(), &sources, fast_retry());
        assert!(chain.next_candidate().await.is_none());
        assert!(chain.attempts().is_empty());
    }
}
