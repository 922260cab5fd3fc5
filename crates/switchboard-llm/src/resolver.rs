//! # Resource resolver
//!
//! Some backends refuse a bare model id and want an invocation alias that
//! serves it (an inference profile, in Bedrock terms). The resolver fetches
//! the account's aliases through a [`CandidateSource`], scores them against
//! the requested model and caches both the candidate list and the result.
//!
//! Scoring, per candidate that shares the requested vendor family:
//! - +5 when the id carries the geo scope preferred for the region
//! - +2 for system-defined aliases
//! - +100 when a served model matches the requested one after stripping
//!   version and date suffixes, +30 when one contains the other
//!
//! Ties keep the earlier candidate. When nothing scores, the first
//! candidate wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use switchboard_core::{InvocationResolver, LlmError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// How long a fetched candidate list stays fresh.
pub const CANDIDATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on pages fetched per refresh.
pub const MAX_PAGES: usize = 10;

/// Text appended to every resolution failure.
pub const GUIDANCE: &str = "select an inference alias manually";

const GEO_PREFIXES: &[&str] = &["us-gov.", "us.", "eu.", "apac.", "global.", "jp.", "au.", "ca."];

/// Who created an alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateKind {
    /// Provisioned by the backend.
    SystemDefined,
    /// Created in the account.
    UserDefined,
}

/// One invocation alias and the models it serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceCandidate {
    /// Identifier to invoke with.
    pub id: String,
    /// Classification, when the backend reports one.
    pub kind: Option<CandidateKind>,
    /// Underlying model references (ids or ARNs).
    pub model_refs: Vec<String>,
}

/// One page of a candidate listing.
#[derive(Clone, Debug, Default)]
pub struct CandidatePage {
    /// Candidates in backend order.
    pub candidates: Vec<ResourceCandidate>,
    /// Continuation token, absent on the last page.
    pub next_token: Option<String>,
}

/// Where candidates come from.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Cache key for the account and region this source lists.
    fn scope(&self) -> String;

    /// Fetch one page.
    async fn fetch_page(&self, next_token: Option<&str>, cancel: &CancellationToken) -> Result<CandidatePage, LlmError>;
}

/// Resolution failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The listing succeeded but held nothing usable.
    #[error("no invocation alias found for `{model}`: {reason}; select an inference alias manually")]
    NoCandidate {
        /// Requested model.
        model: String,
        /// What went wrong.
        reason: String,
    },
    /// The listing itself failed.
    #[error("listing invocation aliases for `{model}` failed: {source}; select an inference alias manually")]
    Listing {
        /// Requested model.
        model: String,
        /// Underlying failure.
        source: LlmError,
    },
}

impl ResolutionError {
    /// Typed error for the caller, keeping `status` from the failure that
    /// triggered resolution. Cancellation stays cancellation.
    pub fn into_llm_error(self, status: u16) -> LlmError {
        match self {
            Self::Listing {
                source: LlmError::Cancelled,
                ..
            } => LlmError::Cancelled,
            other => LlmError::backend(status, other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Caches
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct CachedCandidates {
    fetched_at: Instant,
    list: Arc<Vec<ResourceCandidate>>,
}

/// Candidate and resolution caches, shared across clients.
#[derive(Debug)]
pub struct ResolverCaches {
    candidates: DashMap<String, Arc<CachedCandidates>>,
    resolutions: DashMap<String, String>,
    ttl: Duration,
}

impl Default for ResolverCaches {
    fn default() -> Self {
        Self::with_ttl(CANDIDATE_TTL)
    }
}

impl ResolverCaches {
    /// Caches whose candidate lists expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            candidates: DashMap::new(),
            resolutions: DashMap::new(),
            ttl,
        }
    }

    fn fresh_candidates(&self, scope: &str) -> Option<Arc<Vec<ResourceCandidate>>> {
        self.candidates
            .get(scope)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.list))
    }

    fn store_candidates(&self, scope: String, list: Arc<Vec<ResourceCandidate>>) {
        let _ = self.candidates.insert(
            scope,
            Arc::new(CachedCandidates {
                fetched_at: Instant::now(),
                list,
            }),
        );
    }

    /// Cached resolution for `model` in `scope`.
    pub fn resolution(&self, scope: &str, model: &str) -> Option<String> {
        self.resolutions.get(&resolution_key(scope, model)).map(|v| v.clone())
    }

    /// Number of cached resolutions.
    pub fn resolution_count(&self) -> usize {
        self.resolutions.len()
    }
}

fn resolution_key(scope: &str, model: &str) -> String {
    format!("{scope}|{model}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Model tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Whether `model` is already invocable: an ARN or a geo-scoped alias.
pub fn is_concrete(model: &str) -> bool {
    model.starts_with("arn:") || GEO_PREFIXES.iter().any(|p| model.starts_with(p))
}

fn strip_geo(id: &str) -> &str {
    GEO_PREFIXES
        .iter()
        .find_map(|p| id.strip_prefix(p))
        .unwrap_or(id)
}

fn strip_one_suffix(token: &str) -> Option<&str> {
    // `:0`
    if let Some((head, tail)) = token.rsplit_once(':') {
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            return Some(head);
        }
    }
    let (head, tail) = token.rsplit_once('-')?;
    // `-v1`
    if let Some(version) = tail.strip_prefix('v') {
        if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) {
            return Some(head);
        }
    }
    // `-20250219`
    if tail.len() == 8 && tail.bytes().all(|b| b.is_ascii_digit()) {
        return Some(head);
    }
    None
}

/// Comparable model token: last path segment, no geo scope, no
/// `:N` / `-vN` / `-YYYYMMDD` suffixes.
pub fn model_token(reference: &str) -> String {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    let mut token = strip_geo(last);
    while let Some(shorter) = strip_one_suffix(token) {
        token = shorter;
    }
    token.to_lowercase()
}

fn vendor(token: &str) -> Option<&str> {
    token.split_once('.').map(|(v, _)| v)
}

/// Geo scope preferred for `region` (`us-east-1` → `us.`).
pub fn preferred_geo(region: &str) -> Option<&'static str> {
    let region = region.to_lowercase();
    if region.starts_with("us-gov") {
        Some("us-gov.")
    } else if region.starts_with("us-") {
        Some("us.")
    } else if region.starts_with("eu-") {
        Some("eu.")
    } else if region.starts_with("ap-") {
        Some("apac.")
    } else if region.starts_with("ca-") {
        Some("ca.")
    } else {
        None
    }
}

fn score(candidate: &ResourceCandidate, wanted: &str, geo: Option<&str>) -> u32 {
    let mut score = 0;
    if geo.is_some_and(|g| candidate.id.starts_with(g)) {
        score += 5;
    }
    if candidate.kind == Some(CandidateKind::SystemDefined) {
        score += 2;
    }
    let tokens: Vec<String> = candidate.model_refs.iter().map(|r| model_token(r)).collect();
    if tokens.iter().any(|t| t == wanted) {
        score += 100;
    } else if tokens.iter().any(|t| t.contains(wanted) || wanted.contains(t.as_str())) {
        score += 30;
    }
    score
}

/// Pick the best candidate for `model`, or `None` when no candidate serves
/// its vendor family.
pub fn select_candidate<'a>(
    candidates: &'a [ResourceCandidate],
    model: &str,
    region: Option<&str>,
) -> Option<&'a ResourceCandidate> {
    let wanted = model_token(model);
    let family = vendor(&wanted);
    let eligible: Vec<&ResourceCandidate> = candidates
        .iter()
        .filter(|c| match family {
            Some(family) => c.model_refs.iter().any(|r| vendor(&model_token(r)) == Some(family)),
            None => true,
        })
        .collect();

    let geo = region.and_then(preferred_geo);
    let mut best: Option<(&ResourceCandidate, u32)> = None;
    for candidate in &eligible {
        let s = score(candidate, &wanted, geo);
        if best.is_none_or(|(_, top)| s > top) {
            best = Some((candidate, s));
        }
    }
    match best {
        Some((candidate, s)) if s > 0 => Some(candidate),
        _ => eligible.first().copied(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves model ids to invocation aliases through a [`CandidateSource`].
pub struct ResourceResolver {
    source: Arc<dyn CandidateSource>,
    caches: Arc<ResolverCaches>,
    region: Option<String>,
}

impl ResourceResolver {
    /// Resolver over `source`, sharing `caches`.
    pub fn new(source: Arc<dyn CandidateSource>, caches: Arc<ResolverCaches>, region: Option<String>) -> Self {
        Self { source, caches, region }
    }

    async fn candidates(&self, scope: &str, cancel: &CancellationToken) -> Result<Arc<Vec<ResourceCandidate>>, LlmError> {
        if let Some(list) = self.caches.fresh_candidates(scope) {
            return Ok(list);
        }

        let mut list = Vec::new();
        let mut next: Option<String> = None;
        for page_index in 0..MAX_PAGES {
            let page = self.source.fetch_page(next.as_deref(), cancel).await?;
            debug!(page_index, count = page.candidates.len(), "fetched candidate page");
            list.extend(page.candidates);
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next = Some(token),
                None => break,
            }
        }

        let list = Arc::new(list);
        self.caches.store_candidates(scope.to_string(), Arc::clone(&list));
        Ok(list)
    }

    /// Resolve `model`, returning it unchanged when already concrete.
    #[instrument(skip(self, cancel))]
    pub async fn resolve_model(&self, model: &str, cancel: &CancellationToken) -> Result<String, ResolutionError> {
        if is_concrete(model) {
            return Ok(model.to_string());
        }
        let scope = self.source.scope();
        if let Some(hit) = self.caches.resolution(&scope, model) {
            return Ok(hit);
        }

        let candidates = self
            .candidates(&scope, cancel)
            .await
            .map_err(|source| ResolutionError::Listing {
                model: model.to_string(),
                source,
            })?;
        let chosen = select_candidate(&candidates, model, self.region.as_deref()).ok_or_else(|| {
            ResolutionError::NoCandidate {
                model: model.to_string(),
                reason: format!("none of {} aliases serve this model family", candidates.len()),
            }
        })?;

        info!(model, alias = %chosen.id, "resolved invocation alias");
        let _ = self
            .caches
            .resolutions
            .insert(resolution_key(&scope, model), chosen.id.clone());
        Ok(chosen.id.clone())
    }
}

#[async_trait]
impl InvocationResolver for ResourceResolver {
    async fn resolve(&self, model: &str, cancel: &CancellationToken) -> Result<String, LlmError> {
        self.resolve_model(model, cancel).await.map_err(|e| e.into_llm_error(404))
    }

    fn scope(&self) -> Option<String> {
        Some(self.source.scope())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
