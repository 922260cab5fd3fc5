//! # Resilience wrapper
//!
//! [`ResilientClient`] decorates any [`LlmClient`] and turns a handful of
//! recognisable backend failures into a single corrective retry:
//!
//! - **limit**: the error names an output-token ceiling `C`. The ceiling is
//!   remembered and the call is retried with `C - 1`. Later calls for the
//!   model are clamped before the first attempt.
//! - **alias**: the backend wants an invocation alias. The inner client's
//!   resolver supplies one, the mapping is cached and the call retried.
//! - **capacity**: rate limiting or overload. The call is retried once after
//!   a jittered, cancellable backoff.
//!
//! Each category fires at most once per call. Configuration errors and
//! cancellation are never retried. Every attempt and its outcome is
//! reported to the registry's [`CallSink`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use switchboard_core::{
    InvocationResolver, LlmClient, LlmError, ModelSummary, ProviderKind, Request, Response,
};
use switchboard_settings::ResilienceSettings;
use switchboard_telemetry::{
    CallEvent, CallRecord, CallSink, FailureInfo, RequestShape, ResponseShape, TracingCallSink, timestamp_now,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error_parsing::{is_capacity_error, parse_token_ceiling, requires_invocation_alias};
use crate::limits::ObservedLimits;
use crate::resolver::ResolverCaches;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and shared state
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for [`ResilientClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// System prompts shorter than this may mark a side call.
    pub side_call_system_chars: usize,
    /// Budgets at or below this may mark a side call.
    pub side_call_max_tokens: u32,
    /// Base delay before the capacity retry.
    pub capacity_backoff: Duration,
    /// Upper bound on that delay.
    pub max_backoff: Duration,
    /// Random extra delay, drawn uniformly from `0..=jitter`.
    pub jitter: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self::from(&ResilienceSettings::default())
    }
}

impl From<&ResilienceSettings> for ResilienceConfig {
    fn from(settings: &ResilienceSettings) -> Self {
        let capacity_backoff = Duration::from_millis(settings.capacity_backoff_ms);
        Self {
            side_call_system_chars: settings.side_call_system_chars,
            side_call_max_tokens: settings.side_call_max_tokens,
            capacity_backoff,
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            jitter: capacity_backoff / 4,
        }
    }
}

/// State shared by every client a registry creates.
pub struct SharedState {
    limits: ObservedLimits,
    resolver_caches: Arc<ResolverCaches>,
    aliases: DashMap<String, String>,
    seq: AtomicU64,
    sink: Arc<dyn CallSink>,
    config: ResilienceConfig,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(Arc::new(TracingCallSink), ResilienceConfig::default())
    }
}

impl SharedState {
    /// State reporting to `sink`.
    pub fn new(sink: Arc<dyn CallSink>, config: ResilienceConfig) -> Self {
        Self {
            limits: ObservedLimits::new(),
            resolver_caches: Arc::new(ResolverCaches::default()),
            aliases: DashMap::new(),
            seq: AtomicU64::new(0),
            sink,
            config,
        }
    }

    /// Learned output-token ceilings.
    pub fn limits(&self) -> &ObservedLimits {
        &self.limits
    }

    /// Resolver caches handed to alias-resolving clients.
    pub fn resolver_caches(&self) -> Arc<ResolverCaches> {
        Arc::clone(&self.resolver_caches)
    }

    /// Resilience tuning.
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Next call sequence number, starting at 1.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached invocation alias for `model` on `kind` within the resolver
    /// `scope` (account and region).
    pub fn alias(&self, kind: ProviderKind, scope: Option<&str>, model: &str) -> Option<String> {
        self.aliases.get(&alias_key(kind, scope, model)).map(|a| a.clone())
    }

    fn remember_alias(&self, kind: ProviderKind, scope: Option<&str>, model: &str, alias: &str) {
        let _ = self.aliases.insert(alias_key(kind, scope, model), alias.to_string());
    }
}

fn alias_key(kind: ProviderKind, scope: Option<&str>, model: &str) -> String {
    format!("{kind}:{}:{model}", scope.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry planning
// ─────────────────────────────────────────────────────────────────────────────

/// Retry category, as reported in telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryCategory {
    /// Output-token ceiling.
    Limit,
    /// Invocation alias.
    Alias,
    /// Capacity exhaustion.
    Capacity,
}

impl RetryCategory {
    /// Stored name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Alias => "alias",
            Self::Capacity => "capacity",
        }
    }
}

#[derive(Debug, Default)]
struct RetryBudget {
    limit: bool,
    alias: bool,
    capacity: bool,
}

enum Plan {
    Retry(Request, RetryCategory),
    Fail(LlmError),
}

struct CallContext {
    seq: u64,
    model: String,
    alias_scope: Option<String>,
    side_call: bool,
    started: Instant,
}

/// Decorator adding limit learning, alias resolution and capacity retry.
pub struct ResilientClient {
    inner: Arc<dyn LlmClient>,
    state: Arc<SharedState>,
}

impl ResilientClient {
    /// Wrap `inner`, or return it unchanged when it is already resilient.
    pub fn wrap(inner: Arc<dyn LlmClient>, state: Arc<SharedState>) -> Arc<dyn LlmClient> {
        if inner.is_resilient() {
            return inner;
        }
        Arc::new(Self { inner, state })
    }

    fn is_side_call(&self, request: &Request) -> bool {
        let config = &self.state.config;
        request.tool_list().is_empty()
            && request.system.as_deref().map_or(0, |s| s.chars().count()) < config.side_call_system_chars
            && request.max_tokens <= config.side_call_max_tokens
    }

    fn backoff(&self) -> Duration {
        let config = &self.state.config;
        let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        (config.capacity_backoff + Duration::from_millis(extra)).min(config.max_backoff)
    }

    fn record(
        &self,
        ctx: &CallContext,
        attempt: u32,
        event: CallEvent,
        request: &Request,
        response: Option<&Response>,
        failure: Option<(&LlmError, Option<RetryCategory>)>,
    ) {
        let record = CallRecord {
            seq: ctx.seq,
            attempt,
            provider: self.inner.provider_kind().to_string(),
            model: if request.model.is_empty() {
                ctx.model.clone()
            } else {
                request.model.clone()
            },
            side_call: ctx.side_call,
            event,
            request: RequestShape::of(request),
            response: response.map(ResponseShape::of),
            failure: failure.map(|(err, category)| FailureInfo::of(err, category.map(RetryCategory::as_str))),
            duration_ms: u64::try_from(ctx.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timestamp: timestamp_now(),
        };
        self.state.sink.record(&record);
    }

    async fn plan(
        &self,
        err: LlmError,
        current: &Request,
        ctx: &CallContext,
        budget: &mut RetryBudget,
        cancel: &CancellationToken,
    ) -> Plan {
        let LlmError::Backend { status, message } = &err else {
            return Plan::Fail(err);
        };
        let status = *status;

        if !budget.limit {
            if let Some(ceiling) = parse_token_ceiling(message) {
                let allowed = ceiling.saturating_sub(1);
                if allowed > 0 && allowed < current.max_tokens {
                    budget.limit = true;
                    self.state.limits.record(&ctx.model, ceiling);
                    info!(model = %ctx.model, ceiling, retry_max_tokens = allowed, "learned output token ceiling");
                    let mut next = current.clone();
                    next.max_tokens = allowed;
                    return Plan::Retry(next, RetryCategory::Limit);
                }
            }
        }

        if !budget.alias && requires_invocation_alias(message) {
            budget.alias = true;
            let Some(resolver) = self.inner.invocation_resolver() else {
                return Plan::Fail(err);
            };
            return match resolver.resolve(&ctx.model, cancel).await {
                Ok(alias) if alias != current.model => {
                    info!(model = %ctx.model, %alias, "retrying with invocation alias");
                    self.state.remember_alias(
                        self.inner.provider_kind(),
                        ctx.alias_scope.as_deref(),
                        &ctx.model,
                        &alias,
                    );
                    let mut next = current.clone();
                    next.model = alias;
                    Plan::Retry(next, RetryCategory::Alias)
                }
                Ok(_) => Plan::Fail(err),
                Err(LlmError::Cancelled) => Plan::Fail(LlmError::Cancelled),
                Err(resolution) => Plan::Fail(LlmError::backend(
                    status,
                    format!("{message}; {}", resolution.message()),
                )),
            };
        }

        if !budget.capacity && is_capacity_error(Some(status), message) {
            budget.capacity = true;
            let delay = self.backoff();
            debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "capacity backoff");
            return tokio::select! {
                biased;
                () = cancel.cancelled() => Plan::Fail(LlmError::Cancelled),
                () = tokio::time::sleep(delay) => Plan::Retry(current.clone(), RetryCategory::Capacity),
            };
        }

        Plan::Fail(err)
    }
}

fn terminal_event(err: &LlmError) -> CallEvent {
    if matches!(err, LlmError::Cancelled) {
        CallEvent::Cancelled
    } else {
        CallEvent::Error
    }
}

#[async_trait]
impl LlmClient for ResilientClient {
    fn provider_kind(&self) -> ProviderKind {
        self.inner.provider_kind()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn send(&self, request: &Request) -> Result<Response, LlmError> {
        let model = if request.model.is_empty() {
            self.inner.model().to_string()
        } else {
            request.model.clone()
        };
        let ctx = CallContext {
            seq: self.state.next_seq(),
            side_call: self.is_side_call(request),
            alias_scope: self.inner.invocation_resolver().and_then(|r| r.scope()),
            model,
            started: Instant::now(),
        };

        if request.is_cancelled() {
            self.record(&ctx, 0, CallEvent::Cancelled, request, None, Some((&LlmError::Cancelled, None)));
            return Err(LlmError::Cancelled);
        }

        let mut current = request.clone();
        current.model = self
            .state
            .alias(self.inner.provider_kind(), ctx.alias_scope.as_deref(), &ctx.model)
            .unwrap_or_else(|| ctx.model.clone());
        if let Some(clamped) = self.state.limits.clamp(&ctx.model, current.max_tokens) {
            debug!(model = %ctx.model, from = current.max_tokens, to = clamped, "pre-clamping max_tokens");
            current.max_tokens = clamped;
        }

        let cancel = request.cancel_token();
        let mut budget = RetryBudget::default();
        let mut attempt = 0;
        loop {
            self.record(&ctx, attempt, CallEvent::Attempt, &current, None, None);
            let err = match self.inner.send(&current).await {
                Ok(response) => {
                    self.record(&ctx, attempt, CallEvent::Success, &current, Some(&response), None);
                    return Ok(response);
                }
                Err(err) => err,
            };

            if err.is_final() {
                self.record(&ctx, attempt, terminal_event(&err), &current, None, Some((&err, None)));
                return Err(err);
            }

            match self.plan(err.clone(), &current, &ctx, &mut budget, &cancel).await {
                Plan::Retry(next, category) => {
                    self.record(&ctx, attempt, CallEvent::Retry, &current, None, Some((&err, Some(category))));
                    current = next;
                    attempt += 1;
                }
                Plan::Fail(final_err) => {
                    self.record(&ctx, attempt, terminal_event(&final_err), &current, None, Some((&final_err, None)));
                    return Err(final_err);
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, LlmError> {
        self.inner.list_models().await
    }

    fn invocation_resolver(&self) -> Option<Arc<dyn InvocationResolver>> {
        self.inner.invocation_resolver()
    }

    fn is_resilient(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
