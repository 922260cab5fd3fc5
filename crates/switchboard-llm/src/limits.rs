//! Output-token ceilings learned from backend errors.
//!
//! A ceiling `L` recorded for a model means the backend refused anything at
//! or above `L`, so later requests are clamped to `L - 1`. Entries are only
//! ever replaced whole; concurrent writers race with last-writer-wins.

use dashmap::DashMap;

/// Per-model learned ceilings.
#[derive(Debug, Default)]
pub struct ObservedLimits {
    ceilings: DashMap<String, u32>,
}

impl ObservedLimits {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ceiling recorded for `model`.
    pub fn get(&self, model: &str) -> Option<u32> {
        self.ceilings.get(model).map(|c| *c)
    }

    /// Record `ceiling` for `model`.
    pub fn record(&self, model: &str, ceiling: u32) {
        let _ = self.ceilings.insert(model.to_string(), ceiling);
    }

    /// Clamped budget for `model` when `max_tokens` exceeds the learned
    /// limit, `None` when no clamp applies. Never raises the budget.
    pub fn clamp(&self, model: &str, max_tokens: u32) -> Option<u32> {
        let allowed = self.get(model)?.saturating_sub(1);
        (allowed > 0 && max_tokens > allowed).then_some(allowed)
    }

    /// Number of models with a learned ceiling.
    pub fn len(&self) -> usize {
        self.ceilings.len()
    }

    /// Whether nothing has been learned yet.
    pub fn is_empty(&self) -> bool {
        self.ceilings.is_empty()
    }
}
