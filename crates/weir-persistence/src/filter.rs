//! Query filter model for the persistence gateway.
//!
//! Filters support equality conditions plus skip/limit pagination.
//! Stores must apply them under a stable, implementation-chosen ordering
//! so repeated paged scans never skip or repeat rows.

/// Hint passed to `upsert` describing which case the caller expects.
///
/// Drivers use the hint to pick the single-round-trip path: with
/// [`UpsertOptimization::Existing`] the common update case must not cost
/// an extra existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOptimization {
    /// The row is most likely absent.
    New,
    /// The row is most likely present.
    Existing,
}

/// An equality/pagination filter over one entity table.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, String)>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl Filter {
    /// An empty filter matching every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition on `field`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Skips the first `n` matching rows.
    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Returns at most `n` rows.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// The equality conditions, in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// The configured skip, defaulting to zero.
    #[must_use]
    pub fn skip_or_zero(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    /// The configured limit, if any.
    #[must_use]
    pub fn limit_opt(&self) -> Option<u64> {
        self.limit
    }
}
