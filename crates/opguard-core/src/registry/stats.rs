//! Aggregate registry state (active count, average progress).

use std::collections::BTreeMap;

use crate::classify::ErrorCategory;

use super::operation::Operation;

/// Point-in-time aggregate over all active operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    pub active_count: usize,
    pub is_any_active: bool,
    /// Mean progress over operations that track it; `None` if none do.
    pub average_progress: Option<f64>,
    pub by_category: BTreeMap<ErrorCategory, usize>,
}

impl RegistryStats {
    pub(super) fn compute<'a>(ops: impl Iterator<Item = &'a Operation>) -> Self {
        let mut stats = RegistryStats::default();
        let mut progress_sum = 0.0;
        let mut progress_n = 0usize;
        for op in ops {
            stats.active_count += 1;
            *stats.by_category.entry(op.category).or_insert(0) += 1;
            if let Some(p) = op.progress {
                progress_sum += p;
                progress_n += 1;
            }
        }
        stats.is_any_active = stats.active_count > 0;
        if progress_n > 0 {
            stats.average_progress = Some(progress_sum / progress_n as f64);
        }
        stats
    }

    pub fn count_for(&self, category: ErrorCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}
