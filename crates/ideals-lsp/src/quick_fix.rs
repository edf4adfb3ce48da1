use ideals_core::Range;
use ideals_engine::Fix;
use parking_lot::RwLock;

/// Fixes discovered by one analysis pass, indexed by the range of the finding they belong to.
///
/// Owned by exactly one diagnostics session and never merged with another session's
/// registry.
#[derive(Debug, Default)]
pub struct QuickFixRegistry {
    entries: RwLock<Vec<(Range, Vec<Fix>)>>,
}

impl QuickFixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, range: Range, fixes: Vec<Fix>) {
        if fixes.is_empty() {
            return;
        }
        self.entries.write().push((range, fixes));
    }

    /// All fixes whose range overlaps `range`, in registration order.
    pub fn query(&self, range: &Range) -> Vec<Fix> {
        self.entries
            .read()
            .iter()
            .filter(|(stored, _)| stored.overlaps(range))
            .flat_map(|(_, fixes)| fixes.iter().cloned())
            .collect()
    }
}
