//! Per-group snapshot version counter.

use std::collections::HashMap;

use udpfleet_core::GroupName;

/// Strictly increasing snapshot versions, one sequence per group name.
///
/// Sequences start at 1 and are never reset: a group that is deleted and
/// later recreated under the same name continues where it left off.
#[derive(Debug, Default)]
pub struct VersionCounter {
    next: HashMap<GroupName, u64>,
}

impl VersionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next version for `name`.
    pub fn next(&mut self, name: &GroupName) -> u64 {
        let slot = self.next.entry(name.clone()).or_insert(1);
        let version = *slot;
        *slot = slot.saturating_add(1);
        version
    }
}
