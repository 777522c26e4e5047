//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the segregated scheduler.
///
/// Memory-aware placement is active only when both `max_memory_ratio`
/// is positive and `total_memory_metadata` names the node-metadata key
/// holding the host memory budget (bytes, decimal string).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    /// Fraction (0.0–1.0) of a host's total memory it may commit.
    pub max_memory_ratio: f32,
    /// Node-metadata key holding the host memory budget.
    pub total_memory_metadata: String,
    /// When true, no-memory failures downgrade to warnings and the full
    /// pool-filtered candidate set is used.
    pub auto_scale_enabled: bool,
}

impl SchedulerConfig {
    /// Whether memory-aware placement is configured.
    pub fn memory_aware(&self) -> bool {
        self.max_memory_ratio > 0.0 && !self.total_memory_metadata.is_empty()
    }
}
