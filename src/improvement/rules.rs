use crate::config::ImprovementConfig;
use crate::types::{ImprovementAction, ImprovementCategory, MetricsSnapshot, Priority};

/// Threshold rules, evaluated in a fixed order. Thresholds are strict: a
/// metric sitting exactly on its threshold does not fire.
pub fn derive_actions(snapshot: &MetricsSnapshot, config: &ImprovementConfig) -> Vec<ImprovementAction> {
    let mut actions = Vec::new();

    if snapshot.cpu > config.cpu_threshold {
        actions.push(ImprovementAction::new(
            ImprovementCategory::Performance,
            "cpu",
            "optimize",
            Priority::High,
        ));
    }
    if snapshot.error_rate > config.error_rate_threshold {
        actions.push(ImprovementAction::new(
            ImprovementCategory::Reliability,
            "error-handling",
            "enhance",
            Priority::Critical,
        ));
    }
    if snapshot.latency > config.latency_threshold {
        actions.push(ImprovementAction::new(
            ImprovementCategory::Performance,
            "network",
            "optimize",
            Priority::Medium,
        ));
    }

    actions
}

/// Dispatch order: most urgent first, rule order among equals.
pub fn by_priority(actions: &[ImprovementAction]) -> Vec<ImprovementAction> {
    let mut ordered = actions.to_vec();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}
