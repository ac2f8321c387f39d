use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementCategory {
    Performance,
    Reliability,
}

impl ImprovementCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ImprovementCategory::Performance => "performance",
            ImprovementCategory::Reliability => "reliability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementAction {
    pub category: ImprovementCategory,
    pub target: String,
    pub action: String,
    pub priority: Priority,
}

impl ImprovementAction {
    pub fn new(
        category: ImprovementCategory,
        target: impl Into<String>,
        action: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            category,
            target: target.into(),
            action: action.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImprovementOutcome {
    pub applied_count: usize,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementMetrics {
    pub performance_score: f64,
    pub optimization_level: usize,
    pub last_improvement: DateTime<Utc>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<ImprovementAction>,
    pub outcome: ImprovementOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementStatus {
    Idle,
    Analyzing,
    Applying,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![Priority::Medium, Priority::Critical, Priority::Low, Priority::High];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn test_action_serialization() {
        let action = ImprovementAction::new(
            ImprovementCategory::Reliability,
            "error-handling",
            "enhance",
            Priority::Critical,
        );
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["category"], "reliability");
        assert_eq!(json["priority"], "critical");
    }
}
