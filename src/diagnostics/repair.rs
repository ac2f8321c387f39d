use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PulseError, Result};
use crate::types::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    Dispatch(Command),
    /// Handled locally: a manual reconnect of the telemetry channel, unless
    /// the channel is still retrying or has given up.
    Reconnect,
    /// Informational state owned by another component. Nothing is sent and
    /// nothing is escalated.
    Defer,
}

type Strategy = Arc<dyn Fn(&str) -> RepairAction + Send + Sync>;

/// Keyword-to-remedy table shared by reactive and preventive maintenance.
///
/// An issue is matched on its leading token, lowercased and stripped of
/// trailing punctuation: `"high-cpu: score 66"` and `"CPU overload"` key on
/// `high-cpu` and `cpu` respectively.
#[derive(Clone, Default)]
pub struct RepairStrategies {
    by_keyword: HashMap<String, Strategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repaired: Vec<String>,
    pub failed: Vec<String>,
    pub unresolved: Vec<String>,
    pub deferred: Vec<String>,
}

pub fn issue_keyword(issue: &str) -> String {
    issue
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches([':', ',', '.', ';'])
        .to_lowercase()
}

fn second_token(issue: &str) -> Option<String> {
    issue
        .split_whitespace()
        .nth(1)
        .map(|t| t.trim_end_matches([':', ',', '.', ';']).to_string())
        .filter(|t| !t.is_empty())
}

impl RepairStrategies {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut strategies = Self::empty();

        strategies.register_command("high-cpu", Command::new("optimize", json!({"target": "cpu"})));
        strategies.register_command(
            "high-memory",
            Command::new("optimize", json!({"target": "memory"})),
        );
        strategies.register_command(
            "degraded-performance",
            Command::new("optimize", json!({"target": "system"})),
        );
        strategies.register_command(
            "storage-pressure",
            Command::new("cleanup", json!({"target": "disk"})),
        );
        strategies.register("module-degraded", |issue| {
            let module = second_token(issue).unwrap_or_else(|| "all".to_string());
            RepairAction::Dispatch(Command::new("restart", json!({ "target": module })))
        });
        strategies.register("disconnected", |_| RepairAction::Reconnect);
        for keyword in ["reconnecting", "no-metrics", "scorer-unavailable", "insecure-transport"] {
            strategies.register(keyword, |_| RepairAction::Defer);
        }

        // preventive vocabulary of the risk scorer
        strategies.register_command(
            "cpu",
            Command::new("throttle", json!({"target": "cpu", "level": 0.8})),
        );
        strategies.register_command(
            "memory",
            Command::new("restart", json!({"target": "memory-manager"})),
        );
        strategies.register_command(
            "network",
            Command::new("optimize", json!({"target": "network", "qos": "high"})),
        );

        strategies
    }

    pub fn register<F>(&mut self, keyword: &str, strategy: F)
    where
        F: Fn(&str) -> RepairAction + Send + Sync + 'static,
    {
        self.by_keyword
            .insert(keyword.to_lowercase(), Arc::new(strategy));
    }

    pub fn register_command(&mut self, keyword: &str, command: Command) {
        self.register(keyword, move |_| RepairAction::Dispatch(command.clone()));
    }

    pub fn resolve(&self, issue: &str) -> Result<RepairAction> {
        let keyword = issue_keyword(issue);
        self.by_keyword
            .get(&keyword)
            .map(|strategy| strategy(issue))
            .ok_or_else(|| PulseError::UnknownIssue(issue.to_string()))
    }

    pub fn keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = self.by_keyword.keys().cloned().collect();
        keywords.sort();
        keywords
    }
}
