use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PulseError, Result};
use crate::types::{FeatureVector, RiskAssessment};

/// Predictive collaborator that turns a metrics feature vector into a
/// near-term failure risk.
#[async_trait]
pub trait RiskScorer: Send + Sync {
    async fn assess(&self, features: &FeatureVector) -> Result<RiskAssessment>;

    async fn ready(&self) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct HttpRiskScorer {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    features: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    risk: f64,
    #[serde(default)]
    issues: Vec<String>,
}

impl HttpRiskScorer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::Scorer(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RiskScorer for HttpRiskScorer {
    async fn assess(&self, features: &FeatureVector) -> Result<RiskAssessment> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&ScoreRequest { features })
            .send()
            .await
            .map_err(|e| PulseError::Scorer(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PulseError::Scorer(format!("scorer returned {}: {}", status, body)));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| PulseError::Scorer(e.to_string()))?;

        Ok(normalize(body.risk, body.issues))
    }

    async fn ready(&self) -> Result<bool> {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                log::debug!("risk scorer health probe failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Stand-in used when no scorer endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledScorer;

#[async_trait]
impl RiskScorer for DisabledScorer {
    async fn assess(&self, _features: &FeatureVector) -> Result<RiskAssessment> {
        Ok(normalize(0.0, Vec::new()))
    }

    async fn ready(&self) -> Result<bool> {
        Ok(false)
    }
}

fn normalize(risk: f64, issues: Vec<String>) -> RiskAssessment {
    let risk = if risk.is_finite() { risk.clamp(0.0, 1.0) } else { 0.0 };
    RiskAssessment {
        risk,
        issues,
        assessed_at: Utc::now(),
    }
}
