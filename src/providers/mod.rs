pub mod scorer;

pub use scorer::{DisabledScorer, HttpRiskScorer, RiskScorer};
