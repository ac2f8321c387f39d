pub mod cycle;
pub mod rules;

pub use cycle::ImprovementLoop;
pub use rules::{by_priority, derive_actions};
