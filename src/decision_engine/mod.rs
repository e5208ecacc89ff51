pub mod adversarial;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod ranking;
pub mod verdict;

// Re-export main types for convenience
pub use adversarial::{AdversarialFinding, AdversarialReviewer, FailureMode};
pub use logging::{VerdictLogEntry, VerdictLogger};
pub use pipeline::RacePipeline;
pub use policy::{Decision, DecisionInputs, DecisionPolicy};
pub use ranking::{RankedRunner, Ranking};
pub use verdict::Verdict;
