//! C2 Opportunity Engine (§4.2). Exclusively writes Opportunity records.

mod engine;
mod fees;
mod scoring;
mod verdict;

pub use engine::{ExternalContext, OpportunityEngine, VenueFees};
pub use verdict::{evaluate as evaluate_verdict, VerdictContext, VerdictOutcome};
