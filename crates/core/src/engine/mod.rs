//! Deterministic portfolio analytics and rebalance planning.
//!
//! Every function here is a pure, synchronous computation over immutable
//! inputs: no internal state, no I/O, no retries. The only collaborator is
//! the injected [`crate::sectors::SectorResolver`], and its failures degrade
//! to the "Other" bucket instead of aborting.

pub mod compare;
pub mod error;
pub mod metrics;
pub mod normalize;
pub mod plan;
pub mod target;

pub use compare::compare;
pub use error::EngineError;
pub use metrics::{analyze, analyze_with_baseline};
pub use normalize::{normalize, normalize_strict, Normalized};
pub use plan::{diff_weights, plan, plan_detailed, PlanMode, PlanOutcome};
pub use target::derive_target;
