//! The spaced-repetition review engine: interval-due computation, per-word
//! difficulty tracking, weighted sampling, and the review-session state
//! machine. Everything here is either a pure function over snapshots or an
//! explicit object owned by the caller; the word store is the only shared
//! mutable resource.

pub mod difficulty;
pub mod error;
pub mod intervals;
pub mod progress;
pub mod selector;
pub mod session;

pub use difficulty::record_result;
pub use error::ReviewError;
pub use intervals::{elapsed_days, is_due, stage};
pub use progress::{ProgressSummary, compute_progress};
pub use selector::{
    QuizPool, due_or_fallback, quiz_sample, weight, weighted_sample_without_replacement,
};
pub use session::{ReviewSession, SessionManager, SessionState, SessionSummary, StepOutcome};
