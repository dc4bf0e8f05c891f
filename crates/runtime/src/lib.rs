//! Runtime orchestration: the vocab service facade, the frozen-batch
//! registry, the notifier seam, and the daily reminder sweep tasks.

mod batches;
mod notify;
mod service;
pub mod sweep;

pub use batches::{FrozenBatch, FrozenBatches};
pub use notify::Notifier;
pub use service::{MarkReply, Registration, StartedReview, VocabService};
pub use sweep::{run_due_pass, run_nudge_pass, spawn_session_maintenance, spawn_sweep_task};
