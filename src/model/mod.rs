//! Shared domain types: task ids, the task record, and its satellites.

pub mod id;
pub mod task;

pub use id::TaskId;
pub use task::{Autonomy, ClaimRecord, ClaimStatus, JournalEntry, Status, Task, VerificationStatus};
