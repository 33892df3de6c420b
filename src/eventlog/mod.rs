//! Event-log persistence: append-only events, snapshot compaction, replay,
//! and the git-conflict merge resolver.

pub mod event;
pub mod log;
pub mod merge;

pub use event::{Event, EventOp};
pub use log::EventLog;
