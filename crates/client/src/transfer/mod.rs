//! Upload transfers.
//!
//! - `task`: the per-file state machine and progress arithmetic
//! - `manager`: bounded concurrent execution and event publication

mod manager;
mod task;

pub use manager::{SettledHook, TransferError, TransferEvent, TransferManager};
pub use task::{FailureReason, TaskId, TransferStatus, TransferTask};
