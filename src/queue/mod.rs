//! Task store & scheduler.
//!
//! - `model`: Task records, statuses, fill reports, events
//! - `manager`: `TaskQueue`: FIFO, single-flight dispatch, lifecycle mutations

pub mod manager;
pub mod model;

pub use manager::{TaskQueue, TaskReceiver};
pub use model::{
    FieldReport, FieldStatus, FormField, LogEntry, QueueEvent, Task, TaskResult, TaskStatus,
    WorkerSignal,
};
