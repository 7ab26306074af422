//! Automation worker: drives dispatched tasks through a browser session.
//!
//! Core components:
//! - `pipeline`: `Worker`, acquire → navigate → classify → fill → submit → finalize
//! - `stage`: Pipeline stage machine published on a watch channel
//! - `cancel`: Per-task cancellation token and scoped deletion listener
//! - `fields`: Working-set classification and fill-strategy resolution
//! - `fill`: Per-field preparation and strategies
//! - `rendezvous`: File-upload pause keyed by task and selector

pub mod cancel;
pub mod fields;
pub mod fill;
pub mod pipeline;
pub mod rendezvous;
pub mod stage;

pub use cancel::{CancelToken, DeletionListener, SessionSlot};
pub use fields::{FillStrategy, WorkingSet, classify};
pub use pipeline::{Worker, contains_success_indicator, outcome_status};
pub use rendezvous::FileRendezvous;
pub use stage::{RunState, Stage, StageTracker};
