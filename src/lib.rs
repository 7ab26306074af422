//! Form Runner: queued, single-flight web-form automation.

pub mod api;
pub mod browser;
pub mod config;
pub mod error;
pub mod queue;
pub mod tools;
pub mod worker;
