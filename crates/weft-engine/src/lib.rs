//! Pipeline composition engine for multi-step unit orchestration.
//!
//! A pipeline is a tree of `Step`s: atomic `Unit`s combined by three
//! composition strategies. `Sequential` runs children in strict order over
//! one mutable state; `Parallel` fans children out over isolated snapshots
//! and merges their declared outputs back; `Loop` repeats its children up
//! to an iteration budget, exiting early when the termination tool fires.
//!
//! The `ExecutionEngine` walks a validated `Pipeline`, resolves each unit's
//! instruction template against the shared `StateStore`, invokes the
//! opaque backend, and mediates every state write.

pub mod composite;
pub mod engine;
pub mod report;
pub mod template;
pub mod unit;
pub mod validate;

pub use composite::{Loop, Parallel, Pipeline, Sequential, Step};
pub use engine::ExecutionEngine;
pub use report::{RunReport, UnitRecord};
pub use unit::Unit;
