//! Skylark object bus.
//!
//! Typed shared-state records with change notifications. Each record type
//! gets its own [`Object`] handle created once at init; subscribers either
//! register a callback (runs in the writer's context, must not block) or
//! connect a bounded [`EventQueue`] (lossless up to its depth, overflow
//! drops the oldest entry).
//!
//! # Contract
//!
//! - A `set` is atomic from the perspective of any `get`: readers observe
//!   either the old whole record or the new whole record, never a torn one.
//! - Callbacks fire after the value is visible; there is no ordering
//!   between a `set` returning and its callbacks having run, other than
//!   "before the writer's next scheduler tick".
//! - The bus owns no data. Readers receive copies.

mod error;
mod object;
mod queue;

pub use error::BusError;
pub use object::{Object, ObjectArray};
pub use queue::EventQueue;
