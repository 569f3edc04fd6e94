//! Record types carried on the object bus.
//!
//! Every record is a plain `Copy` struct: the bus hands out whole-object
//! snapshots, never references into shared state. Settings records also
//! serialize, so the TOML configuration deserializes straight into them.

mod command;
mod settings;
mod state;

pub use command::*;
pub use settings::*;
pub use state::*;
