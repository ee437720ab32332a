//! Data model, crypto primitives, and adapter traits shared by the dPoS
//! finality layer's voter, store, and controller crates.

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod hash;
pub mod types;

pub use adapters::*;
pub use config::*;
pub use crypto::*;
pub use types::*;
