//! Test utilities for the contract sandbox.

pub mod contracts;

mod program;
mod state;

pub use program::*;
pub use state::*;
