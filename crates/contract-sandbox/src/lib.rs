//! A fuel, time and memory bounded execution sandbox for wasm smart contracts.
//!
//! The [`Executor`] runs untrusted contract bytecode next to a shared runtime-support module and
//! mediates all of its access to state through the import modules of a [`HostRegistry`]. Two
//! protocols sit on top of it:
//!
//! - the lazy state-access protocol, driven by [`StateDiscoveryDriver`], which re-executes a call
//!   until every key it reads has been fetched from a [`StateProvider`];
//! - the nested-call protocol, entered through [`Executor::call_program`], in which programs call
//!   each other on explicitly sub-budgeted fuel.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod access;
pub use access::*;

mod cache;
pub use cache::*;

mod config;
pub use config::*;

mod context;
pub use context::*;

mod discovery;
pub use discovery::*;

mod error;
pub use error::*;

mod executor;
pub use executor::*;

mod fee;
pub use fee::*;

mod host;

mod marshal;
pub use marshal::*;

mod params;
pub use params::*;

mod registry;
pub use registry::*;

mod result;
pub use result::*;

mod state;
pub use state::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod types;
pub use types::*;
