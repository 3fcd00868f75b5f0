//! The standard import modules.

use once_cell::sync::Lazy;

use crate::{HostRegistry, ImportModule};

mod program;
mod sandbox;
mod state;

static STANDARD: Lazy<HostRegistry> = Lazy::new(|| {
    HostRegistry::new()
        .with_module(sandbox::module())
        .with_module(sandbox::callback_module())
        .with_module(state::module())
        .with_module(program::module())
});

impl HostRegistry {
    /// Returns the process-wide registry of standard import modules.
    ///
    /// It holds the `sandbox`, `env`, `state` and `program` namespaces.
    pub fn standard() -> &'static Self {
        &STANDARD
    }
}

/// Returns the standard registry extended with `modules`. A function in `modules` replaces a
/// standard function with the same name.
pub(crate) fn extended(modules: Vec<ImportModule>) -> HostRegistry {
    modules.into_iter().fold(HostRegistry::standard().clone(), HostRegistry::with_module)
}
