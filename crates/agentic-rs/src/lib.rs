//! Public SDK surface for the assistant memory subsystem.
//!
//! Re-exports the config and memory crates and wires a [`MemoryManager`]
//! from a loaded [`AgenticConfig`].

/// Re-export for convenience.
pub use agentic_rs_config as config;
/// Re-export for convenience.
pub use agentic_rs_memory as memory;

pub mod runtime;

pub use agentic_rs_config::AgenticConfig;
pub use agentic_rs_memory::MemoryManager;
pub use runtime::{
    SetupError, embedder_from_config, index_from_config, open_memory, retry_policy,
    settings_from_config,
};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}
