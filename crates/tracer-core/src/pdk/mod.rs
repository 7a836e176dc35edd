//! Everything the monitor modules build their interceptions with.
//!
//! The [`HookContext`] is handed to every interception. It gives access to:
//! - the process-wide [`TracerContext`](crate::context::TracerContext)
//! - the [`Reporter`], which delivers events to the controller through a [`Transport`]
//! - the resource resolver, process launcher and payload channel capabilities
//!
//! Modules read their settings from a [`ModuleConfig`].

mod config;
mod hook_context;
mod reporter;

pub use config::*;
pub use hook_context::*;
pub use reporter::*;
