mod entry_point;
pub mod hook_set;
pub mod launcher;
pub mod parsing;
pub mod patch;
pub mod primitives;
pub mod resolver;
pub mod trampoline;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use entry_point::EntryPoint;
pub use hook_set::{InterceptionError, InterceptionSet, InterceptionSetBuilder};
pub use launcher::{HELPER_ENTRY, LaunchError, PAYLOAD_ID, PayloadChannel, ProcessLauncher};
pub use patch::{Address, PatchEngine, PatchError};
pub use primitives::{Handle, OsError, Primitives, Status};
pub use resolver::ResourceResolver;
pub use trampoline::{Originals, Trampolines};

/// Utility function to pretty print an error with its sources.
///
/// We use this because by default Rust won't print the source of an error message,
/// making it much less useful. Instead of re-implementing that, we'll just use
/// anyhow as an error pretty-printer.
pub fn log_error<E: std::error::Error + Send + Sync + 'static>(msg: &str, err: E) {
    log::error!("{}: {:?}", msg, anyhow::Error::from(err));
}
