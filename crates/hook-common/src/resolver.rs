//! Best-effort mapping of opaque handles back to resource names.

use crate::Handle;

/// Resolves handles to the canonical name of the object behind them.
///
/// Any failure yields `None`: a missing name is never an error for callers.
pub trait ResourceResolver: Send + Sync {
    /// Canonical name of the object `handle` refers to.
    fn object_name(&self, handle: Handle) -> Option<String>;

    /// Name of the file backing the view mapped at `base_address` inside
    /// `process`, `None` for views not backed by a file.
    fn mapped_file_name(&self, process: Handle, base_address: usize) -> Option<String> {
        let _ = (process, base_address);
        None
    }
}

/// Resolver for hosts without a naming facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl ResourceResolver for NullResolver {
    fn object_name(&self, _handle: Handle) -> Option<String> {
        None
    }
}

#[cfg(target_os = "linux")]
pub use self::procfs_resolver::ProcfsResolver;

#[cfg(target_os = "linux")]
mod procfs_resolver {
    use nix::unistd::Pid;

    use super::ResourceResolver;
    use crate::{Handle, parsing::procfs};

    /// Resolves file descriptors and mapped views of the current process
    /// through procfs.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ProcfsResolver;

    impl ResourceResolver for ProcfsResolver {
        fn object_name(&self, handle: Handle) -> Option<String> {
            let fd = i32::try_from(handle.as_raw()).ok()?;
            match procfs::get_process_fd_path(Pid::this(), fd) {
                Ok(path) => Some(path.to_string_lossy().into_owned()),
                Err(err) => {
                    log::trace!("{err}");
                    None
                }
            }
        }

        fn mapped_file_name(&self, process: Handle, base_address: usize) -> Option<String> {
            if process != Handle::CURRENT_PROCESS {
                return None;
            }
            match procfs::get_process_mapping(Pid::this(), base_address) {
                Ok(mapping) => mapping
                    .and_then(|m| m.path)
                    .map(|path| path.to_string_lossy().into_owned()),
                Err(err) => {
                    log::trace!("{err}");
                    None
                }
            }
        }
    }

}
