//! Capabilities used to bring a freshly created, still suspended, child
//! process under tracing.

use std::path::Path;

use thiserror::Error;
use uuid::Uuid;

use crate::Handle;

/// Entry function the helper-assisted injection path re-enters in the child
/// before its real entry point runs. Exported by the platform module hosting
/// the tracer, next to the detours it hands to [`crate::InterceptionSet`].
pub const HELPER_ENTRY: &str = "TracerFinishHelperProcess";

/// Well-known key under which a parent leaves the propagation payload on its
/// children.
pub const PAYLOAD_ID: Uuid = Uuid::from_u128(0x5f1e_0b2c_7a4d_4c8e_9b3f_2d61_a0c4_e817);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("updating the module list of process {process} failed")]
    UpdateModules { process: Handle },
    #[error("helper-assisted injection into process {process_id} failed")]
    Helper { process_id: u32 },
    #[error("copying payload {key} into process {process} failed with error code: {code}")]
    PayloadCopy { process: Handle, key: Uuid, code: u32 },
    #[error("resuming thread {thread} failed with error code: {code}")]
    Resume { thread: Handle, code: u32 },
    #[error("terminating process {process} failed with error code: {code}")]
    Terminate { process: Handle, code: u32 },
    #[error("closing handle {handle} failed with error code: {code}")]
    CloseHandle { handle: Handle, code: u32 },
}

/// Injection and process control primitives.
pub trait ProcessLauncher: Send + Sync {
    /// Adds `module_path` to the module list the suspended `process` loads
    /// before running its entry point.
    fn update_process_with_module(
        &self,
        process: Handle,
        module_path: &Path,
    ) -> Result<(), LaunchError>;

    /// Fallback injection through a helper process which loads `module_path`
    /// into `process_id` and calls `helper_entry`.
    fn process_via_helper(
        &self,
        process_id: u32,
        module_path: &Path,
        helper_entry: &str,
    ) -> Result<(), LaunchError>;

    fn resume_thread(&self, thread: Handle) -> Result<(), LaunchError>;

    /// [`Handle::CURRENT_PROCESS`] terminates the calling process.
    fn terminate_process(&self, process: Handle, exit_code: u32) -> Result<(), LaunchError>;

    fn close_handle(&self, handle: Handle) -> Result<(), LaunchError>;
}

/// Side channel carrying a small blob from a parent to one of its children.
pub trait PayloadChannel: Send + Sync {
    /// Leaves `bytes` on the `child` process under `key`.
    fn deliver(&self, child: Handle, key: &Uuid, bytes: &[u8]) -> Result<(), LaunchError>;

    /// Reads the payload left on the current process under `key`, if any.
    fn receive(&self, key: &Uuid) -> Option<Vec<u8>>;
}
