//! Typed call surface of the intercepted operating-system primitives.
//!
//! Every redirected entry point lands in an interception that eventually
//! forwards to the original implementation through the [`Primitives`] trait.
//! Requests mirror the arguments the host passed, outcomes mirror what the
//! original returned (status codes and output parameters included), so an
//! interception can forward a call and hand the result back untouched.

use std::fmt;

use thiserror::Error;

use crate::EntryPoint;

/// Opaque object handle returned by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    pub const NULL: Handle = Handle(0);
    /// Pseudo handle designating the calling process.
    pub const CURRENT_PROCESS: Handle = Handle(usize::MAX);

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> usize {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Native status code. Negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const PENDING: Status = Status(0x0000_0103);
    pub const INVALID_HANDLE: Status = Status(0xC000_0008_u32 as i32);
    pub const ACCESS_DENIED: Status = Status(0xC000_0022_u32 as i32);
    pub const OBJECT_NAME_NOT_FOUND: Status = Status(0xC000_0034_u32 as i32);
    pub const PROCEDURE_NOT_FOUND: Status = Status(0xC000_007A_u32 as i32);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

/// Last-error style failure code of the higher level primitives.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("os error {0}")]
pub struct OsError(pub u32);

impl OsError {
    pub const FILE_NOT_FOUND: OsError = OsError(2);
    pub const ACCESS_DENIED: OsError = OsError(5);
    pub const PROC_NOT_FOUND: OsError = OsError(127);
    /// The requested operation requires elevation.
    pub const ELEVATION_REQUIRED: OsError = OsError(740);
    /// A module initialization routine failed.
    pub const DLL_INIT_FAILED: OsError = OsError(1114);
    /// The operation was canceled by the user.
    pub const CANCELLED: OsError = OsError(1223);

    pub fn code(&self) -> u32 {
        self.0
    }
}

/// Process creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationFlags(u32);

impl CreationFlags {
    const SUSPENDED: u32 = 0x0000_0004;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_suspended(&self) -> bool {
        self.0 & Self::SUSPENDED != 0
    }

    /// The same flags with "start suspended" forced on.
    pub fn suspended(self) -> Self {
        Self(self.0 | Self::SUSPENDED)
    }
}

/// Access rights bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessMask(u32);

impl AccessMask {
    pub const FILE_READ_DATA: AccessMask = AccessMask(0x0000_0001);
    pub const FILE_WRITE_DATA: AccessMask = AccessMask(0x0000_0002);
    pub const SYNCHRONIZE: AccessMask = AccessMask(0x0010_0000);
    pub const GENERIC_WRITE: AccessMask = AccessMask(0x4000_0000);
    pub const GENERIC_READ: AccessMask = AccessMask(0x8000_0000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        AccessMask(self.0 | rhs.0)
    }
}

/// Rendered as a fixed-width, most significant bit first, binary string.
impl fmt::Display for AccessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032b}", self.0)
    }
}

/// Memory page protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageProtection(u32);

impl PageProtection {
    pub const READONLY: PageProtection = PageProtection(0x02);
    pub const READWRITE: PageProtection = PageProtection(0x04);
    pub const WRITECOPY: PageProtection = PageProtection(0x08);
    pub const EXECUTE_READ: PageProtection = PageProtection(0x20);
    pub const EXECUTE_READWRITE: PageProtection = PageProtection(0x40);
    pub const EXECUTE_WRITECOPY: PageProtection = PageProtection(0x80);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            *self,
            Self::READWRITE | Self::EXECUTE_READWRITE | Self::WRITECOPY | Self::EXECUTE_WRITECOPY
        )
    }
}

/// Which of two call surfaces aliasing the same operation was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSurface {
    Primary,
    Alias,
}

impl CallSurface {
    pub fn write_entry_point(&self) -> EntryPoint {
        match self {
            CallSurface::Primary => EntryPoint::FileWrite,
            CallSurface::Alias => EntryPoint::FileWriteAlias,
        }
    }

    pub fn section_entry_point(&self) -> EntryPoint {
        match self {
            CallSurface::Primary => EntryPoint::SectionCreate,
            CallSurface::Alias => EntryPoint::SectionCreateAlias,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessCreateRequest {
    pub user_token: Handle,
    pub application_name: Option<String>,
    pub command_line: Option<String>,
    pub inherit_handles: bool,
    pub creation_flags: CreationFlags,
    pub current_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessInformation {
    pub process: Handle,
    pub thread: Handle,
    pub process_id: u32,
    pub thread_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellExecuteRequest {
    pub verb: Option<String>,
    pub file: Option<String>,
    pub parameters: Option<String>,
    pub directory: Option<String>,
    pub show: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCreateRequest {
    pub desired_access: AccessMask,
    /// Name of the object as passed by the caller, possibly relative.
    pub object_name: String,
    pub allocation_size: Option<u64>,
    pub file_attributes: u32,
    pub share_access: u32,
    pub create_disposition: u32,
    pub create_options: u32,
}

/// Status plus the handle written to the caller's output parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOutcome {
    pub status: Status,
    pub handle: Handle,
}

impl HandleOutcome {
    pub fn failed(status: Status) -> Self {
        Self {
            status,
            handle: Handle::NULL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoStatus {
    pub status: Status,
    pub information: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    pub handle: Handle,
    pub data: &'a [u8],
    pub byte_offset: Option<u64>,
    pub key: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionCreateRequest {
    pub desired_access: AccessMask,
    pub object_name: Option<String>,
    pub maximum_size: Option<u64>,
    pub page_protection: PageProtection,
    pub allocation_attributes: u32,
    /// Backing file, [`Handle::NULL`] for pagefile-backed sections.
    pub file: Handle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedParameter {
    pub kind: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionCreateExRequest {
    pub section: SectionCreateRequest,
    pub extended_parameters: Vec<ExtendedParameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapViewRequest {
    pub section: Handle,
    pub process: Handle,
    pub base_address: usize,
    pub zero_bits: usize,
    pub commit_size: usize,
    pub section_offset: Option<u64>,
    pub view_size: usize,
    pub inherit_disposition: u32,
    pub allocation_type: u32,
    pub protection: PageProtection,
}

/// Status plus every in/out parameter the original may have updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapViewOutcome {
    pub status: Status,
    pub base_address: usize,
    pub view_size: usize,
    pub section_offset: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProcessRequest {
    pub process_access: AccessMask,
    pub thread_access: AccessMask,
    pub process_flags: u32,
    pub thread_flags: u32,
    pub image_path: Option<String>,
    pub command_line: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserProcessOutcome {
    pub status: Status,
    pub process: Handle,
    pub thread: Handle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetInformationRequest<'a> {
    pub handle: Handle,
    pub information: &'a [u8],
    pub class: u32,
}

/// The original implementations behind the intercepted entry points.
///
/// Interceptions receive an implementation of this trait and forward to it.
/// Implementations must be callable concurrently from any host thread.
pub trait Primitives: Send + Sync {
    fn create_process(&self, request: &ProcessCreateRequest) -> Result<ProcessInformation, OsError>;

    /// Does not return on a real host.
    fn exit_process(&self, exit_code: u32);

    fn shell_execute(&self, request: &ShellExecuteRequest) -> Result<(), OsError>;

    fn create_file(&self, request: &FileCreateRequest) -> HandleOutcome;

    fn write_file(&self, surface: CallSurface, request: &WriteRequest<'_>) -> IoStatus;

    fn create_section(&self, surface: CallSurface, request: &SectionCreateRequest) -> HandleOutcome;

    fn create_section_ex(&self, request: &SectionCreateExRequest) -> HandleOutcome;

    fn map_view_of_section(&self, request: &MapViewRequest) -> MapViewOutcome;

    fn create_user_process(&self, request: &UserProcessRequest) -> UserProcessOutcome;

    fn set_information_file(&self, request: &SetInformationRequest<'_>) -> IoStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mask_is_fixed_width_binary() {
        let mask = AccessMask::GENERIC_WRITE | AccessMask::SYNCHRONIZE;
        let rendered = mask.to_string();
        assert_eq!(rendered.len(), 32);
        assert_eq!(rendered, "01000000000100000000000000000000");
        assert_eq!(AccessMask::default().to_string(), "0".repeat(32));
    }

    #[test]
    fn suspended_flag_is_added_once() {
        let flags = CreationFlags::from_bits(0x10);
        assert!(!flags.is_suspended());
        let forced = flags.suspended();
        assert!(forced.is_suspended());
        assert_eq!(forced.bits(), 0x14);
        assert_eq!(forced.suspended(), forced);
    }

    #[test]
    fn status_sign_decides_success() {
        assert!(Status::SUCCESS.is_success());
        assert!(Status::PENDING.is_success());
        assert!(!Status::ACCESS_DENIED.is_success());
        assert_eq!(Status::ACCESS_DENIED.to_string(), "0xc0000022");
    }

    #[test]
    fn writable_protections() {
        assert!(PageProtection::READWRITE.is_writable());
        assert!(PageProtection::EXECUTE_WRITECOPY.is_writable());
        assert!(!PageProtection::READONLY.is_writable());
        assert!(!PageProtection::EXECUTE_READ.is_writable());
    }
}
