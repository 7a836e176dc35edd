//! Identities of the operating-system entry points the tracer redirects.

use strum::{Display, EnumIter, IntoStaticStr};

/// An intercepted entry point.
///
/// The [`Display`] representation is the exported symbol name, which is also
/// the hook name reported on the controller channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum EntryPoint {
    /// Creates a new process image.
    #[strum(serialize = "CreateProcessInternalW")]
    ProcessCreate,
    /// Terminates the current process.
    #[strum(serialize = "ExitProcess")]
    ProcessExit,
    /// Opens or executes a path with a verb, possibly requesting elevation.
    #[strum(serialize = "ShellExecuteExW")]
    ShellLaunch,
    #[strum(serialize = "NtCreateFile")]
    FileOpenOrCreate,
    #[strum(serialize = "NtWriteFile")]
    FileWrite,
    /// Second call surface of [`EntryPoint::FileWrite`].
    #[strum(serialize = "ZwWriteFile")]
    FileWriteAlias,
    #[strum(serialize = "NtCreateSection")]
    SectionCreate,
    /// Second call surface of [`EntryPoint::SectionCreate`].
    #[strum(serialize = "ZwCreateSection")]
    SectionCreateAlias,
    #[strum(serialize = "NtCreateSectionEx")]
    SectionCreateExtended,
    #[strum(serialize = "NtMapViewOfSection")]
    SectionMapView,
    /// The unified lower-level process creation primitive.
    #[strum(serialize = "NtCreateUserProcess")]
    UserProcessCreate,
    #[strum(serialize = "NtSetInformationFile")]
    FileSetInformation,
}

impl EntryPoint {
    /// The module exporting this entry point.
    pub fn library(&self) -> &'static str {
        match self {
            EntryPoint::ProcessCreate => "kernelbase.dll",
            EntryPoint::ProcessExit => "kernel32.dll",
            EntryPoint::ShellLaunch => "shell32.dll",
            _ => "ntdll.dll",
        }
    }

    /// Exported symbol name.
    pub fn symbol(&self) -> &'static str {
        self.into()
    }

    /// Entry points sharing the same semantic operation report under their
    /// own symbol but are handled by the same interception.
    pub fn canonical(&self) -> EntryPoint {
        match self {
            EntryPoint::FileWriteAlias => EntryPoint::FileWrite,
            EntryPoint::SectionCreateAlias => EntryPoint::SectionCreate,
            other => *other,
        }
    }
}
