//! Calls into the original implementations of redirected entry points.
//!
//! The addresses of the originals are only known to the [`InterceptionSet`]
//! that installed the redirections. [`Originals`] looks them up there at
//! every call and hands them to a [`Trampolines`] implementation, which
//! performs the actual call.

use crate::{
    EntryPoint, Handle, OsError, Primitives, Status,
    hook_set::InterceptionSet,
    patch::{Address, PatchEngine},
    primitives::{
        CallSurface, FileCreateRequest, HandleOutcome, IoStatus, MapViewOutcome, MapViewRequest,
        ProcessCreateRequest, ProcessInformation, SectionCreateExRequest, SectionCreateRequest,
        SetInformationRequest, ShellExecuteRequest, UserProcessOutcome, UserProcessRequest,
        WriteRequest,
    },
};

/// Calls the routine at `original` with the signature of the entry point it
/// was returned for.
pub trait Trampolines: Send + Sync {
    fn create_process(
        &self,
        original: Address,
        request: &ProcessCreateRequest,
    ) -> Result<ProcessInformation, OsError>;

    fn exit_process(&self, original: Address, exit_code: u32);

    fn shell_execute(&self, original: Address, request: &ShellExecuteRequest)
    -> Result<(), OsError>;

    fn create_file(&self, original: Address, request: &FileCreateRequest) -> HandleOutcome;

    fn write_file(&self, original: Address, request: &WriteRequest<'_>) -> IoStatus;

    fn create_section(&self, original: Address, request: &SectionCreateRequest) -> HandleOutcome;

    fn create_section_ex(&self, original: Address, request: &SectionCreateExRequest)
    -> HandleOutcome;

    fn map_view_of_section(&self, original: Address, request: &MapViewRequest) -> MapViewOutcome;

    fn create_user_process(
        &self,
        original: Address,
        request: &UserProcessRequest,
    ) -> UserProcessOutcome;

    fn set_information_file(&self, original: Address, request: &SetInformationRequest<'_>)
    -> IoStatus;
}

/// The originals installed by an [`InterceptionSet`], as [`Primitives`].
///
/// A call reaching an entry point that isn't installed, which only happens
/// while the set is being removed, fails with [`OsError::PROC_NOT_FOUND`]
/// or [`Status::PROCEDURE_NOT_FOUND`] without calling anything.
pub struct Originals<'a, E: PatchEngine, T: ?Sized> {
    set: &'a InterceptionSet<E>,
    trampolines: &'a T,
}

impl<'a, E: PatchEngine, T: Trampolines + ?Sized> Originals<'a, E, T> {
    pub fn new(set: &'a InterceptionSet<E>, trampolines: &'a T) -> Self {
        Self { set, trampolines }
    }

    fn original(&self, entry_point: EntryPoint) -> Option<Address> {
        self.set.original(entry_point)
    }
}

impl<E: PatchEngine, T: Trampolines + ?Sized> Primitives for Originals<'_, E, T> {
    fn create_process(&self, request: &ProcessCreateRequest) -> Result<ProcessInformation, OsError> {
        let original = self
            .original(EntryPoint::ProcessCreate)
            .ok_or(OsError::PROC_NOT_FOUND)?;
        self.trampolines.create_process(original, request)
    }

    fn exit_process(&self, exit_code: u32) {
        if let Some(original) = self.original(EntryPoint::ProcessExit) {
            self.trampolines.exit_process(original, exit_code);
        }
    }

    fn shell_execute(&self, request: &ShellExecuteRequest) -> Result<(), OsError> {
        let original = self
            .original(EntryPoint::ShellLaunch)
            .ok_or(OsError::PROC_NOT_FOUND)?;
        self.trampolines.shell_execute(original, request)
    }

    fn create_file(&self, request: &FileCreateRequest) -> HandleOutcome {
        match self.original(EntryPoint::FileOpenOrCreate) {
            Some(original) => self.trampolines.create_file(original, request),
            None => HandleOutcome::failed(Status::PROCEDURE_NOT_FOUND),
        }
    }

    fn write_file(&self, surface: CallSurface, request: &WriteRequest<'_>) -> IoStatus {
        match self.original(surface.write_entry_point()) {
            Some(original) => self.trampolines.write_file(original, request),
            None => not_found(),
        }
    }

    fn create_section(&self, surface: CallSurface, request: &SectionCreateRequest) -> HandleOutcome {
        match self.original(surface.section_entry_point()) {
            Some(original) => self.trampolines.create_section(original, request),
            None => HandleOutcome::failed(Status::PROCEDURE_NOT_FOUND),
        }
    }

    fn create_section_ex(&self, request: &SectionCreateExRequest) -> HandleOutcome {
        match self.original(EntryPoint::SectionCreateExtended) {
            Some(original) => self.trampolines.create_section_ex(original, request),
            None => HandleOutcome::failed(Status::PROCEDURE_NOT_FOUND),
        }
    }

    fn map_view_of_section(&self, request: &MapViewRequest) -> MapViewOutcome {
        match self.original(EntryPoint::SectionMapView) {
            Some(original) => self.trampolines.map_view_of_section(original, request),
            None => MapViewOutcome {
                status: Status::PROCEDURE_NOT_FOUND,
                base_address: request.base_address,
                view_size: request.view_size,
                section_offset: request.section_offset,
            },
        }
    }

    fn create_user_process(&self, request: &UserProcessRequest) -> UserProcessOutcome {
        match self.original(EntryPoint::UserProcessCreate) {
            Some(original) => self.trampolines.create_user_process(original, request),
            None => UserProcessOutcome {
                status: Status::PROCEDURE_NOT_FOUND,
                process: Handle::NULL,
                thread: Handle::NULL,
            },
        }
    }

    fn set_information_file(&self, request: &SetInformationRequest<'_>) -> IoStatus {
        match self.original(EntryPoint::FileSetInformation) {
            Some(original) => self.trampolines.set_information_file(original, request),
            None => not_found(),
        }
    }
}

fn not_found() -> IoStatus {
    IoStatus {
        status: Status::PROCEDURE_NOT_FOUND,
        information: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        InterceptionSetBuilder,
        test_utils::{Call, FakeTrampolines, MockPatchEngine},
    };

    fn set() -> InterceptionSet<MockPatchEngine> {
        InterceptionSetBuilder::new("test")
            .intercept(EntryPoint::FileWrite, Address::from_raw(0x1000))
            .intercept(EntryPoint::FileWriteAlias, Address::from_raw(0x2000))
            .intercept(EntryPoint::ProcessCreate, Address::from_raw(0x3000))
            .build(MockPatchEngine::default())
    }

    fn write(handle: usize) -> WriteRequest<'static> {
        WriteRequest {
            handle: Handle::from_raw(handle),
            data: b"line\n",
            byte_offset: None,
            key: None,
        }
    }

    #[test]
    fn calls_go_to_the_installed_originals() {
        let set = set();
        set.activate().unwrap();
        let trampolines = FakeTrampolines::default();
        let originals = Originals::new(&set, &trampolines);

        originals.write_file(CallSurface::Alias, &write(0x10));
        originals.write_file(CallSurface::Primary, &write(0x20));
        originals
            .create_process(&ProcessCreateRequest::default())
            .unwrap();

        assert_eq!(
            trampolines.targets(),
            vec![
                MockPatchEngine::original_of(EntryPoint::FileWriteAlias),
                MockPatchEngine::original_of(EntryPoint::FileWrite),
                MockPatchEngine::original_of(EntryPoint::ProcessCreate),
            ]
        );
        assert_eq!(
            trampolines.calls()[0],
            Call::WriteFile {
                surface: CallSurface::Alias,
                handle: Handle::from_raw(0x10),
                len: 5,
            }
        );
    }

    #[test]
    fn removed_originals_are_not_called() {
        let set = set();
        let trampolines = FakeTrampolines::default();
        let originals = Originals::new(&set, &trampolines);

        assert_eq!(
            originals.write_file(CallSurface::Primary, &write(0x10)).status,
            Status::PROCEDURE_NOT_FOUND
        );
        assert_eq!(
            originals.create_process(&ProcessCreateRequest::default()),
            Err(OsError::PROC_NOT_FOUND)
        );
        assert_eq!(
            originals
                .create_file(&FileCreateRequest::default())
                .status,
            Status::PROCEDURE_NOT_FOUND
        );

        set.activate().unwrap();
        set.deactivate().unwrap();
        originals.exit_process(0);
        assert!(trampolines.targets().is_empty());
    }
}
