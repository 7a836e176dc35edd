//! In-memory stand-ins for the operating-system facing capabilities.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use uuid::Uuid;

use crate::{
    EntryPoint, Handle, OsError, Status,
    launcher::{LaunchError, PayloadChannel, ProcessLauncher},
    patch::{Address, PatchEngine, PatchError},
    primitives::*,
    resolver::ResourceResolver,
    trampoline::Trampolines,
};

/// Shared view of the redirections a [`MockPatchEngine`] has committed.
#[derive(Debug, Clone, Default)]
pub struct RedirectionTable(Arc<Mutex<HashMap<EntryPoint, Address>>>);

impl RedirectionTable {
    pub fn redirection(&self, entry_point: EntryPoint) -> Option<Address> {
        self.0.lock().unwrap().get(&entry_point).copied()
    }

    pub fn redirected_count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

enum Staged {
    Attach(EntryPoint, Address),
    Detach(EntryPoint),
}

/// A call-redirection table with injectable failures.
#[derive(Default)]
pub struct MockPatchEngine {
    table: RedirectionTable,
    staged: Option<Vec<Staged>>,
    failing_attach: HashSet<EntryPoint>,
    failing_detach: HashSet<EntryPoint>,
    failing_commit: Option<u32>,
}

impl MockPatchEngine {
    /// Staging a redirection of `entry_point` is refused.
    pub fn fail_attach(mut self, entry_point: EntryPoint) -> Self {
        self.failing_attach.insert(entry_point);
        self
    }

    /// Staging the removal of `entry_point` is refused, installing it works.
    pub fn fail_detach(mut self, entry_point: EntryPoint) -> Self {
        self.failing_detach.insert(entry_point);
        self
    }

    /// Every commit fails with `code`.
    pub fn fail_commit(mut self, code: u32) -> Self {
        self.failing_commit = Some(code);
        self
    }

    pub fn table(&self) -> RedirectionTable {
        self.table.clone()
    }

    /// Address handed out as the original implementation of `entry_point`.
    pub fn original_of(entry_point: EntryPoint) -> Address {
        Address::from_raw(0x7ff0_0000 + (entry_point as usize + 1) * 0x100)
    }

    fn staged(&mut self) -> Result<&mut Vec<Staged>, PatchError> {
        self.staged.as_mut().ok_or(PatchError::NoTransaction)
    }
}

impl PatchEngine for MockPatchEngine {
    fn begin_transaction(&mut self) -> Result<(), PatchError> {
        if self.staged.is_some() {
            return Err(PatchError::TransactionInProgress);
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn attach(&mut self, entry_point: EntryPoint, detour: Address) -> Result<Address, PatchError> {
        if self.failing_attach.contains(&entry_point) {
            self.staged()?;
            return Err(PatchError::Refused {
                entry_point,
                code: 87,
            });
        }
        self.staged()?.push(Staged::Attach(entry_point, detour));
        Ok(Self::original_of(entry_point))
    }

    fn detach(&mut self, entry_point: EntryPoint, detour: Address) -> Result<(), PatchError> {
        if self.table.redirection(entry_point) != Some(detour) {
            return Err(PatchError::NotRedirected(entry_point));
        }
        if self.failing_detach.contains(&entry_point) {
            self.staged()?;
            return Err(PatchError::Refused {
                entry_point,
                code: 5,
            });
        }
        self.staged()?.push(Staged::Detach(entry_point));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PatchError> {
        let staged = self.staged.take().ok_or(PatchError::NoTransaction)?;
        if let Some(code) = self.failing_commit {
            return Err(PatchError::CommitFailed(code));
        }
        let mut table = self.table.0.lock().unwrap();
        for change in staged {
            match change {
                Staged::Attach(entry_point, detour) => {
                    table.insert(entry_point, detour);
                }
                Staged::Detach(entry_point) => {
                    table.remove(&entry_point);
                }
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.staged = None;
    }
}

/// A call received by [`FakePrimitives`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateProcess(ProcessCreateRequest),
    ExitProcess(u32),
    ShellExecute(ShellExecuteRequest),
    CreateFile(FileCreateRequest),
    WriteFile {
        surface: CallSurface,
        handle: Handle,
        len: usize,
    },
    CreateSection(CallSurface, SectionCreateRequest),
    CreateSectionEx(SectionCreateExRequest),
    MapViewOfSection(MapViewRequest),
    CreateUserProcess(UserProcessRequest),
    SetInformationFile { handle: Handle, class: u32 },
}

/// Scripted originals recording every call they receive.
pub struct FakePrimitives {
    calls: Mutex<Vec<Call>>,
    process: Result<ProcessInformation, OsError>,
    shell: Result<(), OsError>,
    file: HandleOutcome,
    write_status: Status,
    section: HandleOutcome,
    view: MapViewOutcome,
    user_process: UserProcessOutcome,
    set_information_status: Status,
}

impl Default for FakePrimitives {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            process: Ok(ProcessInformation {
                process: Handle::from_raw(0x100),
                thread: Handle::from_raw(0x104),
                process_id: 5150,
                thread_id: 5151,
            }),
            shell: Ok(()),
            file: HandleOutcome {
                status: Status::SUCCESS,
                handle: Handle::from_raw(0x200),
            },
            write_status: Status::SUCCESS,
            section: HandleOutcome {
                status: Status::SUCCESS,
                handle: Handle::from_raw(0x300),
            },
            view: MapViewOutcome {
                status: Status::SUCCESS,
                base_address: 0x7f00_0000,
                view_size: 0x1000,
                section_offset: None,
            },
            user_process: UserProcessOutcome {
                status: Status::SUCCESS,
                process: Handle::from_raw(0x400),
                thread: Handle::from_raw(0x404),
            },
            set_information_status: Status::SUCCESS,
        }
    }
}

impl FakePrimitives {
    pub fn with_process(mut self, result: Result<ProcessInformation, OsError>) -> Self {
        self.process = result;
        self
    }

    pub fn with_shell(mut self, result: Result<(), OsError>) -> Self {
        self.shell = result;
        self
    }

    pub fn with_file(mut self, outcome: HandleOutcome) -> Self {
        self.file = outcome;
        self
    }

    pub fn with_write_status(mut self, status: Status) -> Self {
        self.write_status = status;
        self
    }

    pub fn with_section(mut self, outcome: HandleOutcome) -> Self {
        self.section = outcome;
        self
    }

    pub fn with_view(mut self, outcome: MapViewOutcome) -> Self {
        self.view = outcome;
        self
    }

    pub fn with_user_process(mut self, outcome: UserProcessOutcome) -> Self {
        self.user_process = outcome;
        self
    }

    pub fn with_set_information_status(mut self, status: Status) -> Self {
        self.set_information_status = status;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Primitives for FakePrimitives {
    fn create_process(&self, request: &ProcessCreateRequest) -> Result<ProcessInformation, OsError> {
        self.record(Call::CreateProcess(request.clone()));
        self.process
    }

    fn exit_process(&self, exit_code: u32) {
        self.record(Call::ExitProcess(exit_code));
    }

    fn shell_execute(&self, request: &ShellExecuteRequest) -> Result<(), OsError> {
        self.record(Call::ShellExecute(request.clone()));
        self.shell
    }

    fn create_file(&self, request: &FileCreateRequest) -> HandleOutcome {
        self.record(Call::CreateFile(request.clone()));
        self.file
    }

    fn write_file(&self, surface: CallSurface, request: &WriteRequest<'_>) -> IoStatus {
        self.record(Call::WriteFile {
            surface,
            handle: request.handle,
            len: request.data.len(),
        });
        IoStatus {
            status: self.write_status,
            information: if self.write_status.is_success() {
                request.data.len()
            } else {
                0
            },
        }
    }

    fn create_section(&self, surface: CallSurface, request: &SectionCreateRequest) -> HandleOutcome {
        self.record(Call::CreateSection(surface, request.clone()));
        self.section
    }

    fn create_section_ex(&self, request: &SectionCreateExRequest) -> HandleOutcome {
        self.record(Call::CreateSectionEx(request.clone()));
        self.section
    }

    fn map_view_of_section(&self, request: &MapViewRequest) -> MapViewOutcome {
        self.record(Call::MapViewOfSection(*request));
        self.view
    }

    fn create_user_process(&self, request: &UserProcessRequest) -> UserProcessOutcome {
        self.record(Call::CreateUserProcess(request.clone()));
        self.user_process
    }

    fn set_information_file(&self, request: &SetInformationRequest<'_>) -> IoStatus {
        self.record(Call::SetInformationFile {
            handle: request.handle,
            class: request.class,
        });
        IoStatus {
            status: self.set_information_status,
            information: 0,
        }
    }
}

/// Stands in for the calls through original entry points: records the address
/// of every call and answers like the wrapped [`FakePrimitives`].
///
/// The call surface is recovered from the addresses [`MockPatchEngine`] hands
/// out.
#[derive(Default)]
pub struct FakeTrampolines {
    primitives: FakePrimitives,
    targets: Mutex<Vec<Address>>,
}

impl FakeTrampolines {
    pub fn new(primitives: FakePrimitives) -> Self {
        Self {
            primitives,
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Addresses called through, in order.
    pub fn targets(&self) -> Vec<Address> {
        self.targets.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.primitives.calls()
    }

    fn enter(&self, original: Address) {
        self.targets.lock().unwrap().push(original);
    }

    fn surface(original: Address, alias: EntryPoint) -> CallSurface {
        if original == MockPatchEngine::original_of(alias) {
            CallSurface::Alias
        } else {
            CallSurface::Primary
        }
    }
}

impl Trampolines for FakeTrampolines {
    fn create_process(
        &self,
        original: Address,
        request: &ProcessCreateRequest,
    ) -> Result<ProcessInformation, OsError> {
        self.enter(original);
        self.primitives.create_process(request)
    }

    fn exit_process(&self, original: Address, exit_code: u32) {
        self.enter(original);
        self.primitives.exit_process(exit_code)
    }

    fn shell_execute(&self, original: Address, request: &ShellExecuteRequest) -> Result<(), OsError> {
        self.enter(original);
        self.primitives.shell_execute(request)
    }

    fn create_file(&self, original: Address, request: &FileCreateRequest) -> HandleOutcome {
        self.enter(original);
        self.primitives.create_file(request)
    }

    fn write_file(&self, original: Address, request: &WriteRequest<'_>) -> IoStatus {
        self.enter(original);
        let surface = Self::surface(original, EntryPoint::FileWriteAlias);
        self.primitives.write_file(surface, request)
    }

    fn create_section(&self, original: Address, request: &SectionCreateRequest) -> HandleOutcome {
        self.enter(original);
        let surface = Self::surface(original, EntryPoint::SectionCreateAlias);
        self.primitives.create_section(surface, request)
    }

    fn create_section_ex(&self, original: Address, request: &SectionCreateExRequest) -> HandleOutcome {
        self.enter(original);
        self.primitives.create_section_ex(request)
    }

    fn map_view_of_section(&self, original: Address, request: &MapViewRequest) -> MapViewOutcome {
        self.enter(original);
        self.primitives.map_view_of_section(request)
    }

    fn create_user_process(&self, original: Address, request: &UserProcessRequest) -> UserProcessOutcome {
        self.enter(original);
        self.primitives.create_user_process(request)
    }

    fn set_information_file(&self, original: Address, request: &SetInformationRequest<'_>) -> IoStatus {
        self.enter(original);
        self.primitives.set_information_file(request)
    }
}

/// An action performed through [`FakeLauncher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchAction {
    UpdateModules(Handle, PathBuf),
    ViaHelper(u32, PathBuf, String),
    Resume(Handle),
    Terminate(Handle, u32),
    Close(Handle),
    Deliver(Handle, Uuid),
}

/// Records injections and process control. Doubles as the payload channel:
/// delivered payloads are kept per child, and [`PayloadChannel::receive`]
/// returns the payload configured for the current process.
#[derive(Default)]
pub struct FakeLauncher {
    fail_update: bool,
    fail_helper: bool,
    fail_payload: bool,
    fail_resume: bool,
    own_payload: Option<(Uuid, Vec<u8>)>,
    actions: Mutex<Vec<LaunchAction>>,
    delivered: Mutex<HashMap<(Handle, Uuid), Vec<u8>>>,
}

impl FakeLauncher {
    pub fn failing_update(mut self) -> Self {
        self.fail_update = true;
        self
    }

    pub fn failing_helper(mut self) -> Self {
        self.fail_helper = true;
        self
    }

    pub fn failing_payload(mut self) -> Self {
        self.fail_payload = true;
        self
    }

    pub fn failing_resume(mut self) -> Self {
        self.fail_resume = true;
        self
    }

    /// Payload left on the current process by its parent.
    pub fn with_own_payload(mut self, key: Uuid, bytes: &[u8]) -> Self {
        self.own_payload = Some((key, bytes.to_vec()));
        self
    }

    pub fn actions(&self) -> Vec<LaunchAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn payload_for(&self, child: Handle, key: &Uuid) -> Option<Vec<u8>> {
        self.delivered.lock().unwrap().get(&(child, *key)).cloned()
    }

    fn record(&self, action: LaunchAction) {
        self.actions.lock().unwrap().push(action);
    }
}

impl ProcessLauncher for FakeLauncher {
    fn update_process_with_module(&self, process: Handle, module_path: &Path) -> Result<(), LaunchError> {
        self.record(LaunchAction::UpdateModules(process, module_path.to_path_buf()));
        if self.fail_update {
            return Err(LaunchError::UpdateModules { process });
        }
        Ok(())
    }

    fn process_via_helper(
        &self,
        process_id: u32,
        module_path: &Path,
        helper_entry: &str,
    ) -> Result<(), LaunchError> {
        self.record(LaunchAction::ViaHelper(
            process_id,
            module_path.to_path_buf(),
            helper_entry.to_string(),
        ));
        if self.fail_helper {
            return Err(LaunchError::Helper { process_id });
        }
        Ok(())
    }

    fn resume_thread(&self, thread: Handle) -> Result<(), LaunchError> {
        self.record(LaunchAction::Resume(thread));
        if self.fail_resume {
            return Err(LaunchError::Resume { thread, code: 6 });
        }
        Ok(())
    }

    fn terminate_process(&self, process: Handle, exit_code: u32) -> Result<(), LaunchError> {
        self.record(LaunchAction::Terminate(process, exit_code));
        Ok(())
    }

    fn close_handle(&self, handle: Handle) -> Result<(), LaunchError> {
        self.record(LaunchAction::Close(handle));
        Ok(())
    }
}

impl PayloadChannel for FakeLauncher {
    fn deliver(&self, child: Handle, key: &Uuid, bytes: &[u8]) -> Result<(), LaunchError> {
        self.record(LaunchAction::Deliver(child, *key));
        if self.fail_payload {
            return Err(LaunchError::PayloadCopy {
                process: child,
                key: *key,
                code: 5,
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .insert((child, *key), bytes.to_vec());
        Ok(())
    }

    fn receive(&self, key: &Uuid) -> Option<Vec<u8>> {
        self.own_payload
            .as_ref()
            .filter(|(own_key, _)| own_key == key)
            .map(|(_, bytes)| bytes.clone())
    }
}

/// Fixed handle and mapped view names.
#[derive(Default)]
pub struct StaticResolver {
    names: HashMap<Handle, String>,
    mapped: HashMap<usize, String>,
}

impl StaticResolver {
    pub fn with_name(mut self, handle: Handle, name: &str) -> Self {
        self.names.insert(handle, name.to_string());
        self
    }

    pub fn with_mapped_file(mut self, base_address: usize, name: &str) -> Self {
        self.mapped.insert(base_address, name.to_string());
        self
    }
}

impl ResourceResolver for StaticResolver {
    fn object_name(&self, handle: Handle) -> Option<String> {
        self.names.get(&handle).cloned()
    }

    fn mapped_file_name(&self, _process: Handle, base_address: usize) -> Option<String> {
        self.mapped.get(&base_address).cloned()
    }
}
