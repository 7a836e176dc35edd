use std::sync::Arc;

use hook_common::{
    InterceptionSet, OsError, Originals, PatchEngine, Primitives, Trampolines,
    primitives::{
        CallSurface, FileCreateRequest, HandleOutcome, IoStatus, MapViewOutcome, MapViewRequest,
        ProcessCreateRequest, ProcessInformation, SectionCreateExRequest, SectionCreateRequest,
        SetInformationRequest, ShellExecuteRequest, UserProcessOutcome, UserProcessRequest,
        WriteRequest,
    },
};
use tracer_core::pdk::HookContext;

/// The primitives as callers see them once the redirections are installed.
///
/// Every call is handed to the monitor owning the entry point, which forwards
/// to the original recorded by the interception set.
pub struct Intercepted<E: PatchEngine, T> {
    ctx: HookContext,
    interceptions: Arc<InterceptionSet<E>>,
    trampolines: T,
    process_monitor: process_monitor::Config,
    file_system_monitor: file_system_monitor::Config,
}

impl<E: PatchEngine, T: Trampolines> Intercepted<E, T> {
    pub fn new(
        ctx: HookContext,
        interceptions: Arc<InterceptionSet<E>>,
        trampolines: T,
        process_monitor: process_monitor::Config,
        file_system_monitor: file_system_monitor::Config,
    ) -> Self {
        Self {
            ctx,
            interceptions,
            trampolines,
            process_monitor,
            file_system_monitor,
        }
    }

    pub fn trampolines(&self) -> &T {
        &self.trampolines
    }

    fn originals(&self) -> Originals<'_, E, T> {
        Originals::new(&self.interceptions, &self.trampolines)
    }
}

impl<E: PatchEngine, T: Trampolines> Primitives for Intercepted<E, T> {
    fn create_process(&self, request: &ProcessCreateRequest) -> Result<ProcessInformation, OsError> {
        process_monitor::create_process(&self.ctx, &self.originals(), request)
    }

    fn exit_process(&self, exit_code: u32) {
        process_monitor::exit_process(&self.ctx, &self.originals(), exit_code)
    }

    fn shell_execute(&self, request: &ShellExecuteRequest) -> Result<(), OsError> {
        process_monitor::shell_execute(&self.ctx, &self.process_monitor, &self.originals(), request)
    }

    fn create_file(&self, request: &FileCreateRequest) -> HandleOutcome {
        file_system_monitor::create_file(&self.ctx, &self.originals(), request)
    }

    fn write_file(&self, surface: CallSurface, request: &WriteRequest<'_>) -> IoStatus {
        file_system_monitor::write_file(&self.ctx, &self.originals(), surface, request)
    }

    fn create_section(&self, surface: CallSurface, request: &SectionCreateRequest) -> HandleOutcome {
        file_system_monitor::create_section(&self.originals(), surface, request)
    }

    fn create_section_ex(&self, request: &SectionCreateExRequest) -> HandleOutcome {
        file_system_monitor::create_section_ex(&self.originals(), request)
    }

    fn map_view_of_section(&self, request: &MapViewRequest) -> MapViewOutcome {
        file_system_monitor::map_view_of_section(
            &self.ctx,
            &self.file_system_monitor,
            &self.originals(),
            request,
        )
    }

    fn create_user_process(&self, request: &UserProcessRequest) -> UserProcessOutcome {
        process_monitor::create_user_process(&self.ctx, &self.originals(), request)
    }

    fn set_information_file(&self, request: &SetInformationRequest<'_>) -> IoStatus {
        file_system_monitor::set_information_file(&self.ctx, &self.originals(), request)
    }
}
