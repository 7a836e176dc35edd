use hook_common::{
    EntryPoint, Handle, OsError, Primitives,
    primitives::{
        ProcessCreateRequest, ProcessInformation, ShellExecuteRequest, UserProcessOutcome,
        UserProcessRequest,
    },
};
use tracer_core::pdk::{ConfigError, HookContext, ModuleConfig};

use crate::propagation::{ContextPropagator, Propagated};

pub mod propagation;

pub const MODULE_NAME: &str = "process-monitor";

/// Entry points redirected to this module.
pub const ENTRY_POINTS: [EntryPoint; 4] = [
    EntryPoint::ProcessCreate,
    EntryPoint::ProcessExit,
    EntryPoint::ShellLaunch,
    EntryPoint::UserProcessCreate,
];

const PERMISSION_REQUEST: &str = "Permission Request";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Verb prefixes asking for elevation, lowercase.
    elevation_verbs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elevation_verbs: vec!["runas".to_string()],
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let verbs: Vec<String> =
            config.get_list_with_default("elevation_verbs", Config::default().elevation_verbs)?;
        Ok(Self {
            elevation_verbs: verbs.iter().map(|v| v.to_ascii_lowercase()).collect(),
        })
    }
}

impl Config {
    pub fn requests_elevation(&self, verb: &str) -> bool {
        let verb = verb.to_ascii_lowercase();
        self.elevation_verbs
            .iter()
            .any(|prefix| verb.starts_with(prefix.as_str()))
    }
}

/// Process creation.
///
/// The child is always created suspended so that it can be brought under
/// tracing before it runs. Children that can't be traced are killed and the
/// call fails, children that were traced are resumed unless the caller asked
/// for a suspended process.
pub fn create_process<P: Primitives + ?Sized>(
    ctx: &HookContext,
    original: &P,
    request: &ProcessCreateRequest,
) -> Result<ProcessInformation, OsError> {
    let Some(propagator) = ContextPropagator::new(ctx) else {
        log::warn!("tracer module path unknown, children won't be traced");
        return original.create_process(request);
    };
    let reporter = ctx.reporter();
    let source = EntryPoint::ProcessCreate;

    let forced = ProcessCreateRequest {
        creation_flags: request.creation_flags.suspended(),
        ..request.clone()
    };
    let child = match original.create_process(&forced) {
        Ok(child) => child,
        Err(OsError::ELEVATION_REQUIRED) => {
            reporter.info(PERMISSION_REQUEST);
            return Err(OsError::ELEVATION_REQUIRED);
        }
        Err(err) => {
            reporter.hook_error(source, format!("failed with error code: {}", err.code()));
            return Err(err);
        }
    };

    let payload = ctx.tracer().binding().map(|b| b.propagation_payload());
    match propagator.propagate(&child, payload) {
        Ok(Propagated::Complete) => {}
        Ok(Propagated::PayloadLost(err)) => {
            reporter.hook_error(
                source,
                format!("failed to copy the tracer payload to process {}: {err}", child.process_id),
            );
        }
        Err(err) => {
            reporter.hook_error(source, err.to_string());
            return Err(OsError::DLL_INIT_FAILED);
        }
    }

    if !request.creation_flags.is_suspended() {
        if let Err(err) = ctx.launcher().resume_thread(child.thread) {
            reporter.hook_error(
                source,
                format!("failed to resume process {}: {err}", child.process_id),
            );
        }
    }

    reporter.hook(
        source,
        format!(
            "Process created successfully with PID: {}, [ApplicationName] {}, [CommandLine] {}",
            child.process_id,
            request.application_name.as_deref().unwrap_or_default(),
            request.command_line.as_deref().unwrap_or_default(),
        ),
    );
    Ok(child)
}

/// Termination of the current process. Reports before forwarding since the
/// original doesn't return.
pub fn exit_process<P: Primitives + ?Sized>(ctx: &HookContext, original: &P, exit_code: u32) {
    ctx.reporter()
        .hook(EntryPoint::ProcessExit, format!("{} Exited", ctx.self_id()));
    original.exit_process(exit_code);
}

/// Shell execution. Elevation requests of processes not allowed to elevate
/// terminate the current process and are never forwarded.
pub fn shell_execute<P: Primitives + ?Sized>(
    ctx: &HookContext,
    config: &Config,
    original: &P,
    request: &ShellExecuteRequest,
) -> Result<(), OsError> {
    let reporter = ctx.reporter();
    let verb = request.verb.as_deref().unwrap_or_default();

    if !ctx.tracer().elevation_allowed() && config.requests_elevation(verb) {
        reporter.hook_error(
            EntryPoint::ShellLaunch,
            format!("elevation request denied, verb:{verb}"),
        );
        reporter.info(PERMISSION_REQUEST);
        if let Err(err) = ctx.launcher().terminate_process(Handle::CURRENT_PROCESS, 0) {
            hook_common::log_error("Terminating process after denied elevation", err);
        }
        return Err(OsError::CANCELLED);
    }

    reporter.hook(EntryPoint::ShellLaunch, format!("verb:{verb}"));
    original.shell_execute(request)
}

/// Low level process creation, reported only.
pub fn create_user_process<P: Primitives + ?Sized>(
    ctx: &HookContext,
    original: &P,
    request: &UserProcessRequest,
) -> UserProcessOutcome {
    let outcome = original.create_user_process(request);
    ctx.reporter().hook(
        EntryPoint::UserProcessCreate,
        format!(
            "[ImagePath] {}",
            request.image_path.as_deref().unwrap_or_default()
        ),
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use hook_common::{
        PAYLOAD_ID, Status,
        primitives::CreationFlags,
        test_utils::{Call, FakeLauncher, FakePrimitives, LaunchAction, StaticResolver},
    };
    use tracer_core::{
        context::{Bootstrap, TracerContext},
        test_utils::HookHarness,
    };

    use super::*;

    const MODULE: &str = r"C:\tracer\process_tracer.dll";

    fn harness(payload: &[u8], launcher: FakeLauncher) -> HookHarness {
        let h = HookHarness::new(Some(payload), StaticResolver::default(), launcher);
        h.ctx.tracer().set_module_path(PathBuf::from(MODULE));
        h
    }

    fn notepad(flags: u32) -> ProcessCreateRequest {
        ProcessCreateRequest {
            application_name: Some(r"C:\Windows\notepad.exe".to_string()),
            command_line: Some("notepad.exe notes.txt".to_string()),
            creation_flags: CreationFlags::from_bits(flags),
            ..Default::default()
        }
    }

    fn forwarded_flags(original: &FakePrimitives) -> CreationFlags {
        match &original.calls()[0] {
            Call::CreateProcess(request) => request.creation_flags,
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn created_child_is_traced_and_resumed() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let original = FakePrimitives::default();

        let child = create_process(&h.ctx, &original, &notepad(0x10)).unwrap();
        assert_eq!(child.process_id, 5150);
        assert!(forwarded_flags(&original).is_suspended());
        assert_eq!(
            h.launcher.actions(),
            vec![
                LaunchAction::UpdateModules(child.process, PathBuf::from(MODULE)),
                LaunchAction::Deliver(child.process, PAYLOAD_ID),
                LaunchAction::Resume(child.thread),
            ]
        );
        assert_eq!(
            h.lines(),
            vec![
                "pid:31 [Hook] CreateProcessInternalW Process created successfully with PID: 5150, \
                 [ApplicationName] C:\\Windows\\notepad.exe, [CommandLine] notepad.exe notes.txt\n"
                    .to_string()
            ]
        );

        let payload = h.launcher.payload_for(child.process, &PAYLOAD_ID).unwrap();
        assert_eq!(payload, b"4242 1");
        let grandchild = TracerContext::new();
        let own = FakeLauncher::default().with_own_payload(PAYLOAD_ID, &payload);
        match grandchild.bootstrap(&own, child.process_id) {
            Bootstrap::Bound(binding) => {
                assert_eq!(binding.controller_id, 4242);
                assert!(binding.elevation_allowed);
                assert_eq!(binding.self_id, 5150);
            }
            other => panic!("child not bound: {other:?}"),
        }
    }

    #[test]
    fn elevation_policy_is_inherited() {
        let h = harness(b"4242 0", FakeLauncher::default());
        let child = create_process(&h.ctx, &FakePrimitives::default(), &notepad(0)).unwrap();
        assert_eq!(
            h.launcher.payload_for(child.process, &PAYLOAD_ID),
            Some(b"4242 0".to_vec())
        );
    }

    #[test]
    fn suspended_request_stays_suspended() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let child = create_process(&h.ctx, &FakePrimitives::default(), &notepad(0x4)).unwrap();
        assert!(
            !h.launcher
                .actions()
                .contains(&LaunchAction::Resume(child.thread))
        );
        assert!(h.launcher.payload_for(child.process, &PAYLOAD_ID).is_some());
    }

    #[test]
    fn untraceable_child_fails_the_call() {
        let h = harness(
            b"4242 1",
            FakeLauncher::default().failing_update().failing_helper(),
        );
        let err = create_process(&h.ctx, &FakePrimitives::default(), &notepad(0)).unwrap_err();
        assert_eq!(err, OsError::DLL_INIT_FAILED);

        let actions = h.launcher.actions();
        assert!(actions.contains(&LaunchAction::Terminate(Handle::from_raw(0x100), u32::MAX)));
        assert!(actions.contains(&LaunchAction::Close(Handle::from_raw(0x100))));
        assert!(actions.contains(&LaunchAction::Close(Handle::from_raw(0x104))));
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, LaunchAction::Resume(_) | LaunchAction::Deliver(..)))
        );
        assert_eq!(
            h.lines(),
            vec![
                "pid:31 [Hook Error] CreateProcessInternalW module injection into process 5150 failed\n"
                    .to_string()
            ]
        );
    }

    #[test]
    fn lost_payload_is_reported_and_child_runs() {
        let h = harness(b"4242 1", FakeLauncher::default().failing_payload());
        let child = create_process(&h.ctx, &FakePrimitives::default(), &notepad(0)).unwrap();

        assert!(h.launcher.actions().contains(&LaunchAction::Resume(child.thread)));
        let lines = h.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(
            "pid:31 [Hook Error] CreateProcessInternalW failed to copy the tracer payload to process 5150"
        ));
        assert!(lines[1].starts_with("pid:31 [Hook] CreateProcessInternalW Process created"));
    }

    #[test]
    fn elevation_required_is_a_permission_request() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let original = FakePrimitives::default().with_process(Err(OsError::ELEVATION_REQUIRED));

        let err = create_process(&h.ctx, &original, &notepad(0)).unwrap_err();
        assert_eq!(err, OsError::ELEVATION_REQUIRED);
        assert_eq!(h.lines(), vec!["pid:31 [Info] Permission Request\n".to_string()]);
        assert!(h.launcher.actions().is_empty());
    }

    #[test]
    fn creation_failure_is_passed_through() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let original = FakePrimitives::default().with_process(Err(OsError::FILE_NOT_FOUND));

        let err = create_process(&h.ctx, &original, &notepad(0)).unwrap_err();
        assert_eq!(err, OsError::FILE_NOT_FOUND);
        assert_eq!(
            h.lines(),
            vec!["pid:31 [Hook Error] CreateProcessInternalW failed with error code: 2\n".to_string()]
        );
    }

    #[test]
    fn unbound_parent_still_injects_children() {
        let h = HookHarness::new(None, StaticResolver::default(), FakeLauncher::default());
        h.ctx.tracer().set_module_path(PathBuf::from(MODULE));
        let original = FakePrimitives::default();

        let child = create_process(&h.ctx, &original, &notepad(0x10)).unwrap();
        assert!(forwarded_flags(&original).is_suspended());
        assert_eq!(
            h.launcher.actions(),
            vec![
                LaunchAction::UpdateModules(child.process, PathBuf::from(MODULE)),
                LaunchAction::Resume(child.thread),
            ]
        );
        assert!(h.launcher.payload_for(child.process, &PAYLOAD_ID).is_none());
        assert!(h.lines().is_empty());
    }

    #[test]
    fn unknown_module_path_forwards_unchanged() {
        let h = HookHarness::bound(StaticResolver::default());
        let original = FakePrimitives::default();

        create_process(&h.ctx, &original, &notepad(0x10)).unwrap();
        assert_eq!(forwarded_flags(&original), CreationFlags::from_bits(0x10));
        assert!(h.launcher.actions().is_empty());
    }

    #[test]
    fn failed_resume_is_reported() {
        let h = harness(b"4242 1", FakeLauncher::default().failing_resume());
        let child = create_process(&h.ctx, &FakePrimitives::default(), &notepad(0)).unwrap();

        assert!(h.launcher.actions().contains(&LaunchAction::Resume(child.thread)));
        let lines = h.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(
            "pid:31 [Hook Error] CreateProcessInternalW failed to resume process 5150: resuming thread"
        ));
        assert!(lines[1].starts_with("pid:31 [Hook] CreateProcessInternalW Process created"));
    }

    #[test]
    fn exit_is_reported_before_forwarding() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let original = FakePrimitives::default();

        exit_process(&h.ctx, &original, 3);
        assert_eq!(original.calls(), vec![Call::ExitProcess(3)]);
        assert_eq!(h.lines(), vec!["pid:31 [Hook] ExitProcess 31 Exited\n".to_string()]);
    }

    fn shell(verb: &str) -> ShellExecuteRequest {
        ShellExecuteRequest {
            verb: Some(verb.to_string()),
            file: Some("setup.exe".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn shell_open_is_forwarded() {
        let h = harness(b"4242 0", FakeLauncher::default());
        let original = FakePrimitives::default();

        shell_execute(&h.ctx, &Config::default(), &original, &shell("open")).unwrap();
        assert_eq!(original.calls(), vec![Call::ShellExecute(shell("open"))]);
        assert_eq!(
            h.transport.sent(),
            vec![(4242, "pid:31 [Hook] ShellExecuteExW verb:open\n".to_string())]
        );
    }

    #[test]
    fn denied_elevation_terminates() {
        let h = harness(b"4242 0", FakeLauncher::default());
        let original = FakePrimitives::default();

        let err = shell_execute(&h.ctx, &Config::default(), &original, &shell("runas")).unwrap_err();
        assert_eq!(err, OsError::CANCELLED);
        assert!(original.calls().is_empty());
        assert_eq!(
            h.lines(),
            vec![
                "pid:31 [Hook Error] ShellExecuteExW elevation request denied, verb:runas\n"
                    .to_string(),
                "pid:31 [Info] Permission Request\n".to_string(),
            ]
        );
        assert_eq!(
            h.launcher.actions(),
            vec![LaunchAction::Terminate(Handle::CURRENT_PROCESS, 0)]
        );
    }

    #[test]
    fn allowed_elevation_is_forwarded() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let original = FakePrimitives::default().with_shell(Err(OsError::CANCELLED));

        let result = shell_execute(&h.ctx, &Config::default(), &original, &shell("RunAs"));
        assert_eq!(result, Err(OsError::CANCELLED));
        assert_eq!(original.calls().len(), 1);
        assert!(h.launcher.actions().is_empty());
    }

    #[test]
    fn elevation_verbs_are_configurable() {
        let config: ModuleConfig = [("elevation_verbs", "RunAs, elevate")].into_iter().collect();
        let config = Config::try_from(&config).unwrap();
        assert!(config.requests_elevation("runasuser"));
        assert!(config.requests_elevation("ELEVATE"));
        assert!(!config.requests_elevation("open"));
        assert!(!config.requests_elevation(""));

        let h = harness(b"4242 0", FakeLauncher::default());
        let original = FakePrimitives::default();
        assert!(shell_execute(&h.ctx, &config, &original, &shell("elevate")).is_err());
        assert!(original.calls().is_empty());
    }

    #[test]
    fn user_process_outcome_is_untouched() {
        let h = harness(b"4242 1", FakeLauncher::default());
        let failed = UserProcessOutcome {
            status: Status::ACCESS_DENIED,
            process: Handle::NULL,
            thread: Handle::NULL,
        };
        let original = FakePrimitives::default().with_user_process(failed);
        let request = UserProcessRequest {
            image_path: Some(r"\??\C:\Windows\System32\cmd.exe".to_string()),
            ..Default::default()
        };

        assert_eq!(create_user_process(&h.ctx, &original, &request), failed);
        assert_eq!(
            h.lines(),
            vec![
                "pid:31 [Hook] NtCreateUserProcess [ImagePath] \\??\\C:\\Windows\\System32\\cmd.exe\n"
                    .to_string()
            ]
        );
    }
}
