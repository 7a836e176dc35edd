//! Brings a freshly created, still suspended, child under tracing before it
//! runs any code of its own.

use std::path::Path;

use hook_common::{
    HELPER_ENTRY, LaunchError, PAYLOAD_ID, PayloadChannel, ProcessLauncher,
    primitives::ProcessInformation,
};
use thiserror::Error;
use tracer_core::{payload::PropagationPayload, pdk::HookContext};

/// Exit code of children killed because they couldn't be traced.
pub const UNTRACEABLE_EXIT_CODE: u32 = u32::MAX;

#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("module injection into process {process_id} failed")]
    Injection {
        process_id: u32,
        #[source]
        source: LaunchError,
    },
}

/// Outcome of a successful injection.
#[derive(Debug)]
pub enum Propagated {
    Complete,
    /// The child is traced but couldn't receive the payload, it will run
    /// unbound.
    PayloadLost(LaunchError),
}

pub struct ContextPropagator<'a> {
    launcher: &'a dyn ProcessLauncher,
    payloads: &'a dyn PayloadChannel,
    module_path: &'a Path,
}

impl<'a> ContextPropagator<'a> {
    /// `None` while the path of the tracer module is unknown.
    pub fn new(ctx: &'a HookContext) -> Option<Self> {
        Some(Self {
            launcher: ctx.launcher(),
            payloads: ctx.payloads(),
            module_path: ctx.tracer().module_path()?,
        })
    }

    /// Injects the tracer module into `child` and leaves `payload` on it.
    /// Without a payload the child is traced but runs unbound.
    ///
    /// If the module can't be injected the child is terminated and its
    /// handles closed. The child's initial thread is never resumed here.
    pub fn propagate(
        &self,
        child: &ProcessInformation,
        payload: Option<PropagationPayload>,
    ) -> Result<Propagated, PropagationError> {
        if let Err(source) = self.inject(child) {
            self.discard(child);
            return Err(PropagationError::Injection {
                process_id: child.process_id,
                source,
            });
        }

        let Some(payload) = payload else {
            return Ok(Propagated::Complete);
        };
        match self
            .payloads
            .deliver(child.process, &PAYLOAD_ID, &payload.encode())
        {
            Ok(()) => Ok(Propagated::Complete),
            Err(err) => Ok(Propagated::PayloadLost(err)),
        }
    }

    fn inject(&self, child: &ProcessInformation) -> Result<(), LaunchError> {
        match self
            .launcher
            .update_process_with_module(child.process, self.module_path)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                log::debug!("{err}, falling back to helper-assisted injection");
                self.launcher
                    .process_via_helper(child.process_id, self.module_path, HELPER_ENTRY)
            }
        }
    }

    fn discard(&self, child: &ProcessInformation) {
        if let Err(err) = self
            .launcher
            .terminate_process(child.process, UNTRACEABLE_EXIT_CODE)
        {
            hook_common::log_error("Terminating untraceable child", err);
        }
        for handle in [child.process, child.thread] {
            if let Err(err) = self.launcher.close_handle(handle) {
                hook_common::log_error("Closing child handle", err);
            }
        }
    }
}
