use std::sync::Arc;

use hook_common::{PayloadChannel, ProcessLauncher, ResourceResolver};

use super::{Reporter, Transport};
use crate::context::TracerContext;

/// Entrypoint to everything an interception may need.
///
/// Interceptions receive it explicitly instead of reaching for globals.
#[derive(Clone)]
pub struct HookContext {
    tracer: Arc<TracerContext>,
    reporter: Reporter,
    resolver: Arc<dyn ResourceResolver>,
    launcher: Arc<dyn ProcessLauncher>,
    payloads: Arc<dyn PayloadChannel>,
}

impl HookContext {
    pub fn new(
        tracer: Arc<TracerContext>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ResourceResolver>,
        launcher: Arc<dyn ProcessLauncher>,
        payloads: Arc<dyn PayloadChannel>,
    ) -> Self {
        Self {
            reporter: Reporter::new(tracer.clone(), transport),
            tracer,
            resolver,
            launcher,
            payloads,
        }
    }

    pub fn tracer(&self) -> &TracerContext {
        &self.tracer
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn resolver(&self) -> &dyn ResourceResolver {
        self.resolver.as_ref()
    }

    pub fn launcher(&self) -> &dyn ProcessLauncher {
        self.launcher.as_ref()
    }

    pub fn payloads(&self) -> &dyn PayloadChannel {
        self.payloads.as_ref()
    }

    /// Identifier of the current process.
    pub fn self_id(&self) -> u32 {
        self.tracer
            .binding()
            .map_or_else(std::process::id, |b| b.self_id)
    }
}
