//! The tracer as seen by the host: a [`Tracer`] is created when the module is
//! loaded and driven by the loader notifications.
//!
//! - [`Tracer::on_process_attach`] binds to the controller and installs every
//!   redirection.
//! - [`Tracer::on_thread_attach`] retries the binding from new threads.
//! - [`Tracer::on_process_detach`] removes the redirections and releases the
//!   binding.
//!
//! None of them fails from the host's perspective. Problems are reported to
//! the controller when bound and logged locally.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use hook_common::{
    Address, EntryPoint, InterceptionError, InterceptionSet, InterceptionSetBuilder, PatchEngine,
    PayloadChannel, ProcessLauncher, ResourceResolver, Trampolines,
};
use tracer_core::{
    context::{Bootstrap, TracerContext},
    pdk::{HookContext, Transport},
};

mod config;
mod intercepted;

pub use config::*;
pub use intercepted::Intercepted;

/// Name of the interception set, used for logging purposes.
const INTERCEPTION_SET: &str = "process-tracer";

/// Replacement addresses of the intercepted entry points.
#[derive(Debug, Clone, Default)]
pub struct DetourTable(HashMap<EntryPoint, Address>);

impl DetourTable {
    pub fn insert(&mut self, entry_point: EntryPoint, detour: Address) -> Option<Address> {
        self.0.insert(entry_point, detour)
    }

    pub fn get(&self, entry_point: EntryPoint) -> Option<Address> {
        self.0.get(&entry_point).copied()
    }
}

impl FromIterator<(EntryPoint, Address)> for DetourTable {
    fn from_iter<T: IntoIterator<Item = (EntryPoint, Address)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Every entry point redirected by the tracer.
pub fn entry_points() -> impl Iterator<Item = EntryPoint> {
    process_monitor::ENTRY_POINTS
        .into_iter()
        .chain(file_system_monitor::ENTRY_POINTS)
}

pub struct TracerBuilder<E, T> {
    engine: E,
    trampolines: T,
    launcher: Arc<dyn ProcessLauncher>,
    payloads: Arc<dyn PayloadChannel>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    transport: Option<Arc<dyn Transport>>,
    process_id: u32,
}

impl<E: PatchEngine, T: Trampolines> TracerBuilder<E, T> {
    /// `trampolines` call the originals at the addresses `engine` returns
    /// when installing the redirections.
    pub fn new(
        engine: E,
        trampolines: T,
        launcher: Arc<dyn ProcessLauncher>,
        payloads: Arc<dyn PayloadChannel>,
    ) -> Self {
        Self {
            engine,
            trampolines,
            launcher,
            payloads,
            resolver: None,
            transport: None,
            process_id: std::process::id(),
        }
    }

    /// Defaults to procfs on Linux, to no naming at all elsewhere.
    pub fn resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Defaults to a [`channel_logger::ChannelClient`] built from the
    /// configuration.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    pub fn build(self, config: &TracerConfig, detours: &DetourTable) -> Result<Tracer<E, T>> {
        let interceptions = entry_points()
            .try_fold(
                InterceptionSetBuilder::new(INTERCEPTION_SET),
                |builder, entry_point| {
                    let detour = detours
                        .get(entry_point)
                        .ok_or_else(|| anyhow!("no detour registered for {entry_point}"))?;
                    Ok::<_, anyhow::Error>(builder.intercept(entry_point, detour))
                },
            )?
            .build(self.engine);
        let interceptions = Arc::new(interceptions);

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(channel_logger::ChannelClient::new(config.channel()))
        });
        let resolver = self.resolver.unwrap_or_else(default_resolver);
        let ctx = HookContext::new(
            Arc::new(TracerContext::new()),
            transport,
            resolver,
            self.launcher,
            self.payloads,
        );

        Ok(Tracer {
            primitives: Intercepted::new(
                ctx.clone(),
                interceptions.clone(),
                self.trampolines,
                config.process_monitor().clone(),
                config.file_system_monitor().clone(),
            ),
            ctx,
            interceptions,
            process_id: self.process_id,
        })
    }
}

#[cfg(target_os = "linux")]
fn default_resolver() -> Arc<dyn ResourceResolver> {
    Arc::new(hook_common::resolver::ProcfsResolver)
}

#[cfg(not(target_os = "linux"))]
fn default_resolver() -> Arc<dyn ResourceResolver> {
    Arc::new(hook_common::resolver::NullResolver)
}

pub struct Tracer<E: PatchEngine, T> {
    ctx: HookContext,
    interceptions: Arc<InterceptionSet<E>>,
    primitives: Intercepted<E, T>,
    process_id: u32,
}

impl<E: PatchEngine, T: Trampolines> Tracer<E, T> {
    pub fn context(&self) -> &HookContext {
        &self.ctx
    }

    /// Where the redirected entry points land.
    pub fn primitives(&self) -> &Intercepted<E, T> {
        &self.primitives
    }

    /// Original implementation of `entry_point` while it's redirected.
    pub fn original(&self, entry_point: EntryPoint) -> Option<Address> {
        self.interceptions.original(entry_point)
    }

    pub fn is_active(&self) -> bool {
        self.interceptions.is_active()
    }

    /// Module load: binds to the controller, if this process was started by
    /// a traced parent, then installs the interceptions.
    ///
    /// The interceptions are installed even when unbound, they just forward
    /// without reporting.
    pub fn on_process_attach(&self, module_path: PathBuf, host_image_path: PathBuf) {
        let tracer = self.ctx.tracer();
        tracer.set_module_path(module_path);
        tracer.set_host_image_path(host_image_path);
        self.bootstrap();

        let reporter = self.ctx.reporter();
        reporter.info("Attaching functions...");
        match self.interceptions.activate() {
            Ok(()) => reporter.info("Attach completed successfully."),
            Err(InterceptionError::AlreadyActive(set)) => {
                log::debug!("{set}: interceptions already installed");
            }
            Err(err) => {
                let err = anyhow::Error::from(err);
                reporter.error(format!("Attach transaction failed: {err:#}"));
                log::error!("Attach transaction failed: {err:?}");
            }
        }
    }

    pub fn on_thread_attach(&self) {
        self.bootstrap();
    }

    /// Module unload: removes the interceptions and releases the binding.
    pub fn on_process_detach(&self) {
        if self.interceptions.is_active() {
            let reporter = self.ctx.reporter();
            reporter.info("Detaching functions...");
            match self.interceptions.deactivate() {
                Ok(()) => reporter.info("Detach completed successfully."),
                Err(InterceptionError::NotActive(set)) => {
                    log::debug!("{set}: interceptions already removed");
                }
                Err(err) => {
                    let err = anyhow::Error::from(err);
                    reporter.error(format!("Detach transaction failed: {err:#}"));
                    log::error!("Detach transaction failed: {err:?}");
                }
            }
        }
        self.ctx.tracer().release();
    }

    fn bootstrap(&self) {
        let tracer = self.ctx.tracer();
        if let Bootstrap::Bound(binding) = tracer.bootstrap(self.ctx.payloads(), self.process_id) {
            self.ctx.reporter().info(format!(
                "ProcessTracerCore attached to process: {}, Process Tracer PID: {}",
                binding.self_id, binding.controller_id
            ));
        }
    }
}
