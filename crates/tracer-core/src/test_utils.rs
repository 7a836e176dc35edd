//! Test doubles for the controller channel.

use std::{
    io,
    sync::{Arc, Mutex},
};

use hook_common::{
    PAYLOAD_ID, ResourceResolver,
    test_utils::{FakeLauncher, StaticResolver},
};

use crate::{
    context::TracerContext,
    event::Event,
    pdk::{ChannelError, HookContext, Transport},
};

/// Process id the harness binds its context with.
pub const SELF_ID: u32 = 31;

type SendHook = Arc<dyn Fn() + Send + Sync>;

/// Records every delivered wire line along with its controller id.
pub struct RecordingTransport {
    channel_name: String,
    fail: bool,
    sent: Mutex<Vec<(u32, String)>>,
    on_send: Mutex<Option<SendHook>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new("ProcessTracerPipe")
    }
}

impl RecordingTransport {
    /// Channels are named `<channel_name>:<controller id>`.
    pub fn new(channel_name: &str) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            fail: false,
            sent: Mutex::new(Vec::new()),
            on_send: Mutex::new(None),
        }
    }

    /// Every delivery fails as if the controller were unreachable.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Runs `hook` on the sending thread at every delivery attempt, before
    /// the line is recorded.
    pub fn on_send(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn sent(&self) -> Vec<(u32, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, line)| line).collect()
    }

    pub fn address(&self, controller_id: u32) -> String {
        format!("{}:{controller_id}", self.channel_name)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, controller_id: u32, event: &Event) -> Result<(), ChannelError> {
        let hook = self.on_send.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail {
            return Err(ChannelError::Open {
                address: self.address(controller_id),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((controller_id, event.to_string()));
        Ok(())
    }

    fn is_channel(&self, name: &str, controller_id: u32) -> bool {
        name.strip_suffix(&self.address(controller_id))
            .is_some_and(|rest| rest.is_empty() || rest.ends_with(['\\', '/']))
    }
}

/// A [`HookContext`] wired to in-memory collaborators.
pub struct HookHarness {
    pub ctx: HookContext,
    pub transport: Arc<RecordingTransport>,
    pub launcher: Arc<FakeLauncher>,
}

impl HookHarness {
    /// Context bound from `payload` (pass `None` to stay unbound).
    pub fn new(payload: Option<&[u8]>, resolver: StaticResolver, launcher: FakeLauncher) -> Self {
        let launcher = Arc::new(match payload {
            Some(bytes) => launcher.with_own_payload(PAYLOAD_ID, bytes),
            None => launcher,
        });
        let transport = Arc::new(RecordingTransport::default());
        let tracer = Arc::new(TracerContext::new());
        tracer.bootstrap(launcher.as_ref(), SELF_ID);
        let resolver: Arc<dyn ResourceResolver> = Arc::new(resolver);
        let ctx = HookContext::new(
            tracer,
            transport.clone(),
            resolver,
            launcher.clone(),
            launcher.clone(),
        );
        Self {
            ctx,
            transport,
            launcher,
        }
    }

    /// Bound to controller 4242 with elevation disallowed.
    pub fn bound(resolver: StaticResolver) -> Self {
        Self::new(Some(b"4242 0"), resolver, FakeLauncher::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.transport.lines()
    }
}
