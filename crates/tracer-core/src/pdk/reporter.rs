//! The [`Transport`] trait is used by [`Reporter`] to deliver events to the
//! controller.
//!
//! [`Transport::send`] is a single blocking attempt: callers never retry.

use std::{io, sync::Arc};

use hook_common::EntryPoint;
use thiserror::Error;

use crate::{
    context::TracerContext,
    event::Event,
    guard::{HookSuppressGuard, is_in_hook},
};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("opening channel {address}")]
    Open {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("writing to channel {address}")]
    Write {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("serializing event")]
    Serialize(#[from] serde_json::Error),
}

pub trait Transport: Send + Sync {
    /// Delivers `event` to the channel of `controller_id`.
    fn send(&self, controller_id: u32, event: &Event) -> Result<(), ChannelError>;

    /// Whether the resource called `name` is the channel of `controller_id`.
    fn is_channel(&self, name: &str, controller_id: u32) -> bool;
}

/// Emits events on behalf of the interceptions.
///
/// Nothing is sent while the context is unbound or while the current thread
/// is already delivering an event. Delivery failures are logged and dropped.
#[derive(Clone)]
pub struct Reporter {
    context: Arc<TracerContext>,
    transport: Arc<dyn Transport>,
}

impl Reporter {
    pub fn new(context: Arc<TracerContext>, transport: Arc<dyn Transport>) -> Self {
        Self { context, transport }
    }

    /// Whether an event emitted now would be delivered.
    pub fn is_reporting(&self) -> bool {
        !is_in_hook() && self.context.binding().is_some()
    }

    pub fn hook(&self, source: EntryPoint, message: impl Into<String>) {
        self.emit(|pid| Event::hook(pid, source, message));
    }

    pub fn hook_error(&self, source: EntryPoint, message: impl Into<String>) {
        self.emit(|pid| Event::hook_error(pid, source, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(|pid| Event::info(pid, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(|pid| Event::error(pid, message));
    }

    /// Whether `name` designates the channel this process reports to.
    pub fn is_channel(&self, name: &str) -> bool {
        self.context
            .binding()
            .is_some_and(|b| self.transport.is_channel(name, b.controller_id))
    }

    fn emit(&self, event: impl FnOnce(u32) -> Event) {
        if is_in_hook() {
            return;
        }
        let Some(binding) = self.context.binding() else {
            return;
        };
        let event = event(binding.self_id);

        let _guard = HookSuppressGuard::new();
        if let Err(err) = self.transport.send(binding.controller_id, &event) {
            log::debug!("dropping event {:?}: {:?}", event.tag(), anyhow::Error::from(err));
        }
    }
}
