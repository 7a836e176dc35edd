use std::fmt;

use hook_common::EntryPoint;
use serde::Serialize;
use strum::{Display, EnumString};

/// Severity and origin of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
pub enum Tag {
    Info,
    Error,
    Hook,
    #[strum(serialize = "Hook Error")]
    HookError,
}

/// A report sent to the controller.
///
/// The [`Display`](fmt::Display) representation is the wire line, newline
/// terminated: `pid:<pid> [<tag>] <hook name> <message>`. Info and Error
/// events carry no hook name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    subject_pid: u32,
    tag: Tag,
    source: Option<&'static str>,
    message: String,
}

impl Event {
    pub fn hook(subject_pid: u32, source: EntryPoint, message: impl Into<String>) -> Self {
        Self::new(subject_pid, Tag::Hook, Some(source), message)
    }

    pub fn hook_error(subject_pid: u32, source: EntryPoint, message: impl Into<String>) -> Self {
        Self::new(subject_pid, Tag::HookError, Some(source), message)
    }

    pub fn info(subject_pid: u32, message: impl Into<String>) -> Self {
        Self::new(subject_pid, Tag::Info, None, message)
    }

    pub fn error(subject_pid: u32, message: impl Into<String>) -> Self {
        Self::new(subject_pid, Tag::Error, None, message)
    }

    fn new(
        subject_pid: u32,
        tag: Tag,
        source: Option<EntryPoint>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subject_pid,
            tag,
            source: source.map(|s| s.symbol()),
            message: message.into(),
        }
    }

    pub fn subject_pid(&self) -> u32 {
        self.subject_pid
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Hook name of Hook and HookError events.
    pub fn source(&self) -> Option<&'static str> {
        self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = self.subject_pid;
        let tag = self.tag;
        let message = &self.message;
        match self.source {
            Some(source) => writeln!(f, "pid:{pid} [{tag}] {source} {message}"),
            None => writeln!(f, "pid:{pid} [{tag}] {message}"),
        }
    }
}
