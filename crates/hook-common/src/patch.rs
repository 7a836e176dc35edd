//! The [`PatchEngine`] capability rewrites entry points so that calls land in
//! a replacement routine, while keeping the original reachable.
//!
//! Redirections are staged inside a transaction and become visible together
//! on [`PatchEngine::commit`]: either every staged redirection is applied or
//! none is.

use std::fmt;

use thiserror::Error;

use crate::EntryPoint;

/// Address of a routine inside the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(usize);

impl Address {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("entry point {0} not found in {lib}", lib = .0.library())]
    EntryPointNotFound(EntryPoint),
    #[error("redirection of {entry_point} refused with error code: {code}")]
    Refused { entry_point: EntryPoint, code: u32 },
    #[error("{0} is not redirected")]
    NotRedirected(EntryPoint),
    #[error("a transaction is already in progress")]
    TransactionInProgress,
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("commit failed with error code: {0}")]
    CommitFailed(u32),
}

/// Transactional install/uninstall of entry point redirections.
///
/// Implementations serialize transactions themselves: a second
/// [`PatchEngine::begin_transaction`] before commit or abort fails.
pub trait PatchEngine: Send {
    fn begin_transaction(&mut self) -> Result<(), PatchError>;

    /// Stages the redirection of `entry_point` to `detour`.
    ///
    /// Returns the address through which the original implementation stays
    /// callable once the transaction is committed.
    fn attach(&mut self, entry_point: EntryPoint, detour: Address) -> Result<Address, PatchError>;

    /// Stages the removal of a redirection previously installed for `detour`.
    fn detach(&mut self, entry_point: EntryPoint, detour: Address) -> Result<(), PatchError>;

    /// Applies every staged change atomically. On failure nothing is applied.
    fn commit(&mut self) -> Result<(), PatchError>;

    /// Drops every staged change.
    fn abort(&mut self);
}
