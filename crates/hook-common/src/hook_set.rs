//! [`InterceptionSet`] is the group of entry points a module redirects:
//! - it installs every redirection in one [`PatchEngine`] transaction
//! - it owns the table of original entry points while installed
//! - it removes every redirection again in one transaction
//!
use std::{
    fmt,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use thiserror::Error;

use crate::{
    EntryPoint,
    patch::{Address, PatchEngine, PatchError},
};

#[derive(Error, Debug)]
pub enum InterceptionError {
    #[error("{set}: attach transaction failed")]
    Attach {
        set: &'static str,
        #[source]
        source: PatchError,
    },
    #[error("{set}: detach transaction failed")]
    Detach {
        set: &'static str,
        #[source]
        source: PatchError,
    },
    #[error("{0}: interceptions already installed")]
    AlreadyActive(&'static str),
    #[error("{0}: interceptions not installed")]
    NotActive(&'static str),
}

/// Pairing of an entry point with its replacement and, while installed, the
/// address of the original implementation.
pub struct InterceptionRecord {
    entry_point: EntryPoint,
    original: AtomicUsize,
    detour: Address,
}

impl InterceptionRecord {
    fn new(entry_point: EntryPoint, detour: Address) -> Self {
        Self {
            entry_point,
            original: AtomicUsize::new(0),
            detour,
        }
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.entry_point
    }

    pub fn detour(&self) -> Address {
        self.detour
    }

    /// Original implementation, `None` when not installed.
    pub fn original(&self) -> Option<Address> {
        match self.original.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Address::from_raw(raw)),
        }
    }
}

impl fmt::Display for InterceptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{} -> {}",
            self.entry_point.library(),
            self.entry_point,
            self.detour
        )
    }
}

pub struct InterceptionSetBuilder {
    /// set name, used for logging purposes
    name: &'static str,
    records: Vec<InterceptionRecord>,
}

impl InterceptionSetBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: Vec::new(),
        }
    }

    /// Registers `detour` as the replacement of `entry_point`. A second
    /// registration of the same entry point replaces the first.
    pub fn intercept(mut self, entry_point: EntryPoint, detour: Address) -> Self {
        self.records.retain(|r| r.entry_point != entry_point);
        self.records
            .push(InterceptionRecord::new(entry_point, detour));
        self
    }

    pub fn build<E: PatchEngine>(self, engine: E) -> InterceptionSet<E> {
        InterceptionSet {
            name: self.name,
            engine: Mutex::new(engine),
            records: self.records,
            active: AtomicBool::new(false),
        }
    }
}

pub struct InterceptionSet<E: PatchEngine> {
    name: &'static str,
    /// Only one activation or deactivation may be in flight.
    engine: Mutex<E>,
    records: Vec<InterceptionRecord>,
    active: AtomicBool,
}

impl<E: PatchEngine> InterceptionSet<E> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn records(&self) -> impl Iterator<Item = &InterceptionRecord> {
        self.records.iter()
    }

    /// Original implementation of `entry_point`, if it's installed.
    pub fn original(&self, entry_point: EntryPoint) -> Option<Address> {
        self.records
            .iter()
            .find(|r| r.entry_point == entry_point)
            .and_then(InterceptionRecord::original)
    }

    /// Installs every registered redirection, all or nothing.
    pub fn activate(&self) -> Result<(), InterceptionError> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_active() {
            return Err(InterceptionError::AlreadyActive(self.name));
        }
        let attach_err = |source| InterceptionError::Attach {
            set: self.name,
            source,
        };

        engine.begin_transaction().map_err(attach_err)?;
        let mut originals = Vec::with_capacity(self.records.len());
        for record in &self.records {
            match engine.attach(record.entry_point, record.detour) {
                Ok(original) => originals.push(original),
                Err(err) => {
                    engine.abort();
                    return Err(attach_err(err));
                }
            }
        }
        engine.commit().map_err(attach_err)?;

        for (record, original) in self.records.iter().zip(originals) {
            log::debug!("{}: installed {record}", self.name);
            record.original.store(original.as_raw(), Ordering::Release);
        }
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Removes every installed redirection, all or nothing.
    ///
    /// Calling this on a set that isn't installed returns
    /// [`InterceptionError::NotActive`] and touches nothing.
    pub fn deactivate(&self) -> Result<(), InterceptionError> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_active() {
            return Err(InterceptionError::NotActive(self.name));
        }
        let detach_err = |source| InterceptionError::Detach {
            set: self.name,
            source,
        };

        engine.begin_transaction().map_err(detach_err)?;
        for record in &self.records {
            if let Err(err) = engine.detach(record.entry_point, record.detour) {
                engine.abort();
                return Err(detach_err(err));
            }
        }
        engine.commit().map_err(detach_err)?;

        for record in &self.records {
            record.original.store(0, Ordering::Release);
        }
        self.active.store(false, Ordering::Release);
        Ok(())
    }
}

impl<E: PatchEngine> Drop for InterceptionSet<E> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(err) = self.deactivate() {
                crate::log_error("Removing interceptions on drop", err);
            }
        }
    }
}
