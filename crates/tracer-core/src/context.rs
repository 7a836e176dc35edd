//! Process-wide tracing state.
//!
//! [`TracerContext`] starts unbound. The first successful
//! [`TracerContext::bootstrap`] binds it to a controller, and it stays bound
//! until [`TracerContext::release`] is called at unload. Interceptions only
//! report while the context is bound.

use std::{
    path::{Path, PathBuf},
    sync::{OnceLock, PoisonError, RwLock},
};

use hook_common::{PayloadChannel, launcher::PAYLOAD_ID};

use crate::payload::PropagationPayload;

/// Identity of the controller this process reports to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub controller_id: u32,
    pub self_id: u32,
    pub elevation_allowed: bool,
}

impl Binding {
    /// The payload children of this process receive.
    pub fn propagation_payload(&self) -> PropagationPayload {
        PropagationPayload {
            controller_id: self.controller_id,
            elevation_allowed: self.elevation_allowed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unbound,
    Bound(Binding),
    Released,
}

/// Result of a [`TracerContext::bootstrap`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    /// This call bound the context.
    Bound(Binding),
    /// The context was already bound by an earlier call.
    AlreadyBound(Binding),
    /// No usable payload was left for this process.
    Unbound,
    /// The context was released, it can't be bound anymore.
    Released,
}

#[derive(Debug)]
pub struct TracerContext {
    state: RwLock<State>,
    module_path: OnceLock<PathBuf>,
    host_image_path: OnceLock<PathBuf>,
}

impl Default for TracerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerContext {
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(State::Unbound),
            module_path: OnceLock::new(),
            host_image_path: OnceLock::new(),
        }
    }

    /// Binds the context to the controller named by the payload left on this
    /// process, if it isn't bound already.
    ///
    /// Safe to call concurrently: exactly one caller observes
    /// [`Bootstrap::Bound`].
    pub fn bootstrap(&self, payloads: &dyn PayloadChannel, self_id: u32) -> Bootstrap {
        if let Some(settled) = self.settled() {
            return settled;
        }

        // Logging may land in an interception reading `state`, so nothing
        // below logs while the lock is held.
        let Some(bytes) = payloads.receive(&PAYLOAD_ID) else {
            log::debug!("no propagation payload, running unmonitored");
            return Bootstrap::Unbound;
        };
        let payload = match PropagationPayload::parse(&bytes) {
            Ok(payload) => payload,
            Err(err) => {
                hook_common::log_error("Invalid propagation payload", err);
                return Bootstrap::Unbound;
            }
        };
        let binding = Binding {
            controller_id: payload.controller_id,
            self_id,
            elevation_allowed: payload.elevation_allowed,
        };

        let outcome = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match *state {
                State::Bound(current) => Bootstrap::AlreadyBound(current),
                State::Released => Bootstrap::Released,
                State::Unbound => {
                    *state = State::Bound(binding);
                    Bootstrap::Bound(binding)
                }
            }
        };

        if let Bootstrap::Bound(binding) = outcome {
            log::debug!(
                "bound to controller {} (elevation allowed: {})",
                binding.controller_id,
                binding.elevation_allowed
            );
        }
        outcome
    }

    fn settled(&self) -> Option<Bootstrap> {
        match *self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Bound(binding) => Some(Bootstrap::AlreadyBound(binding)),
            State::Released => Some(Bootstrap::Released),
            State::Unbound => None,
        }
    }

    /// Clears the binding for good. Reporting stops and later bootstraps are
    /// no-ops.
    pub fn release(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = State::Released;
    }

    pub fn binding(&self) -> Option<Binding> {
        match *self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Bound(binding) => Some(binding),
            State::Unbound | State::Released => None,
        }
    }

    /// Controller id, 0 while unbound.
    pub fn controller_id(&self) -> u32 {
        self.binding().map_or(0, |b| b.controller_id)
    }

    /// Elevation policy. Unbound processes are not restricted.
    pub fn elevation_allowed(&self) -> bool {
        self.binding().is_none_or(|b| b.elevation_allowed)
    }

    /// Records the path of the tracer module. Returns false if already set.
    pub fn set_module_path(&self, path: PathBuf) -> bool {
        self.module_path.set(path).is_ok()
    }

    pub fn module_path(&self) -> Option<&Path> {
        self.module_path.get().map(PathBuf::as_path)
    }

    /// Records the path of the host executable. Returns false if already set.
    pub fn set_host_image_path(&self, path: PathBuf) -> bool {
        self.host_image_path.set(path).is_ok()
    }

    pub fn host_image_path(&self) -> Option<&Path> {
        self.host_image_path.get().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier, mpsc},
        thread,
        time::Duration,
    };

    use hook_common::test_utils::FakeLauncher;

    use super::*;

    fn payloads(bytes: &[u8]) -> FakeLauncher {
        FakeLauncher::default().with_own_payload(PAYLOAD_ID, bytes)
    }

    #[test]
    fn bootstrap_binds_once() {
        let ctx = TracerContext::new();
        assert_eq!(ctx.controller_id(), 0);

        let expected = Binding {
            controller_id: 4242,
            self_id: 99,
            elevation_allowed: true,
        };
        assert_eq!(ctx.bootstrap(&payloads(b"4242 1"), 99), Bootstrap::Bound(expected));
        assert_eq!(
            ctx.bootstrap(&payloads(b"17 0"), 99),
            Bootstrap::AlreadyBound(expected)
        );
        assert_eq!(ctx.controller_id(), 4242);
        assert!(ctx.elevation_allowed());
    }

    #[test]
    fn missing_or_invalid_payload_stays_unbound() {
        let ctx = TracerContext::new();
        assert_eq!(ctx.bootstrap(&FakeLauncher::default(), 1), Bootstrap::Unbound);
        assert_eq!(ctx.bootstrap(&payloads(b"nope"), 1), Bootstrap::Unbound);
        assert_eq!(ctx.binding(), None);
        assert!(ctx.elevation_allowed());

        let other_key = FakeLauncher::default().with_own_payload(uuid::Uuid::nil(), b"4242 1");
        assert_eq!(ctx.bootstrap(&other_key, 1), Bootstrap::Unbound);

        assert!(matches!(
            ctx.bootstrap(&payloads(b"4242 0"), 1),
            Bootstrap::Bound(_)
        ));
        assert!(!ctx.elevation_allowed());
    }

    #[test]
    fn release_is_final() {
        let ctx = TracerContext::new();
        ctx.bootstrap(&payloads(b"4242 1"), 1);
        ctx.release();
        assert_eq!(ctx.binding(), None);
        assert_eq!(ctx.bootstrap(&payloads(b"4242 1"), 1), Bootstrap::Released);
        assert_eq!(ctx.controller_id(), 0);
    }

    #[test]
    fn concurrent_bootstrap_has_single_winner() {
        let ctx = Arc::new(TracerContext::new());
        let source = Arc::new(payloads(b"4242 1"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                let source = source.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ctx.bootstrap(source.as_ref(), 7)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, Bootstrap::Bound(_)))
            .count();
        assert_eq!(winners, 1);
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o, Bootstrap::Bound(_) | Bootstrap::AlreadyBound(_)))
        );
    }

    static LOGGED_CONTEXT: TracerContext = TracerContext::new();

    /// Stands for a log sink whose output is itself intercepted.
    struct ReenteringLogger;

    impl log::Log for ReenteringLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, _record: &log::Record) {
            let _ = LOGGED_CONTEXT.binding();
        }

        fn flush(&self) {}
    }

    static LOGGER: ReenteringLogger = ReenteringLogger;

    #[test]
    fn bootstrap_logging_can_read_the_context() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let outcomes = [
                LOGGED_CONTEXT.bootstrap(&FakeLauncher::default(), 1),
                LOGGED_CONTEXT.bootstrap(&payloads(b"4242 x"), 1),
                LOGGED_CONTEXT.bootstrap(&payloads(b"4242 0"), 1),
            ];
            tx.send(outcomes).unwrap();
        });

        let outcomes = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("bootstrap blocked while logging");
        assert_eq!(outcomes[0], Bootstrap::Unbound);
        assert_eq!(outcomes[1], Bootstrap::Unbound);
        assert!(matches!(outcomes[2], Bootstrap::Bound(_)));
        assert_eq!(LOGGED_CONTEXT.controller_id(), 4242);
    }

    #[test]
    fn paths_are_write_once() {
        let ctx = TracerContext::new();
        assert_eq!(ctx.module_path(), None);
        assert!(ctx.set_module_path(PathBuf::from("/opt/tracer/libprocess_tracer.so")));
        assert!(!ctx.set_module_path(PathBuf::from("/elsewhere.so")));
        assert_eq!(
            ctx.module_path(),
            Some(Path::new("/opt/tracer/libprocess_tracer.so"))
        );
        assert!(ctx.set_host_image_path(PathBuf::from("/usr/bin/host")));
        assert_eq!(ctx.host_image_path(), Some(Path::new("/usr/bin/host")));
    }
}
