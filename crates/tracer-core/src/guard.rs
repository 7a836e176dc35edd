//! Thread-local re-entrancy guard.
//!
//! While a thread is delivering an event, the channel's own open and write
//! calls land in the interceptions again. Those nested invocations must
//! forward without reporting.

use std::cell::Cell;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Check if the current thread is already inside event delivery.
pub fn is_in_hook() -> bool {
    IN_HOOK.with(|h| h.get())
}

/// RAII guard that suppresses reporting on the current thread for its lifetime.
/// Nested guards restore the previous state on drop.
pub struct HookSuppressGuard(bool);

impl HookSuppressGuard {
    pub fn new() -> Self {
        let was = IN_HOOK.with(|h| h.replace(true));
        Self(was)
    }
}

impl Default for HookSuppressGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HookSuppressGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|h| h.set(self.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_restore_state() {
        assert!(!is_in_hook());
        {
            let _outer = HookSuppressGuard::new();
            assert!(is_in_hook());
            {
                let _inner = HookSuppressGuard::new();
                assert!(is_in_hook());
            }
            assert!(is_in_hook());
        }
        assert!(!is_in_hook());
    }

    #[test]
    fn guard_is_per_thread() {
        let _guard = HookSuppressGuard::new();
        let other = std::thread::spawn(is_in_hook).join().unwrap();
        assert!(!other);
        assert!(is_in_hook());
    }
}
