//! Minimal cooperative-scheduler hook.
//!
//! This crate does not implement a scheduler (spec §1 non-goals: no
//! preemptive multitasking, no process isolation); it only needs a way
//! for its busy-wait loops to cooperate with one if the embedding
//! application has one. With the `no-busy-wait` feature enabled,
//! [`crate::time::poll_until`] calls [`yield_now`] between polls
//! instead of spinning; the application installs its task switch via
//! [`set_yield_hook`] during startup.

use spin::Mutex;

static YIELD_HOOK: Mutex<Option<fn()>> = Mutex::new(None);

/// Install the function the scheduler calls to switch to another
/// cooperative task. Must be called before any code relies on
/// cooperative suspension points yielding.
pub fn set_yield_hook(hook: fn()) {
    *YIELD_HOOK.lock() = Some(hook);
}

/// Yield to another cooperative task if a scheduler is installed;
/// otherwise this is a no-op (equivalent to spinning once).
pub fn yield_now() {
    let hook = *YIELD_HOOK.lock();
    match hook {
        Some(f) => f(),
        None => core::hint::spin_loop(),
    }
}
