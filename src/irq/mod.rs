//! Interrupt controller: register/unregister per-IRQ handlers, promote
//! one line to FIQ, acknowledge.
//!
//! Every leaf driver (DMA, sound back ends, legacy USB host, xHCI)
//! attaches its completion handler here rather than touching the GIC
//! directly, so channel/endpoint teardown can always find and detach
//! its own handler without depending on any other driver's state.

use spin::Mutex;

/// Number of distinct IRQ lines the controller tracks. Sized generously
/// for the peripheral set this crate drives (DMA0..DMA15, the two USB
/// host controllers, the two sound peripherals, GPIO).
pub const MAX_IRQ_LINES: usize = 96;

pub type IrqHandler = fn(param: *mut ());

#[derive(Clone, Copy)]
struct Entry {
    handler: IrqHandler,
    param: *mut (),
}

// Safety: `Entry` is only ever touched through `InterruptController`,
// which serializes access with a spinlock; the raw `param` pointer is
// opaque to this module and owned by whichever driver registered it.
unsafe impl Send for Entry {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// The requested IRQ number is outside `0..MAX_IRQ_LINES`.
    OutOfRange,
    /// A handler is already registered for this IRQ.
    AlreadyConnected,
    /// No handler is registered for this IRQ.
    NotConnected,
}

struct Inner {
    handlers: [Option<Entry>; MAX_IRQ_LINES],
    fiq_line: Option<u32>,
}

/// The interrupt controller. One instance exists per core; the
/// embedding application constructs it during boot and passes a
/// reference to every driver that needs to attach a handler (spec §9:
/// "re-express [`Timer`, `Logger`, ...] as services constructed in
/// `main` and passed by reference through an explicit context").
pub struct InterruptController {
    inner: Mutex<Inner>,
}

impl InterruptController {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handlers: [None; MAX_IRQ_LINES],
                fiq_line: None,
            }),
        }
    }

    /// Register `handler` for `irq`. Fails if `irq` is out of range or
    /// already has a handler.
    pub fn connect(&self, irq: u32, handler: IrqHandler, param: *mut ()) -> Result<(), IrqError> {
        let idx = irq as usize;
        let mut inner = self.inner.lock();
        if idx >= MAX_IRQ_LINES {
            return Err(IrqError::OutOfRange);
        }
        if inner.handlers[idx].is_some() {
            return Err(IrqError::AlreadyConnected);
        }
        inner.handlers[idx] = Some(Entry { handler, param });
        Ok(())
    }

    /// Unregister the handler for `irq`.
    pub fn disconnect(&self, irq: u32) -> Result<(), IrqError> {
        let idx = irq as usize;
        let mut inner = self.inner.lock();
        if idx >= MAX_IRQ_LINES {
            return Err(IrqError::OutOfRange);
        }
        if inner.handlers[idx].take().is_none() {
            return Err(IrqError::NotConnected);
        }
        Ok(())
    }

    /// Whether `irq` currently has a registered handler.
    pub fn is_connected(&self, irq: u32) -> bool {
        (irq as usize) < MAX_IRQ_LINES
            && self.inner.lock().handlers[irq as usize].is_some()
    }

    /// Promote `irq` to FIQ level: only one line may be FIQ at a time,
    /// matching the hardware's single FIQ source select.
    pub fn enable_fiq(&self, irq: u32) -> Result<(), IrqError> {
        let mut inner = self.inner.lock();
        inner.fiq_line = Some(irq);
        Ok(())
    }

    pub fn disable_fiq(&self) {
        self.inner.lock().fiq_line = None;
    }

    /// Dispatch to the registered handler for `irq`. Called from the
    /// exception vector's IRQ entry (an excluded external collaborator
    /// per spec §1) once it has identified which line fired.
    pub fn dispatch(&self, irq: u32) {
        let entry = {
            let inner = self.inner.lock();
            (irq as usize) < MAX_IRQ_LINES && inner.handlers[irq as usize].is_some()
        };
        if !entry {
            return;
        }
        // Re-acquire and copy the entry out before releasing the lock so
        // the handler itself may call back into `connect`/`disconnect`
        // for a *different* IRQ without deadlocking.
        let entry = self.inner.lock().handlers[irq as usize];
        if let Some(Entry { handler, param }) = entry {
            handler(param);
        }
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static CALLS: AtomicU32 = AtomicU32::new(0);

    fn handler(_param: *mut ()) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn connect_dispatch_disconnect_roundtrip() {
        let ic = InterruptController::new();
        CALLS.store(0, Ordering::SeqCst);

        ic.connect(5, handler, core::ptr::null_mut()).unwrap();
        assert!(ic.is_connected(5));

        ic.dispatch(5);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        ic.disconnect(5).unwrap();
        assert!(!ic.is_connected(5));
    }

    #[test]
    fn double_connect_fails() {
        let ic = InterruptController::new();
        ic.connect(1, handler, core::ptr::null_mut()).unwrap();
        assert_eq!(
            ic.connect(1, handler, core::ptr::null_mut()),
            Err(IrqError::AlreadyConnected)
        );
    }

    #[test]
    fn out_of_range_is_rejected() {
        let ic = InterruptController::new();
        assert_eq!(
            ic.connect(MAX_IRQ_LINES as u32, handler, core::ptr::null_mut()),
            Err(IrqError::OutOfRange)
        );
    }
}
