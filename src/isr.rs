//! # Interrupt entry points
//!
//! The library keeps no hidden global state: the one process-wide install
//! point lives here, set at `connect()` and cleared at `disconnect()`. The
//! board wires its interrupt vectors to the four free functions below;
//! while no stack is connected they are no-ops.
//!
//! Safety model: the connected stack registers a type-erased pointer to
//! itself plus monomorphized trampolines. The stack must not move or drop
//! while installed: `disconnect()` uninstalls before returning, and
//! [`Stack`](crate::Stack) uninstalls in its `Drop`. The four handlers and
//! the application must not preempt each other inside one handler call;
//! boards wire them at mutually non-preempting interrupt priorities, the
//! same discipline the radio/DMA/context-switch triple already requires.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::hal::RadioId;

pub(crate) struct Vtable {
    pub radio_irq: unsafe fn(*mut (), RadioId),
    pub spi_complete: unsafe fn(*mut (), RadioId),
    pub sync_timer: unsafe fn(*mut ()),
    pub callbacks: unsafe fn(*mut ()),
}

struct VtableCell(core::cell::UnsafeCell<Option<&'static Vtable>>);

// Written only while CTX is null, read only while CTX is set.
unsafe impl Sync for VtableCell {}

static CTX: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
static VTABLE: VtableCell = VtableCell(core::cell::UnsafeCell::new(None));

/// Register the connected stack. Called from `connect()`.
///
/// # Safety
/// `ctx` must stay valid and unmoved until [`uninstall`] runs.
pub(crate) unsafe fn install(ctx: *mut (), vtable: &'static Vtable) {
    unsafe { *VTABLE.0.get() = Some(vtable) };
    CTX.store(ctx, Ordering::Release);
}

/// Unregister the stack. Called from `disconnect()` and `Drop`.
pub(crate) fn uninstall() {
    CTX.store(ptr::null_mut(), Ordering::Release);
}

fn dispatch(f: impl FnOnce(*mut (), &'static Vtable)) {
    let ctx = CTX.load(Ordering::Acquire);
    if ctx.is_null() {
        return;
    }
    if let Some(vtable) = unsafe { *VTABLE.0.get() } {
        f(ctx, vtable);
    }
}

/// Radio interrupt line service routine.
pub fn radio_irq_handler(radio: RadioId) {
    dispatch(|ctx, vt| unsafe { (vt.radio_irq)(ctx, radio) });
}

/// SPI DMA transfer-complete service routine.
pub fn spi_complete_handler(radio: RadioId) {
    dispatch(|ctx, vt| unsafe { (vt.spi_complete)(ctx, radio) });
}

/// Dual-radio synchronization timer service routine.
pub fn synchronization_timer_handler() {
    dispatch(|ctx, vt| unsafe { (vt.sync_timer)(ctx) });
}

/// Low-priority context-switch service routine: drains the callback queue
/// into the application callbacks.
pub fn callbacks_processing_handler() {
    dispatch(|ctx, vt| unsafe { (vt.callbacks)(ctx) });
}
