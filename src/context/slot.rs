// per-thread ambient context slot
use super::Context;
use crate::error::ContextError;
use crate::executor::PanicInfo;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

thread_local! {
    static SLOT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

// Borrows are never held across user code: values leave the slot before
// they are dropped, so a value's Drop may read the slot again.

/// Copy of the current thread's context. Empty if nothing is installed.
pub(crate) fn capture() -> Result<Context, ContextError> {
    SLOT.try_with(|slot| {
        slot.try_borrow()
            .map(|ctx| ctx.clone().unwrap_or_default())
            .map_err(|_| ContextError::SlotBusy)
    })
    .map_err(|_| ContextError::SlotUnavailable)?
}

/// Swap the slot's contents, returning what was there. An empty context is
/// stored as "nothing installed".
pub(crate) fn replace(next: Option<Context>) -> Result<Option<Context>, ContextError> {
    let next = next.filter(|ctx| !ctx.is_empty());
    SLOT.try_with(|slot| {
        slot.try_borrow_mut()
            .map(|mut current| std::mem::replace(&mut *current, next))
            .map_err(|_| ContextError::SlotBusy)
    })
    .map_err(|_| ContextError::SlotUnavailable)?
}

pub(crate) fn clear() -> Result<Option<Context>, ContextError> {
    replace(None)
}

/// Drop a context taken out of the slot. A value whose `Drop` panics is
/// reported instead of unwinding into the caller.
pub(crate) fn release(ctx: Option<Context>) -> Result<(), ContextError> {
    catch_unwind(AssertUnwindSafe(move || drop(ctx)))
        .map_err(|payload| ContextError::ReleasePanicked(PanicInfo::from_payload(payload).message))
}

/// Puts the previous slot contents back when dropped.
pub(crate) struct Restore {
    previous: Option<Context>,
}

impl Restore {
    pub(crate) fn install(ctx: Context) -> Self {
        let previous = match replace(Some(ctx)) {
            Ok(previous) => previous,
            Err(error) => {
                tracing::warn!(%error, "failed to install context, running without it");
                None
            }
        };
        Self { previous }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        if let Err(error) = replace(self.previous.take()).and_then(release) {
            tracing::warn!(%error, "failed to restore previous context");
        }
    }
}
