//! The thread-local recovery stack and the raise primitive.
//!
//! Each thread owns an independent stack of active protected blocks and an
//! independent last-fault register. The LIFO discipline is only sound within
//! one thread of control, so nothing here is shared: a raise can never resume
//! a frame that belongs to another thread.

use std::cell::RefCell;
use std::panic;
use std::process;

use tracing::debug;

use crate::fault::{Fault, FaultCode, FaultPayload};

/// Maximum nesting depth of protected blocks per thread. The depth guard
/// raises [`FaultCode::RECOVERY_STACK_OVERFLOW`] before the stack can grow
/// past this.
pub const MAX_DEPTH: usize = 64;

/// One active protected block. The id makes block exit idempotent: a frame
/// consumed by a raise can not be popped a second time, and a stale exit can
/// not pop somebody else's frame.
struct Frame {
    id: u64,
}

struct StackState {
    frames: Vec<Frame>,
    next_id: u64,
    /// Last-fault register: most recent code passed to raise, with the
    /// raiser's diagnostic. Overwritten on every raise, never cleared on a
    /// successful block exit.
    last_fault: Option<Fault>,
}

thread_local! {
    static STACK: RefCell<StackState> = const {
        RefCell::new(StackState {
            frames: Vec::new(),
            next_id: 0,
            last_fault: None,
        })
    };
}

/// Push a frame for a new protected block and return its id.
///
/// The depth guard runs before the push. On overflow the dedicated fault is
/// raised through the block that is currently on top, so unbounded nesting
/// surfaces as a catchable fault instead of silent growth.
pub(crate) fn enter() -> u64 {
    let pushed = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.frames.len() >= MAX_DEPTH {
            return None;
        }
        let id = stack.next_id;
        stack.next_id += 1;
        stack.frames.push(Frame { id });
        Some(id)
    });
    match pushed {
        Some(id) => id,
        None => raise_with(
            FaultCode::RECOVERY_STACK_OVERFLOW,
            format!("protected-block nesting exceeded {MAX_DEPTH} levels"),
        ),
    }
}

/// Pop the frame with the given id if it is still on top.
///
/// Idempotent with respect to stack state: after a raise has consumed the
/// frame this is a no-op, and it never pops an unrelated frame.
pub(crate) fn exit(id: u64) {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.frames.last().map(|frame| frame.id) == Some(id) {
            stack.frames.pop();
        }
    });
}

/// Number of protected blocks currently active on this thread.
pub fn depth() -> usize {
    STACK.with(|stack| stack.borrow().frames.len())
}

/// Raise a fault from anywhere inside a protected block.
///
/// Control transfers to the nearest enclosing block, which dispatches the
/// code to its clauses. With no block on this thread's stack the fault is
/// unrecoverable: it is reported to stderr and the process terminates with a
/// non-zero status.
pub fn raise(code: FaultCode) -> ! {
    raise_fault(Fault {
        code,
        diagnostic: None,
    })
}

/// Like [`raise`], with a free-form diagnostic attached (for example a
/// backend error message). Handlers read it from the fault they receive or
/// via [`last_diagnostic`].
pub fn raise_with(code: FaultCode, diagnostic: impl Into<String>) -> ! {
    raise_fault(Fault {
        code,
        diagnostic: Some(diagnostic.into()),
    })
}

/// Shared raise path: record the fault, consume the top frame, and unwind to
/// its block. A handler that raises again therefore targets the next outer
/// block, because its own frame is already gone.
pub(crate) fn raise_fault(fault: Fault) -> ! {
    let had_context = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.last_fault = Some(fault.clone());
        stack.frames.pop().is_some()
    });
    if !had_context {
        report_fatal(&fault);
    }
    debug!(code = fault.code.get(), name = %fault.code, "fault raised");
    panic::panic_any(FaultPayload(fault));
}

/// Record a fault in the last-fault register without unwinding. Used by the
/// signal bridge, which arrives in the block's own frame rather than through
/// a raise.
pub(crate) fn record(fault: Fault) {
    STACK.with(|stack| stack.borrow_mut().last_fault = Some(fault));
}

/// Code most recently passed to raise on this thread, if any. Not cleared on
/// successful block exit; the contract is "last fault raised", not "fault
/// currently active".
pub fn last_fault() -> Option<FaultCode> {
    STACK.with(|stack| stack.borrow().last_fault.as_ref().map(|fault| fault.code))
}

/// Diagnostic attached to the most recent raise, if any. Returns an owned
/// copy; the register itself is overwritten by the next raise.
pub fn last_diagnostic() -> Option<String> {
    STACK.with(|stack| {
        stack
            .borrow()
            .last_fault
            .as_ref()
            .and_then(|fault| fault.diagnostic.clone())
    })
}

/// No context to resume into: report and terminate. There is nothing to jump
/// to, so returning is not an option.
fn report_fatal(fault: &Fault) -> ! {
    tracing::error!(code = fault.code.get(), name = %fault.code, "unrecoverable fault");
    eprintln!(
        "faultline: fault {} raised with no protected block on this thread",
        fault.code
    );
    if let Some(diagnostic) = &fault.diagnostic {
        eprintln!("faultline: {diagnostic}");
    }
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit_balance() {
        assert_eq!(depth(), 0);
        let a = enter();
        let b = enter();
        assert_eq!(depth(), 2);
        exit(b);
        exit(a);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_exit_is_idempotent() {
        let a = enter();
        exit(a);
        // Stale exit: the frame is gone, nothing else may be popped.
        exit(a);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_exit_ignores_non_top_frame() {
        let a = enter();
        let b = enter();
        // Exiting the outer frame out of order must not disturb the top.
        exit(a);
        assert_eq!(depth(), 2);
        exit(b);
        exit(a);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_record_updates_register() {
        record(Fault {
            code: FaultCode::OPEN_FAILURE,
            diagnostic: Some("cannot open ./metrics.db".into()),
        });
        assert_eq!(last_fault(), Some(FaultCode::OPEN_FAILURE));
        assert_eq!(
            last_diagnostic().as_deref(),
            Some("cannot open ./metrics.db")
        );
    }
}
