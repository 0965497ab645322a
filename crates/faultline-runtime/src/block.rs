//! Protected blocks: delimited regions whose faults are intercepted.
//!
//! A block is built from a body plus handler clauses and then executed:
//!
//! ```
//! use faultline_runtime::{protect, raise_with, FaultCode};
//!
//! let stored = protect(|| {
//!     raise_with(FaultCode::NAME_ALREADY_USED, "project \"demo\" already exists");
//! })
//! .catch(FaultCode::NAME_ALREADY_USED, |_fault| false)
//! .run();
//!
//! assert!(!stored);
//! ```
//!
//! Dispatch order on a raised fault: the first clause listing the code wins,
//! then the catch-all if one was declared, then the unmatched fallback, which
//! reports the fault and re-raises it to the next enclosing block (or
//! terminates the process when none remains). An unmatched fault is never
//! swallowed.
//!
//! The transfer from `raise` to the block rides the standard unwinding
//! machinery, so destructors of everything between the raise point and the
//! block run before the handler does. Panics that are not faults pass through
//! untouched.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use tracing::{debug, error, trace};

use crate::fault::{Fault, FaultCode, FaultPayload};
use crate::stack;

type Handler<'a, T> = Box<dyn FnOnce(Fault) -> T + 'a>;

struct Clause<'a, T> {
    codes: Vec<FaultCode>,
    handler: Handler<'a, T>,
}

/// A protected block under construction. Created by [`protect`], executed by
/// [`Protected::run`].
pub struct Protected<'a, T> {
    body: Box<dyn FnOnce() -> T + 'a>,
    clauses: Vec<Clause<'a, T>>,
    catch_all: Option<Handler<'a, T>>,
}

/// Begin a protected block around `body`. Faults raised at any call depth
/// inside the body are dispatched to the clauses declared on the returned
/// builder.
pub fn protect<'a, T>(body: impl FnOnce() -> T + 'a) -> Protected<'a, T> {
    Protected {
        body: Box::new(body),
        clauses: Vec::new(),
        catch_all: None,
    }
}

impl<'a, T> Protected<'a, T> {
    /// Declare a handler clause for one fault code.
    pub fn catch(self, code: FaultCode, handler: impl FnOnce(Fault) -> T + 'a) -> Self {
        self.catch_any(&[code], handler)
    }

    /// Declare a handler clause matching any of several fault codes.
    pub fn catch_any(mut self, codes: &[FaultCode], handler: impl FnOnce(Fault) -> T + 'a) -> Self {
        self.clauses.push(Clause {
            codes: codes.to_vec(),
            handler: Box::new(handler),
        });
        self
    }

    /// Declare the catch-all clause, matching any code no earlier clause
    /// claimed.
    pub fn catch_all(mut self, handler: impl FnOnce(Fault) -> T + 'a) -> Self {
        self.catch_all = Some(Box::new(handler));
        self
    }

    /// Execute the block: run the body, intercept faults, dispatch.
    pub fn run(self) -> T {
        install_payload_hook();
        let id = stack::enter();
        trace!(id, depth = stack::depth(), "protected block entered");

        #[cfg(unix)]
        if crate::signal::bridge_installed() {
            return self.run_armed(id);
        }
        self.run_unarmed(id)
    }

    fn run_unarmed(self, id: u64) -> T {
        let Protected {
            body,
            clauses,
            catch_all,
        } = self;
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => {
                // Normal completion: no fault was raised in the body.
                stack::exit(id);
                trace!(id, "protected block completed");
                value
            }
            Err(payload) => dispatch_unwind(payload, id, clauses, catch_all),
        }
    }

    /// Variant of the body execution with a signal jump point in this frame.
    /// The jump buffer must live in the frame that stays on the stack for the
    /// whole body call, which is exactly this one.
    #[cfg(unix)]
    fn run_armed(self, id: u64) -> T {
        use crate::signal;

        let Protected {
            body,
            clauses,
            catch_all,
        } = self;

        let mut jump = signal::JumpBuf::zeroed();
        let previous = signal::arm(&mut jump);
        // SAFETY: `jump` lives in this frame, which outlives both the
        // sigsetjmp call and the body; the handler only jumps here while this
        // buffer is the armed top.
        let crashed = unsafe { signal::sigsetjmp(&mut jump, 1) } != 0;
        if !crashed {
            signal::mark_armed();
            let outcome = panic::catch_unwind(AssertUnwindSafe(body));
            signal::disarm(previous);
            match outcome {
                Ok(value) => {
                    stack::exit(id);
                    trace!(id, "protected block completed");
                    value
                }
                Err(payload) => dispatch_unwind(payload, id, clauses, catch_all),
            }
        } else {
            // The signal handler jumped here. Frames between the faulting
            // instruction and this block are gone without running their
            // destructors; the caller opted into that when installing the
            // bridge.
            signal::disarm(previous);
            let fault = signal::crash_fault();
            stack::record(fault.clone());
            stack::exit(id);
            dispatch(fault, clauses, catch_all)
        }
    }
}

/// Route an unwind payload caught at a block boundary. Fault payloads are
/// dispatched; anything else is an ordinary panic and resumes unwinding.
fn dispatch_unwind<'a, T>(
    payload: Box<dyn Any + Send>,
    id: u64,
    clauses: Vec<Clause<'a, T>>,
    catch_all: Option<Handler<'a, T>>,
) -> T {
    match payload.downcast::<FaultPayload>() {
        Ok(payload) => {
            // The raise already consumed this block's frame; exit tolerates
            // that.
            stack::exit(id);
            dispatch(payload.0, clauses, catch_all)
        }
        Err(other) => {
            stack::exit(id);
            panic::resume_unwind(other);
        }
    }
}

/// Dispatch a caught fault to the block's clauses. Runs after the block's own
/// frame has been consumed, so a handler that raises targets the next outer
/// block.
fn dispatch<'a, T>(fault: Fault, clauses: Vec<Clause<'a, T>>, catch_all: Option<Handler<'a, T>>) -> T {
    for clause in clauses {
        if clause.codes.contains(&fault.code) {
            debug!(code = fault.code.get(), name = %fault.code, "fault handled by clause");
            return (clause.handler)(fault);
        }
    }
    if let Some(handler) = catch_all {
        debug!(code = fault.code.get(), name = %fault.code, "fault handled by catch-all");
        return handler(fault);
    }
    unmatched(fault)
}

/// Unmatched fallback: report, then re-raise to the next enclosing block.
/// With no enclosing block left, the re-raise terminates the process.
fn unmatched(fault: Fault) -> ! {
    error!(code = fault.code.get(), name = %fault.code, "unhandled fault, propagating");
    eprintln!("faultline: unhandled fault {}", fault.code);
    if let Some(diagnostic) = &fault.diagnostic {
        eprintln!("faultline: {diagnostic}");
    }
    stack::raise_fault(fault)
}

static PAYLOAD_HOOK: Once = Once::new();

/// Keep the default panic hook quiet for fault payloads. Faults are control
/// flow here, not crashes; every other panic keeps its normal report.
fn install_payload_hook() {
    PAYLOAD_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<FaultPayload>().is_none() {
                previous(info);
            }
        }));
    });
}
