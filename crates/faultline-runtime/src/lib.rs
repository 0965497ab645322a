//! Structured fault propagation for layered data-access code.
//!
//! This library gives fallible call chains the semantics of nested try/catch
//! blocks over an open set of integer-coded faults:
//!
//! - **Protected blocks** delimit regions whose faults are intercepted;
//!   blocks nest to any depth up to [`MAX_DEPTH`].
//! - **[`raise`]** transfers control from any call depth to the nearest
//!   enclosing block, which dispatches the code to a matching clause, a
//!   catch-all, or the unmatched fallback (report, then propagate outward).
//! - **[`last_fault`]** and [`last_diagnostic`] let handlers inspect the most
//!   recently raised fault and its free-form diagnostic.
//! - **[`install_signal_bridge`]** optionally turns fatal memory-access
//!   signals into catchable faults while a protected block is active.
//!
//! # Architecture
//!
//! The transfer from raise to block rides the standard unwinding machinery
//! with a private payload, so every value between the raise point and the
//! block is dropped before the handler runs. A thread-local recovery stack
//! tracks active blocks, bounds nesting, and keeps block exit idempotent;
//! each thread owns its stack and fault register, so a raise can never cross
//! threads.
//!
//! ```
//! use faultline_runtime::{protect, raise_with, FaultCode};
//!
//! fn add_project(name: &str) {
//!     if name == "room-temperature" {
//!         raise_with(FaultCode::NAME_ALREADY_USED, format!("project {name:?} exists"));
//!     }
//! }
//!
//! let added = protect(|| {
//!     add_project("room-temperature");
//!     true
//! })
//! .catch(FaultCode::NAME_ALREADY_USED, |_fault| false)
//! .run();
//!
//! assert!(!added);
//! assert_eq!(faultline_runtime::last_fault(), Some(FaultCode::NAME_ALREADY_USED));
//! ```
//!
//! Faults are a shared vocabulary: the built-in codes cover the storage and
//! request layer, and collaborators register their own above
//! [`FaultCode::USER_BASE`] via [`registry::install`].

mod block;
mod error;
mod fault;
pub mod logging;
pub mod registry;
mod signal;
mod stack;

pub use block::{protect, Protected};
pub use error::{BridgeError, RegistryError};
pub use fault::{Fault, FaultCode};
pub use signal::install_signal_bridge;
pub use stack::{depth, last_diagnostic, last_fault, raise, raise_with, MAX_DEPTH};
