//! Error types for the runtime's setup APIs.
//!
//! Setup failures are ordinary `Result`s returned to the caller. They are
//! configuration mistakes, not faults, and never travel the recovery stack.

use thiserror::Error;

/// Errors from installing collaborator vocabulary in the fault registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry accepts exactly one installation per process.
    #[error("fault registry vocabulary already installed")]
    AlreadyInstalled,

    /// The code is inside the reserved built-in range.
    #[error("fault code {0} is reserved for the built-in vocabulary")]
    ReservedCode(u32),
}

/// Errors from installing the signal bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The bridge accepts exactly one installation per process.
    #[error("signal bridge already installed")]
    AlreadyInstalled,

    /// Registering the handler for the given signal failed.
    #[error("sigaction for signal {0} failed")]
    HandlerRegistration(i32),

    /// Allocating the per-thread bridge state key failed.
    #[error("pthread_key_create failed with {0}")]
    ThreadState(i32),

    /// Signal translation only exists on Unix-like platforms.
    #[error("signal bridge is not supported on this platform")]
    Unsupported,
}
