//! Symbolic names for fault codes.
//!
//! Built-in names are a static table. Collaborators may install names for
//! their own codes exactly once, at startup; the registry is read-only for
//! the rest of the process lifetime, so lookups never take a lock.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::error::RegistryError;
use crate::fault::FaultCode;

const BUILTIN_NAMES: &[(u32, &str)] = &[
    (1, "fatal-memory-access"),
    (2, "allocation-failure"),
    (3, "table-creation-failure"),
    (4, "open-failure"),
    (5, "request-setup-failure"),
    (6, "request-execution-failure"),
    (7, "sql-execution-failure"),
    (8, "api-request-failure"),
    (9, "malformed-response"),
    (10, "invalid-name"),
    (11, "name-already-used"),
    (12, "write-failure"),
    (13, "recovery-stack-overflow"),
];

static USER_NAMES: OnceLock<FxHashMap<u32, &'static str>> = OnceLock::new();

/// Install names for collaborator-defined fault codes.
///
/// Callable at most once per process, before the codes are first reported.
/// Every entry must be at or above [`FaultCode::USER_BASE`]; the built-in
/// range is not renameable.
pub fn install(entries: &[(FaultCode, &'static str)]) -> Result<(), RegistryError> {
    for (code, _) in entries {
        if code.get() < FaultCode::USER_BASE {
            return Err(RegistryError::ReservedCode(code.get()));
        }
    }
    let map: FxHashMap<u32, &'static str> =
        entries.iter().map(|(code, name)| (code.get(), *name)).collect();
    USER_NAMES
        .set(map)
        .map_err(|_| RegistryError::AlreadyInstalled)
}

/// Resolve the symbolic name of a code: built-in first, then installed
/// collaborator vocabulary.
pub fn name_of(code: FaultCode) -> Option<&'static str> {
    let raw = code.get();
    BUILTIN_NAMES
        .iter()
        .find(|(value, _)| *value == raw)
        .map(|(_, name)| *name)
        .or_else(|| USER_NAMES.get().and_then(|map| map.get(&raw).copied()))
}
