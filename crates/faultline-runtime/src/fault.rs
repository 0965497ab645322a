//! Fault codes and the values handler clauses receive.

use std::fmt;
use std::num::NonZeroU32;

use crate::registry;

/// An integer-coded fault, the runtime's analogue of an exception tag.
///
/// Codes form an open set. The built-in vocabulary below covers the faults the
/// data-access layer raises; collaborators define their own starting at
/// [`FaultCode::USER_BASE`] and are responsible for keeping them distinct.
/// Zero is unrepresentable: normal completion of a protected block is the
/// success arm of the dispatch, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultCode(NonZeroU32);

impl FaultCode {
    /// A hardware memory fault translated by the signal bridge.
    pub const FATAL_MEMORY_ACCESS: FaultCode = FaultCode::builtin(1);
    /// Memory allocation failed in a collaborator.
    pub const ALLOCATION_FAILURE: FaultCode = FaultCode::builtin(2);
    /// Creating a storage table failed.
    pub const TABLE_CREATION_FAILURE: FaultCode = FaultCode::builtin(3);
    /// Opening the storage backend failed.
    pub const OPEN_FAILURE: FaultCode = FaultCode::builtin(4);
    /// Preparing an outbound request failed.
    pub const REQUEST_SETUP_FAILURE: FaultCode = FaultCode::builtin(5);
    /// Executing an outbound request failed.
    pub const REQUEST_EXECUTION_FAILURE: FaultCode = FaultCode::builtin(6);
    /// A SQL statement failed to execute.
    pub const SQL_EXECUTION_FAILURE: FaultCode = FaultCode::builtin(7);
    /// A remote API request failed. Declared vocabulary only; nothing in this
    /// repository raises it.
    pub const API_REQUEST_FAILURE: FaultCode = FaultCode::builtin(8);
    /// A response could not be parsed.
    pub const MALFORMED_RESPONSE: FaultCode = FaultCode::builtin(9);
    /// A user-supplied name is not acceptable.
    pub const INVALID_NAME: FaultCode = FaultCode::builtin(10);
    /// A user-supplied name collides with an existing one.
    pub const NAME_ALREADY_USED: FaultCode = FaultCode::builtin(11);
    /// A write to the storage backend failed.
    pub const WRITE_FAILURE: FaultCode = FaultCode::builtin(12);
    /// The recovery stack's depth guard tripped.
    pub const RECOVERY_STACK_OVERFLOW: FaultCode = FaultCode::builtin(13);

    /// First code available for collaborator-defined faults. Everything below
    /// this value is reserved for the built-in vocabulary.
    pub const USER_BASE: u32 = 32;

    const fn builtin(raw: u32) -> Self {
        match NonZeroU32::new(raw) {
            Some(n) => Self(n),
            None => panic!("built-in fault codes start at 1"),
        }
    }

    /// Create a fault code from a raw value. Returns `None` for zero, which
    /// is reserved and must never be raised.
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Create a collaborator fault code at `USER_BASE + offset`.
    pub const fn user(offset: u32) -> Self {
        match NonZeroU32::new(Self::USER_BASE.saturating_add(offset)) {
            Some(n) => Self(n),
            None => panic!("collaborator fault codes start at USER_BASE"),
        }
    }

    /// Raw numeric value, always at least 1.
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Symbolic name, if the registry knows one for this code.
    pub fn name(self) -> Option<&'static str> {
        registry::name_of(self)
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "user-fault({})", self.get()),
        }
    }
}

/// A caught fault, as handler clauses and fallbacks see it.
///
/// The diagnostic is an owned copy of whatever string the raising collaborator
/// attached; it does not alias the last-fault register and stays valid however
/// long the handler keeps it.
#[derive(Debug, Clone)]
pub struct Fault {
    /// The code passed to `raise`.
    pub code: FaultCode,
    /// Free-form diagnostic attached by the raiser, e.g. a backend error
    /// message.
    pub diagnostic: Option<String>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.diagnostic {
            Some(diag) => write!(f, "{}: {}", self.code, diag),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Unwind payload carrying a raised fault between `raise` and the enclosing
/// protected block. Private so foreign panics can never be mistaken for
/// faults.
pub(crate) struct FaultPayload(pub(crate) Fault);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_not_a_code() {
        assert!(FaultCode::new(0).is_none());
        assert_eq!(FaultCode::new(7).unwrap(), FaultCode::SQL_EXECUTION_FAILURE);
    }

    #[test]
    fn test_user_codes_sit_above_builtins() {
        let code = FaultCode::user(3);
        assert_eq!(code.get(), FaultCode::USER_BASE + 3);
        assert!(code.get() > FaultCode::RECOVERY_STACK_OVERFLOW.get());
    }

    #[test]
    fn test_builtin_names_render() {
        assert_eq!(
            FaultCode::NAME_ALREADY_USED.to_string(),
            "name-already-used"
        );
        assert_eq!(
            FaultCode::FATAL_MEMORY_ACCESS.to_string(),
            "fatal-memory-access"
        );
    }

    #[test]
    fn test_unknown_code_renders_numerically() {
        // 55 is in the collaborator range and never installed by tests.
        assert_eq!(FaultCode::new(55).unwrap().to_string(), "user-fault(55)");
    }

    #[test]
    fn test_fault_display_includes_diagnostic() {
        let fault = Fault {
            code: FaultCode::NAME_ALREADY_USED,
            diagnostic: Some("duplicate name".into()),
        };
        insta::assert_snapshot!(fault.to_string(), @"name-already-used: duplicate name");
    }
}
