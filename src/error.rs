//! Error taxonomy for the whole stack.
//!
//! Errors propagate as return values; intermediate layers add context
//! without changing the kind. Sticky DAP faults and abstract command
//! errors are cleared in place before the typed error is raised, so the
//! next operation starts from a clean slate.

/// Result alias used throughout the crate.
pub type SwdResult<T> = Result<T, SwdError>;

/// Any error that can occur while operating the debug link.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SwdError {
    /// The hart was already halted when a halt was requested.
    ///
    /// This is a soft condition, not a failure; callers typically treat it
    /// as success.
    #[error("The hart is already halted")]
    AlreadyHalted,
    /// The operation requires a connected link.
    #[error("The target is not connected")]
    NotConnected,
    /// The operation requires an activated debug module.
    #[error("The debug module has not been initialized")]
    NotInitialized,
    /// The operation requires a halted hart.
    #[error("The hart is not halted")]
    NotHalted,
    /// An argument was out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParam(&'static str),
    /// The target reported a state the driver cannot proceed from.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// An address did not meet the required alignment.
    #[error("Address {address:#010x} is not aligned to {required} bytes")]
    Alignment {
        /// The offending address.
        address: u32,
        /// The required alignment in bytes.
        required: u32,
    },
    /// A poll budget was exhausted.
    #[error("Timeout while waiting for the target")]
    Timeout,
    /// The parity bit of an SWD read did not match the data.
    #[error("SWD read parity mismatch: {0}")]
    Parity(String),
    /// The target answered with a malformed ACK; the line is reset.
    #[error("SWD protocol error: {0}")]
    Protocol(String),
    /// The target answered WAIT and all retries were used up.
    #[error("Target kept responding WAIT")]
    Wait,
    /// The target answered FAULT; sticky errors have been cleared.
    #[error("Target responded with FAULT: {0}")]
    Fault(String),
    /// The debug module reported a non-zero `cmderr`; it has been cleared.
    #[error("Abstract command failed: {0:?}")]
    AbstractCommand(AbstractCommandErrorKind),
    /// A write-then-read-back check failed.
    #[error("Verification failed at {address:#010x}: wrote {expected:#010x}, read back {read_back:#010x}")]
    Verify {
        /// The address the verification ran against.
        address: u32,
        /// The value that was written.
        expected: u32,
        /// The value the read-back produced.
        read_back: u32,
    },
    /// The wire backend could not acquire its resources.
    #[error("Wire engine resources are unavailable")]
    ResourceBusy,
}

impl SwdError {
    /// Whether this error is retryable by issuing the same transaction again.
    pub fn is_wait(&self) -> bool {
        matches!(self, SwdError::Wait)
    }
}

/// Errors which can occur while executing an abstract command.
///
/// Decoded from the 3-bit `cmderr` field of `abstractcs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractCommandErrorKind {
    /// No error happened.
    None = 0,
    /// An abstract command was executing while `command`, `abstractcs` or
    /// one of the `data`/`progbuf` registers was accessed.
    Busy = 1,
    /// The requested command is not supported.
    NotSupported = 2,
    /// An exception occurred while executing the command (e.g. while
    /// executing the program buffer).
    Exception = 3,
    /// The hart was not in the required state (running/halted), or
    /// unavailable.
    HaltResume = 4,
    /// The command failed due to a bus error (alignment, access size, or
    /// timeout).
    Bus = 5,
    /// A reserved code. Should not occur.
    Reserved = 6,
    /// The command failed for another reason.
    Other = 7,
}

impl AbstractCommandErrorKind {
    /// Decode the `cmderr` field.
    pub fn parse(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Busy,
            2 => Self::NotSupported,
            3 => Self::Exception,
            4 => Self::HaltResume,
            5 => Self::Bus,
            6 => Self::Reserved,
            7 => Self::Other,
            _ => unreachable!("cmderr is a 3 bit value, values higher than 7 should not occur."),
        }
    }
}
