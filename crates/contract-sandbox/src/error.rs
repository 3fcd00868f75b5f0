use core::fmt;
use std::time::Duration;

use alloy_primitives::Address;

use crate::{KeyPostfix, Permissions};

/// A hard error: the call could not be evaluated at all.
///
/// Contract-level failures are not errors. They are reported as an
/// [`ExecutionResult`](crate::ExecutionResult) with `success == false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The execution parameters were rejected before entry.
    #[error("invalid execution parameters: {0}")]
    InvalidParameters(String),

    /// The bytecode is not a valid module.
    #[error("failed to compile module: {0}")]
    Compile(String),

    /// The module could not be linked or instantiated, or has no entry point.
    #[error("failed to instantiate module: {0}")]
    Instantiation(String),

    /// The call ran out of fuel.
    #[error("fuel exhausted after consuming {consumed} of {limit}")]
    FuelExhausted {
        /// The fuel limit of the call.
        limit: u64,
        /// The fuel consumed before the trap.
        consumed: u64,
    },

    /// The call exceeded its wall-clock budget.
    #[error("execution timed out after {limit:?}")]
    Timeout {
        /// The wall-clock budget of the call.
        limit: Duration,
    },

    /// A registered host function failed.
    #[error("host function failed: {0}")]
    Host(HostError),

    /// A nested call requested more fuel than its caller had left.
    #[error("nested call requested {requested} fuel but only {remaining} remains")]
    InsufficientFuel {
        /// The fuel requested for the child frame.
        requested: u64,
        /// The fuel remaining in the parent frame.
        remaining: u64,
    },

    /// The state-access driver gave up.
    #[error("state discovery stalled after {attempts} attempts: {reason}")]
    ExecutionStalled {
        /// The number of attempts made.
        attempts: u32,
        /// Which ceiling was hit.
        reason: StallReason,
    },

    /// The authoritative state source failed to produce a key.
    #[error("state provider failed to fetch {key}: {message}")]
    StateProvider {
        /// The key being fetched.
        key: KeyPostfix,
        /// The provider's error message.
        message: String,
    },

    /// The observed access set is not covered by the declared permissions.
    #[error("undeclared access to {key}: requires {required:?}, declared {declared:?}")]
    UndeclaredAccess {
        /// The offending key.
        key: KeyPostfix,
        /// The permissions the observed access requires.
        required: Permissions,
        /// The permissions declared for the key.
        declared: Permissions,
    },

    /// The guest wrote an output blob that cannot be decoded.
    #[error("malformed output blob: {0}")]
    MalformedOutput(String),

    /// A nested call failed hard.
    #[error("nested call to {program} failed: {source}")]
    NestedCall {
        /// The program that was called.
        program: Address,
        /// The child's error.
        source: Box<SandboxError>,
    },

    /// The execution engine failed outside of the guest.
    #[error("engine error: {0}")]
    Engine(String),
}

impl SandboxError {
    /// Returns `true` if the error was caused by a resource limit rather than a malformed call.
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted { .. } | Self::Timeout { .. } | Self::InsufficientFuel { .. }
        )
    }
}

impl From<HostError> for SandboxError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::InsufficientFuel { requested, remaining } => {
                Self::InsufficientFuel { requested, remaining }
            }
            HostError::NestedCall { program, source } => Self::NestedCall { program, source },
            other => Self::Host(other),
        }
    }
}

/// The ceiling hit by a stalled state-discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// The retry ceiling was reached.
    AttemptsExhausted,
    /// The fuel consumed across attempts exceeded the cumulative fuel ceiling.
    CumulativeFuel {
        /// The configured ceiling.
        limit: u64,
        /// The fuel consumed so far.
        consumed: u64,
    },
    /// The wall time spent across attempts exceeded the cumulative time ceiling.
    CumulativeTime {
        /// The configured ceiling.
        limit: Duration,
    },
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted => f.write_str("retry ceiling reached"),
            Self::CumulativeFuel { limit, consumed } => {
                write!(f, "cumulative fuel {consumed} exceeds {limit}")
            }
            Self::CumulativeTime { limit } => write!(f, "cumulative time exceeds {limit:?}"),
        }
    }
}

/// An error raised by a host function.
///
/// Two variants are control signals rather than failures. [`HostError::MissingKey`] asks the
/// state-access driver to fetch a key and retry. [`HostError::ContractFailure`] ends the call as a
/// contract-level failure. The executor routes both through a dedicated field of the invocation
/// context and never inspects error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The contract read a key that is not in the state snapshot.
    #[error("missing state key {0}")]
    MissingKey(KeyPostfix),

    /// The contract failed in a way the host detected on its behalf.
    #[error("{0}")]
    ContractFailure(String),

    /// A nested call requested more fuel than its caller had left.
    #[error("requested {requested} fuel but only {remaining} remains")]
    InsufficientFuel {
        /// The fuel requested for the child frame.
        requested: u64,
        /// The fuel remaining in the parent frame.
        remaining: u64,
    },

    /// A nested call failed hard.
    #[error("nested call to {program} failed: {source}")]
    NestedCall {
        /// The program that was called.
        program: Address,
        /// The child's error.
        source: Box<SandboxError>,
    },

    /// The nesting depth limit was reached.
    #[error("call depth {depth} exceeds the limit of {limit}")]
    CallDepthExceeded {
        /// The depth the call would have reached.
        depth: usize,
        /// The configured limit.
        limit: usize,
    },

    /// No callback was registered for this invocation.
    #[error("empty callback")]
    EmptyCallback,

    /// The registered callback failed.
    #[error("callback failed: {0}")]
    Callback(String),

    /// The guest passed a region outside of its linear memory.
    #[error("guest memory access out of bounds (ptr {ptr}, len {len})")]
    MemoryAccess {
        /// The region start.
        ptr: u32,
        /// The region length.
        len: u32,
    },

    /// Neither the user module nor the support module exports a memory and an allocator.
    #[error("no guest memory with an allocator is exported")]
    MemoryUnavailable,

    /// The guest allocator failed.
    #[error("guest allocation failed: {0}")]
    Allocation(String),

    /// The host function input could not be decoded.
    #[error("failed to decode host function input: {0}")]
    Decode(String),

    /// The host function is not available in the current execution mode.
    #[error("{0} is not available in this execution mode")]
    Unavailable(&'static str),

    /// The loader knows no program with this identity.
    #[error("unknown program {0}")]
    UnknownProgram(Address),

    /// The program store or loader failed.
    #[error("program store failed: {0}")]
    Store(String),
}
