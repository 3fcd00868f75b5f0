//! Constants for the contract sandbox.
//!
//! It groups the constants by the protocol surface they belong to.

/// Constants describing contract state keys and their on-chain records.
pub mod keys {
    /// The length of the fixed-size key postfix built by [`KeyPostfix::slot`](crate::KeyPostfix::slot):
    /// a big-endian `u16` slot followed by a big-endian `u16` max-chunks hint.
    pub const SLOT_KEY_POSTFIX_LEN: usize = 4;

    /// The maximum length accepted for a variable-length key postfix.
    pub const MAX_KEY_POSTFIX_LEN: usize = 256;

    /// The size in bytes of one state chunk. A key declaring `n` chunks may hold at most
    /// `n * CHUNK_SIZE` bytes.
    pub const CHUNK_SIZE: usize = 64;

    /// The prefix byte of contract bytecode records.
    pub const CONTRACT_BYTECODE_PREFIX: u8 = 0x00;

    /// The prefix byte of contract state records.
    pub const CONTRACT_STATE_PREFIX: u8 = 0x01;

    /// The max-chunks hint attached to contract bytecode records (64 KiB of bytecode).
    pub const CONTRACT_BYTECODE_CHUNKS: u16 = 1024;

    /// The separator between the account identity and the logical key of a program-relative
    /// state key.
    pub const RELATIVE_KEY_SEPARATOR: u8 = b'/';
}

/// Constants for execution limits.
pub mod limits {
    /// The size of a wasm linear memory page.
    pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

    /// The largest memory limit the engine accepts for a 32-bit linear memory (4 GiB).
    pub const MAX_MEMORY_LIMIT: u64 = 65_536 * WASM_PAGE_SIZE;

    /// The default fuel budget of a single sandbox invocation.
    pub const DEFAULT_FUEL_LIMIT: u64 = 10_000_000;

    /// The default wall-clock budget of a single sandbox invocation, in milliseconds.
    pub const DEFAULT_TIME_LIMIT_MS: u64 = 100;

    /// The default memory limit of a single linear memory (10 MiB).
    pub const DEFAULT_MEMORY_LIMIT: i64 = 10 * 1024 * 1024;

    /// The retry ceiling of the lazy state-access driver. Reaching it means the contract
    /// is either buggy or adversarial.
    pub const MAX_STATE_DISCOVERY_ATTEMPTS: u32 = 100;

    /// The default maximum nesting depth of `call_program`.
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 16;
}

/// Constants for fee accounting.
pub mod fees {
    /// The amount of fuel that makes up one compute unit.
    pub const FUEL_PER_COMPUTE_UNIT: u64 = 1_000_000;

    /// The minimum number of compute units charged for any evaluated call.
    pub const MIN_COMPUTE_UNITS: u64 = 1;
}

/// Names shared between the host and sandboxed code.
pub mod abi {
    /// The default entry point, invoked when the module does not export `function_name`.
    pub const ENTRY_POINT: &str = "_start";

    /// The export name of the linear memory used for host/guest data exchange.
    pub const MEMORY_EXPORT: &str = "memory";

    /// The export name of the simple allocator: `alloc(len) -> ptr`.
    pub const ALLOC_EXPORT: &str = "alloc";

    /// The export name of the canonical ABI allocator:
    /// `canonical_abi_realloc(old_ptr, old_len, align, new_len) -> ptr`.
    pub const REALLOC_EXPORT: &str = "canonical_abi_realloc";

    /// The import namespace under which the support module's exports are linked.
    pub const SUPPORT_MODULE: &str = "sandbox_support";

    /// The import namespace of the call I/O functions.
    pub const SANDBOX_MODULE: &str = "sandbox";

    /// The import namespace of the opaque byte callback.
    pub const CALLBACK_MODULE: &str = "env";

    /// The name of the opaque byte callback.
    pub const CALLBACK_FUNCTION: &str = "__callback";

    /// The import namespace of the state access functions.
    pub const STATE_MODULE: &str = "state";

    /// The import namespace of the nested-call functions.
    pub const PROGRAM_MODULE: &str = "program";

    /// The error text of a contract-level failure caused by the memory limit.
    pub const OUT_OF_MEMORY: &str = "out of memory";
}
