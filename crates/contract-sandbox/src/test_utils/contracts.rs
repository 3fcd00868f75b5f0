//! Test contracts in WebAssembly text format.
//!
//! Contracts import the linear memory of the runtime-support module and use the first kilobyte of
//! it, below the support allocator's heap, as scratch space. Host functions returning bytes yield
//! an `i64` packing `ptr << 32 | len`.

use alloy_primitives::Bytes;

/// Returns the bytecode of a contract source.
pub fn bytecode(source: &str) -> Bytes {
    Bytes::copy_from_slice(source.as_bytes())
}

/// The built-in runtime-support module.
pub const SUPPORT: &str = crate::DEFAULT_SUPPORT_MODULE;

/// A support module exposing only the canonical realloc allocator.
pub const REALLOC_SUPPORT: &str = r#"
(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 2048))
  (func (export "canonical_abi_realloc") (param i32 i32 i32 i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (local.get $ptr) (local.get 3)))
    (local.get $ptr)))
"#;

/// Does nothing.
pub const NOOP: &str = r#"
(module
  (func (export "_start")))
"#;

/// Returns its payload.
pub const ECHO: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (call $set_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// Returns the JSON input blob it was handed.
pub const INPUT_ECHO: &str = r#"
(module
  (import "sandbox" "input" (func $input (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local.set $r (call $input (i32.const 0) (i32.const 0)))
    (call $set_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// Returns the remaining fuel as observed from inside the call, as u64 little-endian.
pub const FUEL_PROBE: &str = r#"
(module
  (import "sandbox" "remaining_fuel" (func $remaining_fuel (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local.set $r (call $remaining_fuel (i32.const 0) (i32.const 0)))
    (call $set_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// A per-actor counter keyed by the caller identity.
///
/// `increment` adds the u64 little-endian payload and returns the new value, `read` returns the
/// current value. Both return u64 little-endian.
pub const COUNTER: &str = r#"
(module
  (import "sandbox" "actor" (func $actor (param i32 i32) (result i64)))
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "state" "get" (func $get (param i32 i32) (result i64)))
  (import "state" "put" (func $put (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))

  ;; Writes borsh { key: actor } at offset 0 and returns its length.
  (func $key (result i32)
    (local $r i64)
    (local $len i32)
    (local.set $r (call $actor (i32.const 0) (i32.const 0)))
    (local.set $len (i32.wrap_i64 (local.get $r)))
    (i32.store (i32.const 0) (local.get $len))
    (memory.copy
      (i32.const 4)
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (local.get $len))
    (i32.add (local.get $len) (i32.const 4)))

  (func $load (param $key_len i32) (result i64)
    (local $r i64)
    (local.set $r (call $get (i32.const 0) (local.get $key_len)))
    (if (result i64) (i32.eq (i32.wrap_i64 (local.get $r)) (i32.const 8))
      (then (i64.load (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))))
      (else (i64.const 0))))

  (func (export "increment")
    (local $key_len i32)
    (local $p i64)
    (local $value i64)
    (local.set $key_len (call $key))
    (local.set $p (call $payload (i32.const 0) (i32.const 0)))
    (local.set $value
      (i64.add
        (call $load (local.get $key_len))
        (i64.load (i32.wrap_i64 (i64.shr_u (local.get $p) (i64.const 32))))))
    (i32.store (local.get $key_len) (i32.const 8))
    (i64.store (i32.add (local.get $key_len) (i32.const 4)) (local.get $value))
    (call $put (i32.const 0) (i32.add (local.get $key_len) (i32.const 12)))
    (i64.store (i32.const 512) (local.get $value))
    (call $set_result (i32.const 512) (i32.const 8)))

  (func (export "read")
    (i64.store (i32.const 512) (call $load (call $key)))
    (call $set_result (i32.const 512) (i32.const 8)))

  (func (export "_start")))
"#;

/// Reads the keys `slot(1, 1)` to `slot(4, 1)` in order, then writes the total length of their
/// values as a single byte to `slot(5, 1)`.
pub const KEYS_READER: &str = r#"
(module
  (import "state" "get" (func $get (param i32 i32) (result i64)))
  (import "state" "put" (func $put (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0)
    "\04\00\00\00\00\01\00\01"
    "\04\00\00\00\00\02\00\01"
    "\04\00\00\00\00\03\00\01"
    "\04\00\00\00\00\04\00\01")
  (data (i32.const 32) "\04\00\00\00\00\05\00\01\01\00\00\00\00")
  (func (export "_start")
    (local $i i32)
    (local $total i32)
    (loop $next
      (local.set $total
        (i32.add
          (local.get $total)
          (i32.wrap_i64 (call $get (i32.mul (local.get $i) (i32.const 8)) (i32.const 8)))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $next (i32.lt_u (local.get $i) (i32.const 4))))
    (i32.store8 (i32.const 44) (local.get $total))
    (call $put (i32.const 32) (i32.const 13))))
"#;

/// Writes a 65-byte value to `slot(1, 1)`, one byte over the key's capacity.
pub const OVERSIZE_WRITE: &str = r#"
(module
  (import "state" "put" (func $put (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "\04\00\00\00\00\01\00\01\41\00\00\00")
  (func (export "_start")
    (call $put (i32.const 0) (i32.const 77))))
"#;

/// Spins forever.
pub const INFINITE_LOOP: &str = r#"
(module
  (func (export "_start")
    (loop $spin (br $spin))))
"#;

/// Runs an empty loop for the number of iterations given as u32 little-endian payload.
pub const BURN: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local $n i32)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (if (i32.eqz (i32.wrap_i64 (local.get $r))) (then (return)))
    (local.set $n (i32.load (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))))
    (block $done
      (loop $next
        (br_if $done (i32.eqz (local.get $n)))
        (local.set $n (i32.sub (local.get $n) (i32.const 1)))
        (br $next)))))
"#;

/// Grows the shared linear memory to the number of pages given as u32 little-endian payload and
/// traps if the growth is denied.
pub const MEMORY_GROW: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local $pages i32)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $pages (i32.load (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))))
    (if (i32.eq (memory.grow (i32.sub (local.get $pages) (memory.size))) (i32.const -1))
      (then (unreachable)))))
"#;

/// Forwards its payload, a borsh-encoded `CallProgramInput`, to `program.call_program` and
/// returns the child's result.
pub const CALLER: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "program" "call_program" (func $call_program (param i32 i32) (result i64)))
  (import "program" "set_call_result" (func $set_call_result (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $r
      (call $call_program
        (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
        (i32.wrap_i64 (local.get $r))))
    (call $set_call_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// Stores its payload under the key `k`. `write_then_fail` does the same and then fails.
pub const WRITER: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox" "fail" (func $fail (param i32 i32)))
  (import "state" "put" (func $put (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "\01\00\00\00k")
  (data (i32.const 256) "write rejected")

  (func $write
    (local $r i64)
    (local $len i32)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $len (i32.wrap_i64 (local.get $r)))
    (i32.store (i32.const 5) (local.get $len))
    (memory.copy
      (i32.const 9)
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (local.get $len))
    (call $put (i32.const 0) (i32.add (local.get $len) (i32.const 9))))

  (func (export "_start")
    (call $write))

  (func (export "write_then_fail")
    (call $write)
    (call $fail (i32.const 256) (i32.const 14))))
"#;

/// Hands its payload to the per-call callback and returns the callback's answer.
pub const CALLBACK: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "env" "__callback" (func $callback (param i32 i32) (result i64)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $r
      (call $callback
        (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
        (i32.wrap_i64 (local.get $r))))
    (call $set_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// Logs a line and fails with `insufficient balance`.
pub const FAILING: &str = r#"
(module
  (import "sandbox" "log" (func $log (param i32 i32)))
  (import "sandbox" "fail" (func $fail (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "checking balance")
  (data (i32.const 64) "insufficient balance")
  (func (export "_start")
    (call $log (i32.const 0) (i32.const 16))
    (call $fail (i32.const 64) (i32.const 20))))
"#;

/// Traps unconditionally.
pub const TRAP: &str = r#"
(module
  (func (export "_start")
    unreachable))
"#;

/// Writes a complete output blob: result `[1, 2, 3]`, a write of `[5]` to `slot(1, 1)` and a
/// read of `slot(1, 1)`.
pub const OUTPUT_BLOB: &str = r#"
(module
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0)
    "{\"result\":\"AQID\",\"success\":true,\"updatedKeys\":{\"AAEAAQ==\":\"BQ==\"},\"readKeys\":[\"AAEAAQ==\"],\"error\":\"\"}")
  (func (export "_start")
    (call $output (i32.const 0) (i32.const 101))))
"#;

/// Reports `slot(2, 1)` as missing through the output blob on every attempt.
pub const OUTPUT_MISSING_KEY: &str = r#"
(module
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "{\"missingKey\":\"AAIAAQ==\"}")
  (func (export "_start")
    (call $output (i32.const 0) (i32.const 25))))
"#;

/// Writes an output blob that is not JSON.
pub const MALFORMED_OUTPUT: &str = r#"
(module
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "not json")
  (func (export "_start")
    (call $output (i32.const 0) (i32.const 8))))
"#;

/// Reads `slot(2, 1)` through the host, then writes an output blob listing only `slot(1, 1)` as
/// read.
pub const BLOB_UNDERREPORTED_READ: &str = r#"
(module
  (import "state" "get" (func $get (param i32 i32) (result i64)))
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "\04\00\00\00\00\02\00\01")
  (data (i32.const 256) "{\"result\":\"\",\"success\":true,\"readKeys\":[\"AAEAAQ==\"]}")
  (func (export "_start")
    (drop (call $get (i32.const 0) (i32.const 8)))
    (call $output (i32.const 256) (i32.const 52))))
"#;

/// Writes an output blob storing 65 bytes under `slot(1, 1)`, one byte over the key's capacity.
pub const BLOB_OVERSIZE_WRITE: &str = r#"
(module
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0)
    "{\"result\":\"\",\"success\":true,\"updatedKeys\":{\"AAEAAQ==\":\"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\"}}")
  (func (export "_start")
    (call $output (i32.const 0) (i32.const 146))))
"#;

/// Stores `[1]` under `slot(1, 1)` through the host, then writes an output blob claiming `[5]`
/// was stored there.
pub const BLOB_CONFLICTING_WRITE: &str = r#"
(module
  (import "state" "put" (func $put (param i32 i32)))
  (import "sandbox" "output" (func $output (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (data (i32.const 0) "\04\00\00\00\00\01\00\01\01\00\00\00\01")
  (data (i32.const 256) "{\"result\":\"\",\"success\":true,\"updatedKeys\":{\"AAEAAQ==\":\"BQ==\"}}")
  (func (export "_start")
    (call $put (i32.const 0) (i32.const 13))
    (call $output (i32.const 256) (i32.const 62))))
"#;

/// Asks for 100 more pages and ignores the denial, then hands its payload to the per-call
/// callback and returns the answer.
pub const STARVED_CALLBACK: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "sandbox" "set_result" (func $set_result (param i32 i32)))
  (import "env" "__callback" (func $callback (param i32 i32) (result i64)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (drop (memory.grow (i32.const 100)))
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $r
      (call $callback
        (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
        (i32.wrap_i64 (local.get $r))))
    (call $set_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;

/// Asks for 100 more pages and ignores the denial, then forwards its payload to
/// `program.call_program` like [`CALLER`].
pub const STARVED_CALLER: &str = r#"
(module
  (import "sandbox" "payload" (func $payload (param i32 i32) (result i64)))
  (import "program" "call_program" (func $call_program (param i32 i32) (result i64)))
  (import "program" "set_call_result" (func $set_call_result (param i32 i32)))
  (import "sandbox_support" "memory" (memory 1))
  (func (export "_start")
    (local $r i64)
    (drop (memory.grow (i32.const 100)))
    (local.set $r (call $payload (i32.const 0) (i32.const 0)))
    (local.set $r
      (call $call_program
        (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
        (i32.wrap_i64 (local.get $r))))
    (call $set_call_result
      (i32.wrap_i64 (i64.shr_u (local.get $r) (i64.const 32)))
      (i32.wrap_i64 (local.get $r)))))
"#;
