/// The built-in runtime-support module, used when no support module is configured.
///
/// It exports a one-page `memory` and a bump allocator under both allocator ABIs. The heap starts
/// at offset 1024, so the first kilobyte is free for sandboxed code to use as scratch space.
pub const DEFAULT_SUPPORT_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))

  (func $alloc (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local $end i32)
    (local.set $ptr (global.get $heap))
    (local.set $end (i32.add (local.get $ptr) (local.get $len)))
    (if (i32.gt_u (local.get $end) (i32.shl (memory.size) (i32.const 16)))
      (then
        (if (i32.eq
              (memory.grow
                (i32.shr_u
                  (i32.add
                    (i32.sub (local.get $end) (i32.shl (memory.size) (i32.const 16)))
                    (i32.const 65535))
                  (i32.const 16)))
              (i32.const -1))
          (then (unreachable)))))
    (global.set $heap (i32.and (i32.add (local.get $end) (i32.const 7)) (i32.const -8)))
    (local.get $ptr))

  (func (export "canonical_abi_realloc") (param i32 i32 i32 i32) (result i32)
    (call $alloc (local.get 3))))
"#;
