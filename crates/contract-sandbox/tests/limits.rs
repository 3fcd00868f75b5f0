//! Tests for the fuel, wall-clock and memory limits of a single invocation.

use std::time::{Duration, Instant};

use contract_sandbox::{constants::limits::WASM_PAGE_SIZE, test_utils::*, *};
use rstest::rstest;

fn executor(cache_enabled: bool) -> Executor {
    Executor::new(SandboxConfig::default().with_cache_enabled(cache_enabled)).unwrap()
}

fn burn(iterations: u32) -> ExecutionParameters {
    ExecutionParameters::new(contracts::bytecode(contracts::BURN))
        .with_time_limit(Duration::from_secs(5))
        .with_payload(iterations.to_le_bytes().to_vec())
}

fn grow_to(pages: u32, limit: MemoryLimit) -> ExecutionParameters {
    ExecutionParameters::new(contracts::bytecode(contracts::MEMORY_GROW))
        .with_time_limit(Duration::from_secs(5))
        .with_memory_limit(limit)
        .with_payload(pages.to_le_bytes().to_vec())
}

fn execute(executor: &Executor, params: &ExecutionParameters) -> Result<ExecutionResult, SandboxError> {
    executor.execute(params, &StateSnapshot::new()).map(|outcome| outcome.into_result().unwrap())
}

// ===== FUEL =====

#[rstest]
#[case::cached(true)]
#[case::uncached(false)]
fn test_fuel_accounting_is_reproducible(#[case] cache_enabled: bool) {
    let executor = executor(cache_enabled);
    let params = burn(1_000).with_fuel_limit(1_000_000);

    let first = execute(&executor, &params).unwrap();
    let second = execute(&executor, &params).unwrap();
    let doubled = execute(&executor, &params.clone().with_fuel_limit(2_000_000)).unwrap();

    assert!(first.success);
    assert_eq!(first.fuel_consumed, second.fuel_consumed);
    assert_eq!(first.fuel_consumed, doubled.fuel_consumed);
}

#[test]
fn test_fuel_grows_with_work() {
    let executor = executor(true);
    let small = execute(&executor, &burn(100)).unwrap();
    let large = execute(&executor, &burn(10_000)).unwrap();
    assert!(large.fuel_consumed > small.fuel_consumed);
}

#[test]
fn test_cached_and_uncached_fuel_agree() {
    let params = burn(500);
    let cached = execute(&executor(true), &params).unwrap();
    let uncached = execute(&executor(false), &params).unwrap();
    assert_eq!(cached.fuel_consumed, uncached.fuel_consumed);
}

#[test]
fn test_fuel_exhausted() {
    let executor = executor(true);
    let params = ExecutionParameters::new(contracts::bytecode(contracts::INFINITE_LOOP))
        .with_time_limit(Duration::from_secs(10))
        .with_fuel_limit(10_000);

    let err = execute(&executor, &params).unwrap_err();
    assert_eq!(err, SandboxError::FuelExhausted { limit: 10_000, consumed: 10_000 });
    assert!(err.is_resource_exhaustion());
}

#[test]
fn test_zero_fuel_is_rejected() {
    let executor = executor(true);
    let params = burn(1).with_fuel_limit(0);
    assert!(matches!(execute(&executor, &params), Err(SandboxError::InvalidParameters(_))));
}

// ===== WALL CLOCK =====

#[test]
fn test_timeout() {
    let executor = executor(true);
    let params = ExecutionParameters::new(contracts::bytecode(contracts::INFINITE_LOOP))
        .with_fuel_limit(u64::MAX / 2)
        .with_time_limit(Duration::from_millis(50));

    let started = Instant::now();
    let err = execute(&executor, &params).unwrap_err();
    assert_eq!(err, SandboxError::Timeout { limit: Duration::from_millis(50) });
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_fast_call_does_not_time_out() {
    let executor = executor(true);
    let params = burn(10).with_time_limit(Duration::from_millis(500));
    assert!(execute(&executor, &params).unwrap().success);
}

// ===== MEMORY =====

#[rstest]
#[case::within_limit(2, 2, true)]
#[case::one_page_over(3, 2, false)]
#[case::single_page(1, 1, true)]
#[case::large(16, 16, true)]
#[case::large_over(17, 16, false)]
fn test_memory_limit_boundary(#[case] pages: u32, #[case] limit_pages: u64, #[case] ok: bool) {
    let executor = executor(true);
    let result = execute(&executor, &grow_to(pages, MemoryLimit::pages(limit_pages))).unwrap();
    if ok {
        assert!(result.success, "{}", result.error);
    } else {
        assert!(!result.success);
        assert_eq!(result.error, constants::abi::OUT_OF_MEMORY);
    }
}

#[test]
fn test_memory_limit_below_support_memory() {
    let executor = executor(true);
    let params = grow_to(1, MemoryLimit::Bytes(WASM_PAGE_SIZE - 1));
    let result = execute(&executor, &params).unwrap();
    assert!(!result.success);
    assert_eq!(result.error, constants::abi::OUT_OF_MEMORY);
}

#[test]
fn test_unlimited_memory() {
    let executor = executor(true);
    let result = execute(&executor, &grow_to(64, MemoryLimit::Unlimited)).unwrap();
    assert!(result.success, "{}", result.error);
}

#[test]
fn test_negative_configured_memory_limit_means_unlimited() {
    let limits = ExecutionLimits { memory_limit_bytes: -1, time_limit_ms: 5_000, ..Default::default() };
    let executor = Executor::new(SandboxConfig::default().with_default_limits(limits)).unwrap();
    let params = executor
        .parameters(contracts::bytecode(contracts::MEMORY_GROW))
        .with_payload(300u32.to_le_bytes().to_vec());
    assert_eq!(params.memory_limit, MemoryLimit::Unlimited);
    assert!(execute(&executor, &params).unwrap().success);
}
