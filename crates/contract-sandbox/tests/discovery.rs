//! Tests for the lazy state-access driver.

use std::time::Duration;

use alloy_primitives::Bytes;
use contract_sandbox::{test_utils::*, *};

fn executor() -> Executor {
    Executor::new(SandboxConfig::default().with_default_limits(ExecutionLimits {
        time_limit_ms: 5_000,
        ..Default::default()
    }))
    .unwrap()
}

fn slot(n: u16) -> KeyPostfix {
    KeyPostfix::slot(n, 1)
}

fn provider() -> MemoryStateProvider {
    MemoryStateProvider::default()
        .with_value(slot(1), vec![1u8])
        .with_value(slot(2), vec![2u8, 2])
        .with_value(slot(3), vec![3u8])
    // slot(4) is absent and served as empty bytes.
}

fn reader(executor: &Executor) -> ExecutionParameters {
    executor.parameters(contracts::bytecode(contracts::KEYS_READER))
}

// ===== DISCOVERY =====

#[test]
fn test_each_missing_key_costs_one_retry() {
    let executor = executor();
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());

    let discovered =
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()).unwrap();
    assert_eq!(discovered.retries, 4);
    assert_eq!(driver.provider().fetch_count(), 4);

    let result = &discovered.result;
    assert!(result.success, "{}", result.error);
    assert_eq!(result.read_keys, vec![slot(1), slot(2), slot(3), slot(4)]);
    // 1 + 2 + 1 + 0 value bytes.
    assert_eq!(
        result.updated_keys.iter().collect::<Vec<_>>(),
        vec![(&slot(5), &Bytes::from(vec![4u8]))]
    );
    assert_eq!(discovered.snapshot.len(), 4);
    assert_eq!(discovered.snapshot.get(&slot(4)), Some(&Bytes::new()));
    assert!(discovered.total_fuel_consumed > result.fuel_consumed);
}

#[test]
fn test_preseeded_keys_are_not_fetched() {
    let executor = executor();
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());
    let initial = StateSnapshot::new().with_entry(slot(1), vec![1u8]).with_entry(slot(2), vec![2u8, 2]);

    let discovered = driver.run_with_state_discovery(&reader(&executor), initial).unwrap();
    assert_eq!(discovered.retries, 2);
    assert_eq!(driver.provider().fetch_count(), 2);
    assert!(discovered.result.success);
}

#[test]
fn test_retries_see_a_growing_snapshot() {
    let executor = executor();
    let params = reader(&executor);
    let mut snapshot = StateSnapshot::new();
    let mut missing = Vec::new();

    loop {
        match executor.execute(&params, &snapshot).unwrap() {
            ExecutionOutcome::MissingKey { key, fuel_consumed, .. } => {
                assert!(fuel_consumed > 0);
                assert!(snapshot.extend_with(key.clone(), Bytes::new()));
                missing.push(key);
            }
            ExecutionOutcome::Complete(result) => {
                assert!(result.success);
                break;
            }
        }
    }
    assert_eq!(missing, vec![slot(1), slot(2), slot(3), slot(4)]);
}

#[test]
fn test_compute_units_use_final_attempt() {
    let executor = executor();
    let fees = FeeSchedule { fuel_per_compute_unit: 10, min_compute_units: 1 };
    let driver = StateDiscoveryDriver::new(executor.clone(), provider()).with_fees(fees);

    let discovered =
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()).unwrap();
    assert_eq!(discovered.compute_units, fees.compute_units(discovered.result.fuel_consumed));
    assert!(discovered.compute_units >= 1);
}

#[test]
fn test_contract_without_state_needs_no_retry() {
    let executor = executor();
    let driver = StateDiscoveryDriver::new(executor.clone(), MemoryStateProvider::default());
    let params = executor.parameters(contracts::bytecode(contracts::NOOP));

    let discovered = driver.run_with_state_discovery(&params, StateSnapshot::new()).unwrap();
    assert_eq!(discovered.retries, 0);
    assert_eq!(discovered.compute_units, FeeSchedule::default().min_compute_units);
}

// ===== STALLS AND PROVIDER FAILURES =====

#[test]
fn test_retry_ceiling() {
    let executor = executor();
    let limits = DiscoveryLimits { max_attempts: 3, ..Default::default() };
    let driver =
        StateDiscoveryDriver::new(executor.clone(), MemoryStateProvider::default()).with_limits(limits);
    // The contract keeps reporting the same key after it was fetched.
    let params = executor.parameters(contracts::bytecode(contracts::OUTPUT_MISSING_KEY));

    assert_eq!(
        driver.run_with_state_discovery(&params, StateSnapshot::new()),
        Err(SandboxError::ExecutionStalled { attempts: 3, reason: StallReason::AttemptsExhausted })
    );
}

#[test]
fn test_retry_ceiling_below_needed_keys() {
    let executor = executor();
    let limits = DiscoveryLimits { max_attempts: 2, ..Default::default() };
    let driver = StateDiscoveryDriver::new(executor.clone(), provider()).with_limits(limits);

    assert!(matches!(
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()),
        Err(SandboxError::ExecutionStalled { attempts: 2, .. })
    ));
}

#[test]
fn test_cumulative_fuel_ceiling() {
    let executor = executor();
    let limits = DiscoveryLimits { cumulative_fuel_limit: Some(1), ..Default::default() };
    let driver = StateDiscoveryDriver::new(executor.clone(), provider()).with_limits(limits);

    assert!(matches!(
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()),
        Err(SandboxError::ExecutionStalled {
            attempts: 1,
            reason: StallReason::CumulativeFuel { limit: 1, .. }
        })
    ));
}

#[test]
fn test_cumulative_time_ceiling() {
    let executor = executor();
    let limits = DiscoveryLimits { cumulative_time_limit_ms: Some(0), ..Default::default() };
    let driver = StateDiscoveryDriver::new(executor.clone(), provider()).with_limits(limits);

    assert!(matches!(
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()),
        Err(SandboxError::ExecutionStalled {
            reason: StallReason::CumulativeTime { limit },
            ..
        }) if limit == Duration::ZERO
    ));
}

#[test]
fn test_provider_error() {
    let executor = executor();
    let driver = StateDiscoveryDriver::new(executor.clone(), FailingStateProvider);

    assert_eq!(
        driver.run_with_state_discovery(&reader(&executor), StateSnapshot::new()),
        Err(SandboxError::StateProvider {
            key: slot(1),
            message: "state source unavailable".to_string()
        })
    );
}

// ===== DECLARED KEYS =====

#[test]
fn test_declared_keys_cover_access_set() {
    let executor = executor();
    let declared = (1..=4)
        .map(|n| (slot(n), Permissions::READ))
        .chain([(slot(5), Permissions::ALLOCATE | Permissions::WRITE)])
        .collect::<DeclaredKeys>();
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());

    let discovered = driver.run_declared(&reader(&executor).with_declared_keys(declared)).unwrap();
    // Every read key was precached.
    assert_eq!(discovered.retries, 0);
    assert!(discovered.result.success);
}

#[test]
fn test_undeclared_write_is_rejected() {
    let executor = executor();
    let declared = (1..=5).map(|n| (slot(n), Permissions::READ)).collect::<DeclaredKeys>();
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());

    assert_eq!(
        driver.run_declared(&reader(&executor).with_declared_keys(declared)),
        Err(SandboxError::UndeclaredAccess {
            key: slot(5),
            required: Permissions::ALLOCATE | Permissions::WRITE,
            declared: Permissions::READ,
        })
    );
}

#[test]
fn test_undeclared_read_is_rejected() {
    let executor = executor();
    let declared = DeclaredKeys::new().with_key(slot(1), Permissions::READ);
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());

    assert!(matches!(
        driver.run_declared(&reader(&executor).with_declared_keys(declared)),
        Err(SandboxError::UndeclaredAccess { required: Permissions::READ, .. })
    ));
}

#[test]
fn test_reads_hidden_from_the_output_blob_are_verified() {
    let executor = executor();
    let declared = DeclaredKeys::new().with_key(slot(1), Permissions::READ);
    let driver = StateDiscoveryDriver::new(executor.clone(), provider());
    let params = executor
        .parameters(contracts::bytecode(contracts::BLOB_UNDERREPORTED_READ))
        .with_declared_keys(declared);

    assert!(matches!(
        driver.run_declared(&params),
        Err(SandboxError::UndeclaredAccess { key, required, .. })
            if key == slot(2) && required == Permissions::READ
    ));
}

#[test]
fn test_commit_then_rerun() {
    let executor = executor();
    let mut provider = provider();
    let params = reader(&executor);

    let first = StateDiscoveryDriver::new(executor.clone(), &provider)
        .run_with_state_discovery(&params, StateSnapshot::new())
        .unwrap();
    provider.commit(&first.result.updated_keys);
    assert_eq!(provider.value(&slot(5)), Some(&Bytes::from(vec![4u8])));

    let second = StateDiscoveryDriver::new(executor, &provider)
        .run_with_state_discovery(&params, first.snapshot)
        .unwrap();
    assert_eq!(second.retries, 0);
    // slot(5) is not part of the snapshot, so the write is recorded again.
    assert_eq!(second.result.updated_keys, first.result.updated_keys);
}
