use alloy_primitives::{Address, Bytes};
use tracing::debug;

use crate::{
    constants::abi::PROGRAM_MODULE,
    marshal::{decode_borsh, CallProgramInput},
    CallInfo, ExecutionOutcome, ExecutionResult, HostError, HostFunction, ImportModule, StateView,
};

/// `program`: nested calls into other programs.
pub(super) fn module() -> ImportModule {
    ImportModule::new(PROGRAM_MODULE)
        .with_function("call_program", HostFunction::with_output(call_program))
        .with_function("set_call_result", HostFunction::no_output(super::sandbox::set_result))
}

/// Runs a child frame on a sub-budget of the caller's fuel.
///
/// The caller is debited exactly what the child spent, which never exceeds what it requested.
fn call_program(call: &mut CallInfo, input: &[u8]) -> Result<Bytes, HostError> {
    let CallProgramInput { program_id, function_name, params, fuel } = decode_borsh(input)?;
    let program = Address::try_from(program_id.as_slice())
        .map_err(|_| HostError::Decode(format!("invalid program id of {} bytes", program_id.len())))?;

    let Some(runtime) = call.runtime.as_ref() else {
        return Err(HostError::Unavailable("program.call_program"));
    };
    if fuel > call.remaining_fuel() {
        return Err(HostError::InsufficientFuel { requested: fuel, remaining: call.remaining_fuel() });
    }
    let limit = runtime.executor.config().max_call_depth;
    if runtime.depth + 1 > limit {
        return Err(HostError::CallDepthExceeded { depth: runtime.depth + 1, limit });
    }
    let StateView::Program(state) = &call.state else {
        return Err(HostError::Unavailable("program.call_program"));
    };

    let runtime = runtime.child();
    let executor = runtime.executor.clone();
    let time_left = runtime.time_left();
    let child = CallInfo::new(
        program,
        call.actor.clone(),
        function_name,
        params.into(),
        fuel,
        StateView::Program(state.fork()),
    )
    .with_callback(call.callback.clone())
    .with_runtime(runtime);

    debug!(caller = %call.account, %program, fuel, depth = child.depth(), "Nested call");
    let (outcome, child) = executor
        .run_program(child, time_left)
        .and_then(|frame| {
            let fuel_consumed = frame.fuel_consumed;
            frame.finish().map(|finished| (finished, fuel_consumed))
        })
        .map(|((outcome, child), fuel_consumed)| {
            call.consume_fuel(fuel_consumed);
            (outcome, child)
        })
        .map_err(|err| HostError::NestedCall { program, source: Box::new(err) })?;

    let ExecutionResult { output, success, error, debug_log, .. } = match outcome {
        ExecutionOutcome::Complete(result) => result,
        ExecutionOutcome::MissingKey { key, .. } => return Err(HostError::MissingKey(key)),
    };
    call.debug_log.extend(debug_log);
    if !success {
        return Err(HostError::ContractFailure(format!("nested call to {program} failed: {error}")));
    }
    if let (StateView::Program(state), StateView::Program(child_state)) = (&mut call.state, child.state) {
        state.adopt(child_state);
    }
    Ok(output)
}
