use alloy_primitives::Bytes;

use crate::{
    constants::abi::{CALLBACK_FUNCTION, CALLBACK_MODULE, SANDBOX_MODULE},
    marshal::InputBlob,
    CallInfo, HostError, HostFunction, ImportModule, StateSnapshot,
};

/// `sandbox`: the call's input and output channels.
pub(super) fn module() -> ImportModule {
    ImportModule::new(SANDBOX_MODULE)
        .with_function("input", HostFunction::with_output(input))
        .with_function("payload", HostFunction::with_output(|call, _| Ok(call.params.clone())))
        .with_function("actor", HostFunction::with_output(|call, _| Ok(call.actor.clone())))
        .with_function(
            "function_name",
            HostFunction::with_output(|call, _| {
                Ok(Bytes::copy_from_slice(call.function_name.as_bytes()))
            }),
        )
        .with_function(
            "remaining_fuel",
            HostFunction::with_output(|call, _| {
                Ok(Bytes::copy_from_slice(&call.remaining_fuel().to_le_bytes()))
            }),
        )
        .with_function("set_result", HostFunction::no_output(set_result))
        .with_function(
            "output",
            HostFunction::no_output(|call, blob| {
                call.set_output_blob(Bytes::copy_from_slice(blob));
                Ok(())
            }),
        )
        .with_function(
            "fail",
            HostFunction::no_output(|call, message| {
                call.fail(String::from_utf8_lossy(message).into_owned());
                Ok(())
            }),
        )
        .with_function(
            "log",
            HostFunction::no_output(|call, line| {
                call.log(String::from_utf8_lossy(line).into_owned());
                Ok(())
            }),
        )
}

/// `env`: the per-call opaque byte callback. Without a callback every invocation fails, so
/// modules importing it still instantiate.
pub(super) fn callback_module() -> ImportModule {
    ImportModule::new(CALLBACK_MODULE).with_function(
        CALLBACK_FUNCTION,
        HostFunction::with_output(|call, input| match &call.callback {
            Some(callback) => callback.call(input),
            None => Err(HostError::EmptyCallback),
        }),
    )
}

pub(super) fn set_result(call: &mut CallInfo, result: &[u8]) -> Result<(), HostError> {
    call.set_result(Bytes::copy_from_slice(result));
    Ok(())
}

fn input(call: &mut CallInfo, _: &[u8]) -> Result<Bytes, HostError> {
    let empty = StateSnapshot::new();
    let snapshot = call.state.snapshot().unwrap_or(&empty);
    let blob =
        InputBlob::new(snapshot, call.params.clone(), call.function_name.clone(), call.actor.clone());
    serde_json::to_vec(&blob).map(Bytes::from).map_err(|err| HostError::Decode(err.to_string()))
}
