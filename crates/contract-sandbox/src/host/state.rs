use alloy_primitives::Bytes;
use tracing::trace;

use crate::{
    constants::abi::STATE_MODULE,
    marshal::{decode_borsh, KeyInput, KeyValueInput},
    HostFunction, ImportModule,
};

/// `state`: key/value access scoped to the executing program.
pub(super) fn module() -> ImportModule {
    ImportModule::new(STATE_MODULE)
        .with_function(
            "get",
            HostFunction::with_output(|call, input| {
                let KeyInput { key } = decode_borsh(input)?;
                let value = call.state.get(call.account, &key)?;
                trace!(key = %Bytes::from(key), len = value.len(), "State read");
                Ok(value)
            }),
        )
        .with_function(
            "put",
            HostFunction::no_output(|call, input| {
                let KeyValueInput { key, value } = decode_borsh(input)?;
                call.state.put(call.account, &key, value.into())
            }),
        )
        .with_function(
            "delete",
            HostFunction::no_output(|call, input| {
                let KeyInput { key } = decode_borsh(input)?;
                call.state.delete(call.account, &key)
            }),
        )
}
