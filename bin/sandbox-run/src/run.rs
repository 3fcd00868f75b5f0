use std::{convert::Infallible, fs, path::PathBuf, time::Duration};

use alloy_primitives::{hex, Bytes};
use clap::Parser;
use contract_sandbox::{
    constants::abi::ENTRY_POINT, DiscoveryResult, Executor, KeyPostfix, MemoryLimit, OutputBlob,
    SandboxConfig, StateDiscoveryDriver, StateProvider, StateSnapshot,
};
use serde::Serialize;
use tracing::info;

use crate::{logging::LogArgs, Result};

/// Run a wasm contract against a prestate
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Contract module, as a wasm binary or wat text
    #[arg(long = "code", value_name = "PATH")]
    pub code: PathBuf,

    /// Runtime-support module replacing the built-in one
    #[arg(long = "support", value_name = "PATH")]
    pub support: Option<PathBuf>,

    /// Payload handed to the contract (hex string)
    #[arg(long = "payload")]
    pub payload: Option<String>,

    /// Exported function to invoke. Falls back to `_start` when the module does not export it
    #[arg(long = "function", default_value = ENTRY_POINT)]
    pub function: String,

    /// Identity of the caller (hex string)
    #[arg(long = "actor")]
    pub actor: Option<String>,

    /// Fuel budget of each attempt
    #[arg(long = "fuel")]
    pub fuel: Option<u64>,

    /// Wall-clock budget of each attempt, in milliseconds
    #[arg(long = "time-ms")]
    pub time_ms: Option<u64>,

    /// Memory limit in bytes. A negative value disables the limit
    #[arg(long = "memory", allow_negative_numbers = true)]
    pub memory: Option<i64>,

    /// JSON file mapping hex keys to hex values. Keys it does not hold read as empty
    #[arg(long = "prestate", value_name = "PATH")]
    pub prestate: Option<PathBuf>,

    /// JSON file holding a sandbox configuration
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Compile the contract on every attempt instead of caching it
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

impl Cmd {
    /// Execute the run command
    pub fn run(&self) -> Result<()> {
        self.log_args.init()?;

        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => SandboxConfig::default(),
        };
        if self.no_cache {
            config = config.with_cache_enabled(false);
        }

        let mut builder = Executor::builder().with_config(config);
        if let Some(path) = &self.support {
            builder = builder.with_support_module(fs::read(path)?);
        }
        let executor = builder.build()?;

        let mut params = executor.parameters(fs::read(&self.code)?).with_function(&self.function);
        if let Some(payload) = &self.payload {
            params = params.with_payload(decode_hex(payload)?);
        }
        if let Some(actor) = &self.actor {
            params = params.with_actor(decode_hex(actor)?);
        }
        if let Some(fuel) = self.fuel {
            params = params.with_fuel_limit(fuel);
        }
        if let Some(time_ms) = self.time_ms {
            params = params.with_time_limit(Duration::from_millis(time_ms));
        }
        if let Some(memory) = self.memory {
            params = params.with_memory_limit(MemoryLimit::from_signed(memory));
        }

        let provider = match &self.prestate {
            Some(path) => PrestateProvider::from_json(&fs::read_to_string(path)?)?,
            None => PrestateProvider::default(),
        };
        info!(target: "sandbox_run", keys = provider.state.len(), "Loaded prestate");

        let driver = StateDiscoveryDriver::new(executor, provider);
        let discovered = driver.run_with_state_discovery(&params, StateSnapshot::new())?;

        println!("{}", serde_json::to_string_pretty(&Report::from(&discovered))?);
        Ok(())
    }
}

/// Decode hex string, handling optional 0x prefix
fn decode_hex(s: &str) -> Result<Bytes> {
    Ok(hex::decode(s.trim())?.into())
}

/// Serves state from a prestate file.
#[derive(Debug, Default)]
struct PrestateProvider {
    state: StateSnapshot,
}

impl PrestateProvider {
    fn from_json(json: &str) -> Result<Self> {
        Ok(Self { state: serde_json::from_str(json)? })
    }
}

impl StateProvider for PrestateProvider {
    type Error = Infallible;

    fn fetch(&self, key: &KeyPostfix) -> std::result::Result<Bytes, Self::Error> {
        Ok(self.state.get(key).cloned().unwrap_or_default())
    }
}

/// The JSON report printed after a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(flatten)]
    output: OutputBlob,
    fuel_consumed: u64,
    total_fuel_consumed: u64,
    compute_units: u64,
    wall_time_ms: f64,
    retries: u32,
    debug_log: Vec<String>,
}

impl From<&DiscoveryResult> for Report {
    fn from(discovered: &DiscoveryResult) -> Self {
        let result = &discovered.result;
        Self {
            output: OutputBlob::from(result),
            fuel_consumed: result.fuel_consumed,
            total_fuel_consumed: discovered.total_fuel_consumed,
            compute_units: discovered.compute_units,
            wall_time_ms: discovered.total_wall_time.as_secs_f64() * 1000.0,
            retries: discovered.retries,
            debug_log: result.debug_log.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prestate_serves_absent_keys_as_empty() {
        let provider = PrestateProvider::from_json(r#"{"0x00010001": "0x05"}"#).unwrap();
        assert_eq!(provider.fetch(&KeyPostfix::slot(1, 1)).unwrap(), Bytes::from(vec![5u8]));
        assert_eq!(provider.fetch(&KeyPostfix::slot(2, 1)).unwrap(), Bytes::new());
    }

    #[test]
    fn test_decode_hex_with_and_without_prefix() {
        assert_eq!(decode_hex("0x0102").unwrap(), Bytes::from(vec![1u8, 2]));
        assert_eq!(decode_hex(" 0102\n").unwrap(), Bytes::from(vec![1u8, 2]));
        assert!(decode_hex("0x1").is_err());
    }

    #[test]
    fn test_report_flattens_the_output_blob() {
        let discovered = DiscoveryResult {
            result: contract_sandbox::ExecutionResult {
                fuel_consumed: 42,
                debug_log: vec!["hello".to_string()],
                ..contract_sandbox::ExecutionResult::success(vec![1u8])
            },
            retries: 2,
            snapshot: StateSnapshot::new(),
            total_fuel_consumed: 100,
            total_wall_time: Duration::from_millis(3),
            compute_units: 1,
        };
        let json = serde_json::to_value(Report::from(&discovered)).unwrap();
        assert_eq!(json["result"], "AQ==");
        assert_eq!(json["success"], true);
        assert_eq!(json["fuelConsumed"], 42);
        assert_eq!(json["totalFuelConsumed"], 100);
        assert_eq!(json["retries"], 2);
        assert_eq!(json["debugLog"][0], "hello");
        assert!(json.get("missingKey").is_none());
    }
}
