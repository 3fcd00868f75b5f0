//! Command-line runner for the contract sandbox.
//!
//! Executes a single wasm contract through the lazy state-access driver, serving state from a
//! JSON prestate file, and prints a JSON report of the outcome.

use clap::Parser;

mod cmd;
mod error;
mod logging;
mod run;

pub use cmd::*;

fn main() -> Result<()> {
    set_thread_panic_hook();
    MainCmd::parse().run().inspect_err(|e| println!("{e:?}"))
}

/// Sets thread panic hook, useful for having tests that panic.
fn set_thread_panic_hook() {
    use std::{
        backtrace::Backtrace,
        panic::{set_hook, take_hook},
        process::exit,
    };
    let orig_hook = take_hook();
    set_hook(Box::new(move |panic_info| {
        println!("Custom backtrace: {}", Backtrace::capture());
        orig_hook(panic_info);
        exit(1);
    }));
}
