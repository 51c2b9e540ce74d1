//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use neovm_symbolic as nvs;
use neovm_symbolic::{
    analyzer::{
        contract::Contract,
        manifest::{Manifest, MethodDescriptor},
        state::AnalysisComplete,
        Analyzer,
    },
    disassembly::Script,
    vm,
    watchdog::LazyWatchdog,
};

/// Builds a contract exposing a method at each of the `(name, offset)` pairs
/// in `methods`.
#[allow(unused)] // It is actually
pub fn contract(script: Script, methods: &[(&str, u32)]) -> Contract {
    let methods = methods
        .iter()
        .map(|(name, offset)| MethodDescriptor::new(*name, *offset))
        .collect();
    Contract::new(script, Manifest::new("Test", methods))
}

/// Runs the optimization over `contract` with the provided `config` and no
/// watchdog limits.
#[allow(unused)] // It is actually
pub fn optimize(contract: Contract, config: vm::Config) -> Analyzer<AnalysisComplete> {
    nvs::new(contract, config, LazyWatchdog.in_arc()).optimize()
}

/// Gets the entry offset of every method of the contract, in manifest order.
#[allow(unused)] // It is actually
pub fn offsets(contract: &Contract) -> Vec<u32> {
    contract
        .manifest()
        .methods()
        .iter()
        .map(|method| method.offset)
        .collect()
}
