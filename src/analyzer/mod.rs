//! This module contains the definition of the analyzer itself.

pub mod contract;
pub mod manifest;
pub mod read_write;
pub mod report;
pub mod state;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    analyzer::{contract::Contract, report::MethodReport, state::State},
    error::execution,
    vm,
    watchdog::DynWatchdog,
};

/// Creates a new analyzer wrapping the provided `contract`, which will run the
/// interpreter with the provided `config` under the provided `watchdog`.
#[must_use]
pub fn new(
    contract: Contract,
    config: vm::Config,
    watchdog: DynWatchdog,
) -> Analyzer<state::HasContract> {
    let state = state::HasContract;
    Analyzer {
        contract,
        config,
        watchdog,
        state,
    }
}

/// The core of the entry offset optimization, the `Analyzer` is responsible
/// for ingesting a compiled contract and moving the entry offset of each of its
/// methods past any prefix that has no observable effect.
///
/// # Basic Usage
///
/// For the most basic usage of the library, it is sufficient to construct an
/// `Analyzer` and call the `.optimize` method, passing your contract.
///
/// # Enforcing Valid State Transitions
///
/// The analyzer enforces that only correct state transitions can occur through
/// use of structs that implement the exact state required by it at any given
/// point.
///
/// There is the [`Self::state`] function that provides access to the state data
/// of whichever state it is in.
#[derive(Debug)]
pub struct Analyzer<S: State> {
    /// The contract that is being analyzed.
    contract: Contract,

    /// The configuration for the interpreter used on every method.
    config: vm::Config,

    /// The watchdog shared by the analyses of every method.
    watchdog: DynWatchdog,

    /// The internal state of the analyzer.
    state: S,
}

/// Safe operations available in all states.
impl<S: State> Analyzer<S> {
    /// Gets a reference to the contract being analyzed.
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Gets a reference to the current state of the analyzer.
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn config(&self) -> &vm::Config {
        &self.config
    }
}

/// Unsafe operations available in all states.
///
/// These operations are capable of **violating the state invariants** of the
/// analyzer, and must be used with the _utmost_ care.
impl<S: State> Analyzer<S> {
    /// Gets a mutable reference to the contract being analyzed.
    ///
    /// # Safety
    ///
    /// Do not mutate the contract instance unless you totally understand the
    /// state that the analyzer is in, and the implications of doing so.
    pub unsafe fn contract_mut(&mut self) -> &mut Contract {
        &mut self.contract
    }

    /// Forces the analyzer into `new_state`, disregarding any safety with
    /// regards to state transitions.
    ///
    /// # Safety
    ///
    /// Do not force a state transition for the analyzer unless you totally
    /// understand the state that the analyzer is in, and the implications
    /// of doing so.
    pub unsafe fn set_state<NS: State>(self, new_state: NS) -> Analyzer<NS> {
        Analyzer {
            contract: self.contract,
            config:   self.config,
            watchdog: self.watchdog,
            state:    new_state,
        }
    }
}

/// Operations available on a newly-created analyzer.
impl Analyzer<state::HasContract> {
    /// Executes the optimization from beginning to end, performing all the
    /// intermediate steps automatically.
    ///
    /// This cannot fail. A method that cannot be analyzed, including one whose
    /// code does not decode, keeps its entry offset.
    #[must_use]
    pub fn optimize(self) -> Analyzer<state::AnalysisComplete> {
        self.prepare().analyze()
    }

    /// Executes the optimization from beginning to end, analyzing the methods
    /// on the rayon thread pool.
    #[must_use]
    pub fn optimize_parallel(self) -> Analyzer<state::AnalysisComplete> {
        self.prepare().analyze_parallel()
    }

    /// Readies the analyzer to run over the contract's methods.
    ///
    /// The script is not decoded as a whole here. Bytes that no method reaches
    /// may be anything, so each method decodes only the instructions it
    /// executes.
    #[must_use]
    pub fn prepare(self) -> Analyzer<state::ScriptReady> {
        debug!(
            contract = self.contract.manifest().name.as_str(),
            methods = self.contract.manifest().methods().len(),
            script_len = self.contract.script().len(),
            "preparing entry offset analysis"
        );
        unsafe { self.set_state(state::ScriptReady) }
    }
}

/// Operations available on an analyzer that is ready to analyze its methods.
impl Analyzer<state::ScriptReady> {
    /// Analyzes each method in turn and moves its entry offset.
    ///
    /// A method whose analysis fails keeps its offset, so this cannot fail.
    #[must_use]
    pub fn analyze(self) -> Analyzer<state::AnalysisComplete> {
        let script = self.contract.script();
        let reports = self
            .contract
            .manifest()
            .methods()
            .iter()
            .map(|method| {
                read_write::analyze_method(script, method, &self.config, self.watchdog.clone())
            })
            .collect();
        self.complete(reports)
    }

    /// Analyzes the methods in parallel and moves their entry offsets.
    ///
    /// Each method is analyzed by its own interpreter, so the result is the
    /// same as that of [`Self::analyze`].
    #[must_use]
    pub fn analyze_parallel(self) -> Analyzer<state::AnalysisComplete> {
        let script = self.contract.script();
        let reports = self
            .contract
            .manifest()
            .methods()
            .par_iter()
            .map(|method| {
                read_write::analyze_method(script, method, &self.config, self.watchdog.clone())
            })
            .collect();
        self.complete(reports)
    }

    fn complete(mut self, reports: Vec<MethodReport>) -> Analyzer<state::AnalysisComplete> {
        let methods = unsafe { self.contract_mut() }.manifest_mut().methods_mut();
        for (method, report) in methods.iter_mut().zip(&reports) {
            method.offset = report.new_offset;
        }
        let state = state::AnalysisComplete { reports };
        unsafe { self.set_state(state) }
    }
}

/// Operations available on an analyzer that has finished.
impl Analyzer<state::AnalysisComplete> {
    /// Gets the report for each method, in manifest order.
    #[must_use]
    pub fn reports(&self) -> &[MethodReport] {
        &self.state.reports
    }

    /// Gets the report for the method called `name`, if there is one.
    #[must_use]
    pub fn report(&self, name: &str) -> Option<&MethodReport> {
        self.state.reports.iter().find(|report| report.name == name)
    }

    /// Gets the interpreter errors that ended the analysis of any method, in
    /// script order.
    ///
    /// These are not failures of the pass, as every such method keeps a safe
    /// entry offset, but they show where the analysis could go no further.
    #[must_use]
    pub fn errors(&self) -> execution::Errors {
        let mut errors = execution::Errors::new();
        for error in self.state.reports.iter().filter_map(|r| r.error.clone()) {
            errors.add_located(error);
        }
        errors
    }

    /// Consumes the analyzer, returning the contract with its updated
    /// manifest.
    #[must_use]
    pub fn into_contract(self) -> Contract {
        self.contract
    }
}
