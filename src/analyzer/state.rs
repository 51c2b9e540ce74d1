//! This module contains the state tracking functionality for the analyzer.

use std::fmt::Debug;

use crate::analyzer::report::MethodReport;

/// A marker trait that says that the type implementing it is an analyzer state.
pub trait State
where
    Self: Clone + Debug + Sized,
{
}

/// The initial state for the analyzer.
#[derive(Clone, Debug)]
pub struct HasContract;
impl State for HasContract {}

/// The analyzer is ready to analyze the contract's methods.
#[derive(Clone, Debug)]
pub struct ScriptReady;
impl State for ScriptReady {}

/// The analyzer has analyzed every method and updated the manifest.
#[derive(Clone, Debug)]
pub struct AnalysisComplete {
    /// The result for each method, in manifest order.
    pub reports: Vec<MethodReport>,
}
impl State for AnalysisComplete {}
