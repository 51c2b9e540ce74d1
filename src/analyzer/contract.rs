//! This module contains the definition of the contract that the analyzer
//! optimizes.

use serde_json::Value;

use crate::{analyzer::manifest::Manifest, disassembly::Script, error};

/// A compiled contract: its script, the manifest describing the methods the
/// script exposes, and optionally the debug information emitted alongside it.
///
/// The debug information is carried through the analysis untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Contract {
    script:     Script,
    manifest:   Manifest,
    debug_info: Option<Value>,
}

impl Contract {
    /// Constructs a new contract from its `script` and `manifest`.
    #[must_use]
    pub fn new(script: Script, manifest: Manifest) -> Self {
        Self {
            script,
            manifest,
            debug_info: None,
        }
    }

    /// Constructs a contract from the bytes of its script and the JSON text of
    /// its manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the script does not decode or the manifest does not
    /// parse.
    pub fn from_parts(script: &[u8], manifest: &str) -> error::Result<Self> {
        let script = Script::try_from(script)?;
        let manifest = Manifest::from_json(manifest)?;
        Ok(Self::new(script, manifest))
    }

    /// Attaches the provided `debug_info` to the contract.
    #[must_use]
    pub fn with_debug_info(mut self, debug_info: Value) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    #[must_use]
    pub fn script(&self) -> &Script {
        &self.script
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    #[must_use]
    pub fn debug_info(&self) -> Option<&Value> {
        self.debug_info.as_ref()
    }
}
