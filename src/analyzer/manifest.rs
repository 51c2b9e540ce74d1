//! This module contains the model of the contract manifest that the analysis
//! reads method entry offsets from and writes them back into.
//!
//! Only the parts of the manifest that the analysis needs are modeled as
//! fields. Everything else is kept verbatim in the `extra` maps, so that a
//! manifest written back out differs from the one read in only by the method
//! offsets that the analysis changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error;

/// A contract manifest.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Manifest {
    pub name: String,

    pub abi: Abi,

    /// The fields of the manifest that the analysis does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Creates a manifest with the provided `name` and `methods` and nothing
    /// else.
    #[must_use]
    pub fn new(name: impl Into<String>, methods: Vec<MethodDescriptor>) -> Self {
        Self {
            name:  name.into(),
            abi:   Abi {
                methods,
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// Parses a manifest from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `json` is not a valid manifest.
    pub fn from_json(json: &str) -> error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the manifest as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the preserved fields cannot be serialized.
    pub fn to_json(&self) -> error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.abi.methods
    }

    pub fn methods_mut(&mut self) -> &mut [MethodDescriptor] {
        &mut self.abi.methods
    }

    /// Gets the method called `name`, if there is one.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.abi.methods.iter().find(|method| method.name == name)
    }
}

/// The ABI section of a manifest.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Abi {
    pub methods: Vec<MethodDescriptor>,

    /// Events and any other ABI entries.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A method exposed by the contract.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MethodDescriptor {
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(rename = "returntype")]
    pub return_type: String,

    /// The script offset at which execution of the method begins.
    pub offset: u32,

    /// Whether the method promises not to modify state.
    #[serde(default)]
    pub safe: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MethodDescriptor {
    /// Creates a descriptor for an unsafe method at `offset` with no
    /// parameters and a `Void` return type.
    #[must_use]
    pub fn new(name: impl Into<String>, offset: u32) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type: "Void".to_string(),
            offset,
            safe: false,
            extra: Map::new(),
        }
    }
}

/// A parameter of a method.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub ty: String,
}
