//! This library implements a symbolic interpreter for
//! [NeoVM](https://developers.neo.org/docs/n3/foundation/neo-vm) scripts, and
//! an optimization pass built on it that moves the entry offset of each method
//! of a contract past any prefix of the method that has no observable effect.
//! It is a _best effort_ analysis: a method that cannot be analyzed is left as
//! it was compiled.
//!
//! # How it Works
//!
//! From a very high level, the optimization is performed as follows:
//!
//! 1. The script is decoded on demand into [`disassembly::Instruction`]s, each
//!    an [`opcode::OpCode`] with its operand.
//! 2. Each method named in the contract's [`analyzer::manifest::Manifest`] is
//!    executed on a [`vm::SymbolicVM`], starting at its declared offset with
//!    an unknown caller stack. Values that cannot be known statically are
//!    represented symbolically.
//! 3. Execution stops before the first instruction with an effect that could
//!    be observed, such as a static field access, slot initialization or a
//!    system call, and the method's entry offset moves to that instruction.
//! 4. The reads and writes made by the skipped prefix are recorded in a
//!    [`analyzer::report::MethodReport`] for each method.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to construct an
//! `Analyzer` and call the `.optimize` method, passing your contract.
//!
//! ```
//! use neovm_symbolic::{
//!     analyzer::{
//!         contract::Contract,
//!         manifest::{Manifest, MethodDescriptor},
//!     },
//!     opcode::OpCode,
//!     script,
//!     vm,
//!     watchdog::LazyWatchdog,
//! };
//!
//! let script = script![
//!     OpCode::Dup,     // Shuffle the caller's stack
//!     OpCode::Drop,    // And put it back
//!     OpCode::Push0,   // The value to store
//!     OpCode::StSFld0, // Store it into the first static field
//!     OpCode::Ret      // Return from the method
//! ];
//! let manifest = Manifest::new("Example", vec![MethodDescriptor::new("main", 0)]);
//! let contract = Contract::new(script, manifest);
//!
//! let analyzer =
//!     neovm_symbolic::new(contract, vm::Config::default(), LazyWatchdog.in_arc()).optimize();
//!
//! assert_eq!(analyzer.contract().manifest().methods()[0].offset, 3);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod analyzer;
pub mod constant;
pub mod disassembly;
pub mod error;
pub mod opcode;
pub mod vm;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use analyzer::new;
