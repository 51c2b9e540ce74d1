//! This module contains constants that are needed throughout the codebase.

/// The maximum size of a single stack item in bytes on NeoVM.
///
/// Buffers and byte strings created during interpretation that exceed this
/// size would fault on the concrete VM.
pub const MAX_ITEM_SIZE: usize = 131_070;

/// The maximum number of frames on the invocation stack of NeoVM.
pub const MAX_INVOCATION_STACK_SIZE: usize = 1024;

/// The maximum number of items NeoVM allows in a single compound or on the
/// evaluation stack.
pub const MAX_STACK_SIZE: usize = 2048;

/// The maximum number of nested `TRY` blocks within one frame.
pub const MAX_TRY_NESTING_DEPTH: usize = 16;

/// The maximum number of bits an integer may be shifted by.
pub const MAX_SHIFT: usize = 256;

/// The maximum number of bytes a `PUSHINT` family instruction can carry.
pub const PUSHINT_MAX_BYTES: usize = 32;

/// The size in bytes of an interop service hash carried by `SYSCALL`.
pub const SYSCALL_HASH_BYTES: usize = 4;

/// The default maximum number of instructions the interpreter will execute in
/// a single run before giving up.
pub const DEFAULT_INSTRUCTION_LIMIT: usize = 65_536;

/// The default maximum item size enforced by the interpreter.
pub const DEFAULT_MAX_ITEM_SIZE: usize = MAX_ITEM_SIZE;

/// The default maximum invocation depth enforced by the interpreter.
pub const DEFAULT_MAX_INVOCATION_DEPTH: usize = MAX_INVOCATION_STACK_SIZE;

/// The default for whether the interpreter steps into `CALL` targets during
/// the read/write analysis.
pub const DEFAULT_FOLLOW_CALLS: bool = false;

/// The default number of loop iterations the interpreter will wait before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The interop name for obtaining a read-write storage context.
pub const STORAGE_GET_CONTEXT: &str = "System.Storage.GetContext";

/// The interop name for obtaining a read-only storage context.
pub const STORAGE_GET_READ_ONLY_CONTEXT: &str = "System.Storage.GetReadOnlyContext";

/// The interop name for reading a value out of contract storage.
pub const STORAGE_GET: &str = "System.Storage.Get";

/// The interop name for writing a value into contract storage.
pub const STORAGE_PUT: &str = "System.Storage.Put";

/// The interop name for deleting a value from contract storage.
pub const STORAGE_DELETE: &str = "System.Storage.Delete";
