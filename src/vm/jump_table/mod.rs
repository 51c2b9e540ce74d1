//! This module contains the dispatch table that maps every opcode byte to the
//! handler implementing its symbolic semantics.
//!
//! The standard table is derived from [`handler_for`], an exhaustive match
//! over [`OpCode`], so adding an opcode without deciding how it executes is a
//! compile error. Bytes that are not opcodes route to [`undefined`], and
//! opcodes without symbolic semantics to [`unimplemented`].

pub mod arithmetic;
pub mod compound;
pub mod constants;
pub mod control;
pub mod interop;
pub mod slot;
pub mod splice;
pub mod stack;
pub mod types;

#[cfg(test)]
pub mod test_util;

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::{Debug, Formatter},
};

use crate::{
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::SymbolicVM,
};

/// The result of executing an instruction.
///
/// Handlers report unlocated errors; the dispatcher attaches the offset of
/// the instruction.
pub type HandlerResult = std::result::Result<(), Error>;

/// The signature of an opcode handler.
pub type Handler = fn(&mut SymbolicVM, &Instruction) -> HandlerResult;

/// How a byte of the table is handled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandlerKind {
    /// The byte is not an opcode.
    Undefined,

    /// The byte is an opcode without symbolic semantics.
    Unimplemented,

    /// The byte is an opcode with a handler.
    Handled,
}

/// A total mapping from opcode bytes to handlers.
#[derive(Clone)]
pub struct JumpTable {
    handlers: [Handler; 256],
    kinds:    [HandlerKind; 256],
}

impl JumpTable {
    /// Starts building a table from scratch.
    #[must_use]
    pub fn builder() -> JumpTableBuilder {
        JumpTableBuilder::default()
    }

    /// Gets the handler for the opcode `byte`.
    #[must_use]
    pub fn handler(&self, byte: u8) -> Handler {
        self.handlers[usize::from(byte)]
    }

    /// Gets how the opcode `byte` is handled.
    #[must_use]
    pub fn kind(&self, byte: u8) -> HandlerKind {
        self.kinds[usize::from(byte)]
    }

    /// Executes `instruction` on `vm` through this table.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handler fails.
    pub fn dispatch(&self, vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
        self.handler(instruction.opcode().byte())(vm, instruction)
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        JumpTableBuilder::default().build_with_defaults()
    }
}

impl Debug for JumpTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let handled = self
            .kinds
            .iter()
            .filter(|kind| **kind == HandlerKind::Handled)
            .count();
        f.debug_struct("JumpTable").field("handled", &handled).finish()
    }
}

/// A builder for custom jump tables.
#[derive(Clone, Default)]
pub struct JumpTableBuilder {
    handlers: HashMap<OpCode, Handler>,
}

impl Debug for JumpTableBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.handlers.keys().collect();
        registered.sort();
        f.debug_struct("JumpTableBuilder")
            .field("registered", &registered)
            .finish()
    }
}

impl JumpTableBuilder {
    /// Registers `handler` for `opcode`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a handler is already registered for `opcode`.
    pub fn register(&mut self, opcode: OpCode, handler: Handler) -> Result<&mut Self, Error> {
        match self.handlers.entry(opcode) {
            Entry::Occupied(_) => Err(Error::DuplicateHandler { opcode }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(self)
            }
        }
    }

    /// Builds the table, routing every opcode without a registered handler to
    /// [`unimplemented`].
    #[must_use]
    pub fn build(&self) -> JumpTable {
        self.build_over(|_| None)
    }

    /// Builds the table, routing every opcode without a registered handler to
    /// its standard handler.
    #[must_use]
    pub fn build_with_defaults(&self) -> JumpTable {
        self.build_over(handler_for)
    }

    fn build_over(&self, fallback: impl Fn(OpCode) -> Option<Handler>) -> JumpTable {
        let mut handlers: [Handler; 256] = [undefined; 256];
        let mut kinds = [HandlerKind::Undefined; 256];
        for opcode in OpCode::ALL {
            let index = usize::from(opcode.byte());
            match self.handlers.get(opcode).copied().or_else(|| fallback(*opcode)) {
                Some(handler) => {
                    handlers[index] = handler;
                    kinds[index] = HandlerKind::Handled;
                }
                None => {
                    handlers[index] = unimplemented;
                    kinds[index] = HandlerKind::Unimplemented;
                }
            }
        }

        JumpTable { handlers, kinds }
    }
}

/// Signals that the executing opcode has no symbolic semantics.
///
/// # Errors
///
/// Always.
pub fn unimplemented(_: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    Err(Error::UnimplementedOpcode {
        opcode: instruction.opcode(),
    })
}

/// Signals that the executing byte is not an opcode.
///
/// Scripts never decode such a byte into an instruction, so this is reached
/// only through custom tables that unassign an opcode.
///
/// # Errors
///
/// Always.
pub fn undefined(_: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    Err(Error::UndefinedOpcode {
        byte: instruction.opcode().byte(),
    })
}

/// Gets the standard handler for `opcode`, or [`None`] if the opcode has no
/// symbolic semantics.
#[must_use]
#[allow(clippy::too_many_lines)] // One arm per opcode family
pub fn handler_for(opcode: OpCode) -> Option<Handler> {
    use OpCode as O;

    let handler: Handler = match opcode {
        O::PushInt8 | O::PushInt16 | O::PushInt32 | O::PushInt64 | O::PushInt128 | O::PushInt256 => {
            constants::push_int
        }
        O::PushT | O::PushF => constants::push_bool,
        O::PushA => constants::push_a,
        O::PushNull => constants::push_null,
        O::PushData1 | O::PushData2 | O::PushData4 => constants::push_data,
        O::PushM1
        | O::Push0
        | O::Push1
        | O::Push2
        | O::Push3
        | O::Push4
        | O::Push5
        | O::Push6
        | O::Push7
        | O::Push8
        | O::Push9
        | O::Push10
        | O::Push11
        | O::Push12
        | O::Push13
        | O::Push14
        | O::Push15
        | O::Push16 => constants::push_small,

        O::Nop => control::nop,
        O::Jmp | O::JmpL => control::jmp,
        O::JmpIf | O::JmpIfL => control::jmp_if,
        O::JmpIfNot | O::JmpIfNotL => control::jmp_if_not,
        O::JmpEq
        | O::JmpEqL
        | O::JmpNe
        | O::JmpNeL
        | O::JmpGt
        | O::JmpGtL
        | O::JmpGe
        | O::JmpGeL
        | O::JmpLt
        | O::JmpLtL
        | O::JmpLe
        | O::JmpLeL => control::jmp_compare,
        O::Call | O::CallL => control::call,
        O::CallA => control::call_a,
        O::CallT => return None,
        O::Abort => control::abort,
        O::AbortMsg => control::abort_msg,
        O::Assert => control::assert,
        O::AssertMsg => control::assert_msg,
        O::Throw => control::throw,
        O::Try | O::TryL => control::try_block,
        O::EndTry | O::EndTryL => control::end_try,
        O::EndFinally => control::end_finally,
        O::Ret => control::ret,
        O::Syscall => interop::syscall,

        O::Depth => stack::depth,
        O::Drop => stack::drop,
        O::Nip => stack::nip,
        O::XDrop => stack::xdrop,
        O::Clear => stack::clear,
        O::Dup => stack::dup,
        O::Over => stack::over,
        O::Pick => stack::pick,
        O::Tuck => stack::tuck,
        O::Swap => stack::swap,
        O::Rot => stack::rot,
        O::Roll => stack::roll,
        O::Reverse3 | O::Reverse4 => stack::reverse_fixed,
        O::ReverseN => stack::reverse_n,

        O::InitSSlot => slot::init_static_slot,
        O::InitSlot => slot::init_slot,
        O::LdSFld0
        | O::LdSFld1
        | O::LdSFld2
        | O::LdSFld3
        | O::LdSFld4
        | O::LdSFld5
        | O::LdSFld6
        | O::LdSFld => slot::load_static,
        O::StSFld0
        | O::StSFld1
        | O::StSFld2
        | O::StSFld3
        | O::StSFld4
        | O::StSFld5
        | O::StSFld6
        | O::StSFld => slot::store_static,
        O::LdLoc0
        | O::LdLoc1
        | O::LdLoc2
        | O::LdLoc3
        | O::LdLoc4
        | O::LdLoc5
        | O::LdLoc6
        | O::LdLoc => slot::load_local,
        O::StLoc0
        | O::StLoc1
        | O::StLoc2
        | O::StLoc3
        | O::StLoc4
        | O::StLoc5
        | O::StLoc6
        | O::StLoc => slot::store_local,
        O::LdArg0
        | O::LdArg1
        | O::LdArg2
        | O::LdArg3
        | O::LdArg4
        | O::LdArg5
        | O::LdArg6
        | O::LdArg => slot::load_argument,
        O::StArg0
        | O::StArg1
        | O::StArg2
        | O::StArg3
        | O::StArg4
        | O::StArg5
        | O::StArg6
        | O::StArg => slot::store_argument,

        O::NewBuffer => splice::new_buffer,
        O::Memcpy => splice::memcpy,
        O::Cat => splice::cat,
        O::Substr => splice::substr,
        O::Left => splice::left,
        O::Right => splice::right,

        O::Invert
        | O::Sign
        | O::Abs
        | O::Negate
        | O::Inc
        | O::Dec
        | O::Sqrt
        | O::Nz => arithmetic::unary,
        O::And
        | O::Or
        | O::Xor
        | O::Add
        | O::Sub
        | O::Mul
        | O::Div
        | O::Mod
        | O::Pow
        | O::Shl
        | O::Shr
        | O::NumEqual
        | O::NumNotEqual
        | O::Lt
        | O::Le
        | O::Gt
        | O::Ge
        | O::Min
        | O::Max => arithmetic::binary,
        O::ModMul | O::ModPow | O::Within => arithmetic::ternary,
        O::Not => arithmetic::not,
        O::BoolAnd | O::BoolOr => arithmetic::boolean,

        O::Equal | O::NotEqual => types::equal,
        O::IsNull => types::is_null,
        O::IsType => types::is_type,
        O::Convert => types::convert,

        O::PackStruct | O::Pack => compound::pack,
        O::Unpack => compound::unpack,
        O::NewArray0 | O::NewStruct0 => compound::new_empty,
        O::NewArray | O::NewStruct => compound::new_sized,
        O::NewArrayT => compound::new_array_typed,
        O::Size => compound::size,
        O::PickItem => compound::pick_item,
        O::Append => compound::append,
        O::SetItem => compound::set_item,
        O::ReverseItems => compound::reverse_items,
        O::Remove => compound::remove,
        O::ClearItems => compound::clear_items,
        O::PopItem => compound::pop_item,
        O::PackMap | O::NewMap | O::HasKey | O::Keys | O::Values => return None,
    };

    Some(handler)
}
