//! Macros for defining the opcode table and for writing scripts by hand.

/// Generates the [`crate::opcode::OpCode`] enum along with its byte decoding,
/// mnemonic, and operand layout tables from a single listing.
macro_rules! opcodes {
    ($($(#[$meta:meta])* $variant:ident = $byte:literal, $name:literal, $operand:expr;)*) => {
        /// A NeoVM operation code.
        ///
        /// The discriminant of each variant is the byte that encodes it in a
        /// script.
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[repr(u8)]
        pub enum OpCode {
            $($(#[$meta])* $variant = $byte,)*
        }

        impl OpCode {
            /// Every assigned opcode, in ascending byte order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant,)*];

            /// Gets the assembly mnemonic for the opcode.
            #[must_use]
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }

            /// Gets the layout of the operand that follows the opcode byte.
            #[must_use]
            pub fn operand_size(self) -> OperandSize {
                match self {
                    $(OpCode::$variant => $operand,)*
                }
            }
        }

        impl TryFrom<u8> for OpCode {
            type Error = crate::error::disassembly::Error;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($byte => Ok(OpCode::$variant),)*
                    _ => Err(crate::error::disassembly::Error::UnknownOpcode { byte }),
                }
            }
        }
    };
}

pub(crate) use opcodes;

/// Assembles a [`crate::disassembly::Script`] from a sequence of items that
/// implement [`crate::disassembly::Emit`].
///
/// Bare [`crate::opcode::OpCode`]s are emitted without an operand, and
/// [`crate::disassembly::Instruction`]s are emitted with theirs.
///
/// ```
/// use neovm_symbolic::{disassembly::Instruction, opcode::OpCode, script};
///
/// let script = script![
///     OpCode::Push1,
///     Instruction::new(OpCode::StSFld, vec![0x00]).unwrap(),
///     OpCode::Ret
/// ];
/// assert_eq!(script.as_bytes(), &[0x11, 0x67, 0x00, 0x40]);
/// ```
#[macro_export]
macro_rules! script {
    ($($item:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut builder = $crate::disassembly::ScriptBuilder::new();
        $(builder.emit_item(&$item);)*
        builder.build()
    }};
}
