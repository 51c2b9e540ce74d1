//! Handlers for the numeric and logical instructions.
//!
//! Concrete operands are folded with the VM's arbitrary-precision semantics,
//! including its 32-byte bound on integer results. An operation with any
//! symbolic operand yields a derived variable over its operands instead.

use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::{
    constant::{MAX_SHIFT, PUSHINT_MAX_BYTES},
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{integer_bytes, StackItem, SymbolicVariable},
        SymbolicVM,
    },
};

/// Pops `count` operands, returning them in the order they were pushed.
fn pop_operands(vm: &mut SymbolicVM, count: usize) -> Result<Vec<StackItem>, Error> {
    let mut operands = (0..count).map(|_| vm.pop()).collect::<Result<Vec<_>, _>>()?;
    operands.reverse();
    Ok(operands)
}

/// Folds the integer values of `operands` with `operation`, or pushes a
/// derived variable if any of them is symbolic.
fn fold(
    vm: &mut SymbolicVM,
    opcode: OpCode,
    operands: Vec<StackItem>,
    operation: impl FnOnce(&[BigInt]) -> Result<StackItem, Error>,
) -> HandlerResult {
    let mut values = Vec::with_capacity(operands.len());
    for operand in &operands {
        match operand.to_integer()? {
            Some(value) => values.push(value),
            None => {
                return vm.push(StackItem::variable(SymbolicVariable::Derived {
                    opcode,
                    operands,
                }))
            }
        }
    }

    let result = operation(&values)?;
    vm.push(result)
}

/// Produces an integer result, enforcing the VM's bound on integer size.
fn integer(opcode: OpCode, value: BigInt) -> Result<StackItem, Error> {
    if integer_bytes(&value).len() > PUSHINT_MAX_BYTES {
        return Err(Error::OutOfRange { opcode, value });
    }
    Ok(StackItem::integer(value))
}

/// Checks a shift or exponent operand.
fn shift(opcode: OpCode, value: &BigInt) -> Result<usize, Error> {
    value
        .to_usize()
        .filter(|shift| *shift <= MAX_SHIFT)
        .ok_or_else(|| Error::OutOfRange {
            opcode,
            value: value.clone(),
        })
}

fn nonzero<'a>(opcode: OpCode, divisor: &'a BigInt) -> Result<&'a BigInt, Error> {
    if divisor.is_zero() {
        return Err(Error::OutOfRange {
            opcode,
            value: divisor.clone(),
        });
    }
    Ok(divisor)
}

/// The single-operand numeric instructions.
pub fn unary(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let operands = pop_operands(vm, 1)?;
    fold(vm, opcode, operands, |values| {
        let x = &values[0];
        match opcode {
            OpCode::Invert => integer(opcode, -x - 1),
            OpCode::Sign => Ok(StackItem::integer(x.signum())),
            OpCode::Abs => integer(opcode, x.abs()),
            OpCode::Negate => integer(opcode, -x),
            OpCode::Inc => integer(opcode, x + 1),
            OpCode::Dec => integer(opcode, x - 1),
            OpCode::Sqrt if x.is_negative() => Err(Error::OutOfRange {
                opcode,
                value: x.clone(),
            }),
            OpCode::Sqrt => integer(opcode, x.sqrt()),
            OpCode::Nz => Ok(StackItem::boolean(!x.is_zero())),
            _ => Err(Error::InvalidOperand { opcode }),
        }
    })
}

/// The two-operand numeric instructions, which pop `x2` and then `x1`.
pub fn binary(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let operands = pop_operands(vm, 2)?;

    // Ordering comparisons against null are false rather than faults.
    let ordering = matches!(opcode, OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge);
    if ordering && operands.iter().any(StackItem::is_null) {
        return vm.push(StackItem::boolean(false));
    }

    fold(vm, opcode, operands, |values| {
        let (x1, x2) = (&values[0], &values[1]);
        match opcode {
            OpCode::And => integer(opcode, x1 & x2),
            OpCode::Or => integer(opcode, x1 | x2),
            OpCode::Xor => integer(opcode, x1 ^ x2),
            OpCode::Add => integer(opcode, x1 + x2),
            OpCode::Sub => integer(opcode, x1 - x2),
            OpCode::Mul => integer(opcode, x1 * x2),
            OpCode::Div => integer(opcode, x1 / nonzero(opcode, x2)?),
            OpCode::Mod => integer(opcode, x1 % nonzero(opcode, x2)?),
            OpCode::Pow => {
                let exponent = shift(opcode, x2)?;
                let exponent = u32::try_from(exponent).map_err(|_| Error::OutOfRange {
                    opcode,
                    value: x2.clone(),
                })?;
                integer(opcode, x1.pow(exponent))
            }
            OpCode::Shl => integer(opcode, x1 << shift(opcode, x2)?),
            OpCode::Shr => integer(opcode, x1 >> shift(opcode, x2)?),
            OpCode::NumEqual => Ok(StackItem::boolean(x1 == x2)),
            OpCode::NumNotEqual => Ok(StackItem::boolean(x1 != x2)),
            OpCode::Lt => Ok(StackItem::boolean(x1 < x2)),
            OpCode::Le => Ok(StackItem::boolean(x1 <= x2)),
            OpCode::Gt => Ok(StackItem::boolean(x1 > x2)),
            OpCode::Ge => Ok(StackItem::boolean(x1 >= x2)),
            OpCode::Min => Ok(StackItem::integer(x1.min(x2).clone())),
            OpCode::Max => Ok(StackItem::integer(x1.max(x2).clone())),
            _ => Err(Error::InvalidOperand { opcode }),
        }
    })
}

/// `MODMUL`, `MODPOW` and `WITHIN`.
pub fn ternary(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let operands = pop_operands(vm, 3)?;
    fold(vm, opcode, operands, |values| {
        let (a, b, c) = (&values[0], &values[1], &values[2]);
        match opcode {
            OpCode::ModMul => integer(opcode, (a * b) % nonzero(opcode, c)?),
            OpCode::ModPow => integer(opcode, mod_pow(opcode, a, b, c)?),
            OpCode::Within => Ok(StackItem::boolean(b <= a && a < c)),
            _ => Err(Error::InvalidOperand { opcode }),
        }
    })
}

/// Computes `value ^ exponent mod modulus`, where an exponent of `-1` asks for
/// the modular inverse. The result takes the sign of the power, as with a
/// truncating remainder.
fn mod_pow(
    opcode: OpCode,
    value: &BigInt,
    exponent: &BigInt,
    modulus: &BigInt,
) -> Result<BigInt, Error> {
    let modulus = nonzero(opcode, modulus)?;
    if *exponent == -BigInt::one() {
        return mod_inverse(opcode, value, modulus);
    }
    if exponent.is_negative() {
        return Err(Error::OutOfRange {
            opcode,
            value: exponent.clone(),
        });
    }

    let magnitude = value.magnitude().modpow(exponent.magnitude(), modulus.magnitude());
    let negative = value.is_negative() && !(exponent % 2i32).is_zero();
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    Ok(BigInt::from_biguint(sign, magnitude))
}

/// Computes the inverse of `value` modulo `modulus` with the extended
/// Euclidean algorithm, which must exist for a positive value and a modulus of
/// at least two.
fn mod_inverse(opcode: OpCode, value: &BigInt, modulus: &BigInt) -> Result<BigInt, Error> {
    let out_of_range = |value: &BigInt| Error::OutOfRange {
        opcode,
        value: value.clone(),
    };
    if !value.is_positive() {
        return Err(out_of_range(value));
    }
    if *modulus < BigInt::from(2) {
        return Err(out_of_range(modulus));
    }

    let (mut r, mut new_r) = (modulus.clone(), value % modulus);
    let (mut t, mut new_t) = (BigInt::zero(), BigInt::one());
    while !new_r.is_zero() {
        let quotient = &r / &new_r;
        let next_r = &r - &quotient * &new_r;
        r = std::mem::replace(&mut new_r, next_r);
        let next_t = &t - &quotient * &new_t;
        t = std::mem::replace(&mut new_t, next_t);
    }
    if !r.is_one() {
        return Err(out_of_range(value));
    }

    Ok(((t % modulus) + modulus) % modulus)
}

/// `NOT` negates the truth value of its operand.
pub fn not(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let x = vm.pop()?;
    match x.to_boolean()? {
        Some(value) => vm.push(StackItem::boolean(!value)),
        None => vm.push(StackItem::variable(SymbolicVariable::Derived {
            opcode:   instruction.opcode(),
            operands: vec![x],
        })),
    }
}

/// `BOOLAND` and `BOOLOR`, which fold whenever one known operand decides the
/// result on its own.
pub fn boolean(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let x2 = vm.pop()?;
    let x1 = vm.pop()?;
    let (a, b) = (x1.to_boolean()?, x2.to_boolean()?);

    let result = match (opcode, a, b) {
        (OpCode::BoolAnd, Some(a), Some(b)) => Some(a && b),
        (OpCode::BoolAnd, Some(false), _) | (OpCode::BoolAnd, _, Some(false)) => Some(false),
        (OpCode::BoolOr, Some(a), Some(b)) => Some(a || b),
        (OpCode::BoolOr, Some(true), _) | (OpCode::BoolOr, _, Some(true)) => Some(true),
        _ => None,
    };
    match result {
        Some(value) => vm.push(StackItem::boolean(value)),
        None => vm.push(StackItem::variable(SymbolicVariable::Derived {
            opcode,
            operands: vec![x1, x2],
        })),
    }
}
