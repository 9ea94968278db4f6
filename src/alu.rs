/*!

  Execution of the tick stream: every arithmetic and logic operation, from
  decoded instruction to the ordered list of values it retires.

  Both cores share this path. The single-unit interpreter pushes the returned
  values straight onto a belt; the multi-unit core parks them in a retire
  station. Multi-value producers list their results in retirement order:
  quotient before remainder, low half before high half.

  The operations share one prologue, the precondition check and then the
  extra-numerical screen, so each kernel is only the arithmetic itself.

*/

use crate::belt::{BeltValue, Cond};
use crate::bytecode::{TickInstruction, TickOp};
use crate::exnum::{add_with_carry, propagate2, propagate3, sign_extend};
use crate::machine::Frame;

/// Everything a tick instruction does to the world: zero, one, or two values
/// for one destination belt, plus the elide count for the opposite pipeline.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TickEffect {
  pub values : Vec<BeltValue>,
  pub slow   : bool,
  pub elide  : u8,
}

impl TickEffect {
  fn empty(elide: u8) -> TickEffect {
    TickEffect { values: Vec::new(), slow: false, elide }
  }
}

/// Executes one tick instruction against a frame snapshot. Pure: the frame
/// is only read, and `pc` is only stamped into provenance payloads.
pub fn execute_tick(instruction: &TickInstruction, frame: &Frame, pc: usize) -> TickEffect {
  match *instruction {
    TickInstruction::Nop { elide } => TickEffect::empty(elide),

    TickInstruction::Wide { opcode, cond, a, b, c, slow, elide } => {
      let op1 = frame.read_belt(a as usize);
      let op2 = frame.read_belt(b as usize);
      let op3 = frame.read_belt(c as usize);
      let values = execute_wide(opcode, cond, op1, op2, op3, pc);
      TickEffect { values, slow, elide }
    }

    TickInstruction::Compute { opcode, cond, src, lhs, rhs, slow, elide } => {
      let src = frame.read_belt(src as usize);
      let op1 = frame.read_belt(lhs as usize);
      let op2 = frame.read_belt(rhs as usize);
      let values = execute_conditional(opcode, cond, src, op1, op2, pc);
      TickEffect { values, slow, elide }
    }

    TickInstruction::Immediate { opcode, lhs, imm, slow, elide } => {
      let op1 = frame.read_belt(lhs as usize);
      let op2 = BeltValue(imm as i64);
      let values =
        execute_conditional(opcode, Cond::Always, BeltValue(0), op1, op2, pc);
      TickEffect { values, slow, elide }
    }
  }
}

/// The five three-operand forms. Only PICK is conditional, and its condition
/// reads the first operand rather than a separate source.
fn execute_wide(
  opcode : TickOp,
  cond   : Cond,
  op1    : BeltValue,
  op2    : BeltValue,
  op3    : BeltValue,
  pc     : usize
) -> Vec<BeltValue> {
  match opcode {
    TickOp::AddC => {
      let value = match propagate2(op1, op2) {
        Some(marker) => marker,
        None => {
          let sum = add_with_carry(
            op1.payload() as i64, op2.payload() as i64, op3.raw());
          BeltValue(sum).with_zero()
        }
      };
      vec![value]
    }

    TickOp::SubB => {
      let value = match propagate2(op1, op2) {
        Some(marker) => marker,
        None => {
          // Subtraction is addition of the complement with the borrow
          // inverted on the way in and out.
          let sum = add_with_carry(
            op1.payload() as i64,
            (op2.payload() as i64) ^ 0xFFFF_FFFF,
            op3.raw() ^ BeltValue::CARRY
          ) ^ BeltValue::CARRY;
          BeltValue(sum).with_zero()
        }
      };
      vec![value]
    }

    TickOp::Mull => match propagate2(op1, op2) {
      Some(marker) => vec![marker, marker],
      None => {
        let product =
          (op1.payload() as u64).wrapping_mul(op2.payload() as u64);
        vec![
          BeltValue((product & 0xFFFF_FFFF) as i64).with_zero(),
          BeltValue((product >> 32) as i64).with_zero(),
        ]
      }
    },

    TickOp::DivL => match propagate3(op1, op2, op3) {
      Some(marker) => vec![marker, marker],
      None => {
        if 0 == op3.payload() {
          let marker = BeltValue::invalid_at(pc);
          return vec![marker, marker];
        }
        let dividend =
          ((op1.payload() as u64) << 32) | op2.payload() as u64;
        let divisor = op3.payload() as u64;
        let mut quotient = dividend / divisor;
        let remainder = dividend % divisor;
        let mut flags = 0;
        if quotient > 0xFFFF_FFFF {
          quotient &= 0xFFFF_FFFF;
          flags = BeltValue::OVERFLOW;
        }
        vec![
          BeltValue(quotient as i64 | flags).with_zero(),
          BeltValue(remainder as i64).with_zero(),
        ]
      }
    },

    TickOp::Pick => {
      // Selection passes the chosen value through untouched, flags and all.
      match cond.holds(op1) {
        true  => vec![op2],
        false => vec![op3],
      }
    }

    _ => unreachable!("{} decoded as a wide tick form", opcode),
  }
}

/// The shared prologue of the two-operand forms: a failed precondition
/// retires TRANSIENT provenance, extra-numerical operands propagate, and
/// only then does the kernel run. DIV and UDIV keep the belt shape stable by
/// producing both of their values on either early-out path.
fn execute_conditional(
  opcode : TickOp,
  cond   : Cond,
  src    : BeltValue,
  op1    : BeltValue,
  op2    : BeltValue,
  pc     : usize
) -> Vec<BeltValue> {
  let kernel = opcode.register_form();
  let pair = opcode.retires_two();

  if !cond.holds(src) {
    let marker = BeltValue::transient_at(pc);
    return match pair {
      true  => vec![marker, marker],
      false => vec![marker],
    };
  }

  if let Some(marker) = propagate2(op1, op2) {
    return match pair {
      true  => vec![marker, marker],
      false => vec![marker],
    };
  }

  let p1 = op1.payload() as i64;
  let p2 = op2.payload() as i64;

  match kernel {
    TickOp::Add => {
      vec![BeltValue(add_with_carry(p1, p2, 0)).with_zero()]
    }

    TickOp::Sub => {
      let difference =
        add_with_carry(p1, p2 ^ 0xFFFF_FFFF, BeltValue::CARRY) ^ BeltValue::CARRY;
      vec![BeltValue(difference).with_zero()]
    }

    TickOp::Mul => {
      let product = (p1 as u64).wrapping_mul(p2 as u64) as i64;
      let value = match 0 != ((op1.raw() ^ op2.raw() ^ product) & 0x8000_0000) {
        true  => (product & 0xFFFF_FFFF) | BeltValue::OVERFLOW,
        false => product & 0xFFFF_FFFF,
      };
      vec![BeltValue(value).with_zero()]
    }

    TickOp::Div => {
      if 0 == p2 {
        let marker = BeltValue::invalid_at(pc);
        return vec![marker, marker];
      }
      let lhs = sign_extend(p1);
      let rhs = sign_extend(p2);
      vec![
        BeltValue((lhs / rhs) & 0xFFFF_FFFF).with_zero(),
        BeltValue((lhs % rhs) & 0xFFFF_FFFF).with_zero(),
      ]
    }

    TickOp::UDiv => {
      if 0 == p2 {
        let marker = BeltValue::invalid_at(pc);
        return vec![marker, marker];
      }
      vec![
        BeltValue(p1 / p2).with_zero(),
        BeltValue(p1 % p2).with_zero(),
      ]
    }

    TickOp::Shr => {
      vec![BeltValue(shift_logical(op1, op2)).with_zero()]
    }

    TickOp::AShr => {
      vec![BeltValue(shift_arithmetic(op1, op2)).with_zero()]
    }

    TickOp::And => vec![BeltValue(p1 & p2).with_zero()],
    TickOp::Or  => vec![BeltValue(p1 | p2).with_zero()],
    TickOp::Xor => vec![BeltValue(p1 ^ p2).with_zero()],

    _ => unreachable!("{} decoded as a conditional tick form", opcode),
  }
}

/**
  Logical shift. A non-negative count shifts right, capturing the last bit
  shifted out into CARRY; a negative count shifts left, keeping bit 32 so a
  bit pushed off the top also lands in CARRY. Counts of 33 or more clear the
  value entirely.
*/
fn shift_logical(op1: BeltValue, op2: BeltValue) -> i64 {
  let value = op1.payload() as i64;
  let count = op2.raw();
  if 0 == (count & BeltValue::NEGATIVE) {
    let magnitude = count & 0x7FFF_FFFF;
    if 0 == magnitude {
      return value;
    }
    if magnitude >= 33 {
      return 0;
    }
    // Stop one short so the final bit can be caught as it falls out.
    let mut result = value >> (magnitude - 1);
    let out = result & 1;
    result >>= 1;
    if 1 == out {
      result |= BeltValue::CARRY;
    }
    result
  } else {
    let magnitude = count.wrapping_neg() & 0x7FFF_FFFF;
    match magnitude >= 33 {
      true  => 0,
      false => (value << magnitude) & 0x1_FFFF_FFFF,
    }
  }
}

/// Arithmetic shift. Right shifts replicate the sign; counts of 32 or more
/// saturate to all-zeros or all-ones. Negative counts shift left without
/// keeping a carry.
fn shift_arithmetic(op1: BeltValue, op2: BeltValue) -> i64 {
  let count = op2.raw();
  if 0 == (count & BeltValue::NEGATIVE) {
    let magnitude = count & 0x7FFF_FFFF;
    if magnitude >= 32 {
      return match op1.has(BeltValue::NEGATIVE) {
        true  => 0xFFFF_FFFF,
        false => 0,
      };
    }
    (sign_extend(op1.raw()) >> magnitude) & 0xFFFF_FFFF
  } else {
    let magnitude = count.wrapping_neg() & 0x7FFF_FFFF;
    match magnitude >= 32 {
      true  => 0,
      false => ((op1.payload() as i64) << magnitude) & 0xFFFF_FFFF,
    }
  }
}
